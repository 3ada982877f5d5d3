//! CLI command implementations

mod config;
mod run;

pub use config::{config_get, config_init, config_path, config_show, load_or_default};
pub use run::{run_command, RunOptions, RunReport};
