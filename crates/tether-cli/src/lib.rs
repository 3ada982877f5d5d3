//! tether-cli: Command-line interface for tether
//!
//! Provides the `tether` binary, which drives the connection pool, the
//! health monitor and the task scheduler against an in-memory transport
//! and manages the configuration file.

pub mod commands;
pub mod output;
