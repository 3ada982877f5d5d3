//! tether CLI
//!
//! Runs sessions through the connection slot pool, health monitor and task
//! scheduler, and manages the configuration file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_cli::commands::{self, RunOptions};
use tether_cli::output::{
    format_health_report, format_pool_stats, format_scheduler_status, format_tasks, print_info,
    print_warning,
};

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Bounded connection pool with health monitoring and task scheduling")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one session per client id through the pool and scheduler
    Run {
        /// Client ids to schedule sessions for
        #[arg(long, value_delimiter = ',', default_value = "a,b,c")]
        ids: Vec<String>,
        /// Seconds to run before shutting down
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
        /// Milliseconds each session keeps its slot
        #[arg(long, default_value_t = 500)]
        hold: u64,
        /// Client id whose heartbeats are refused (repeatable)
        #[arg(long)]
        flaky: Vec<String>,
        /// Health check interval in milliseconds (overrides config)
        #[arg(long)]
        check_interval: Option<u64>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show current configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Run {
            ids,
            duration,
            hold,
            flaky,
            check_interval,
        } => {
            let config = commands::load_or_default(cli.config.as_ref())?;
            let options = RunOptions {
                ids,
                duration: Duration::from_secs(duration),
                hold: Duration::from_millis(hold),
                flaky,
                check_interval: check_interval.map(Duration::from_millis),
            };

            if !cli.quiet {
                print_info(&format!(
                    "Running {} session(s) for {}s",
                    options.ids.len(),
                    duration
                ));
            }

            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone());

            let report = commands::run_command(config, options, cancel).await?;
            if report.interrupted {
                print_warning("Interrupted before the run finished");
            }

            println!("Pool");
            println!("{}", format_pool_stats(&report.pool));
            println!();
            println!("Health");
            println!("{}", format_health_report(&report.health));
            println!();
            println!("Scheduler");
            println!("{}", format_scheduler_status(&report.scheduler));
            println!();
            println!("{}", format_tasks(&report.tasks));
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                commands::config_init(cli.config.as_ref(), force)?;
            }
            ConfigAction::Show => {
                commands::config_show(cli.config.as_ref())?;
            }
            ConfigAction::Get { key } => {
                commands::config_get(cli.config.as_ref(), &key)?;
            }
            ConfigAction::Path => {
                commands::config_path(cli.config.as_ref())?;
            }
        },
    }

    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
