//! nodewatchd — the nodewatch daemon.
//!
//! Loads the node list, probes every node once per check interval, raises
//! and clears alerts with hysteresis, and serves the read-only status page.
//!
//! # Usage
//!
//! ```text
//! nodewatchd run --config nodewatch.toml --startup-delay 30s
//! nodewatchd once --config nodewatch.toml
//! nodewatchd check-config --config nodewatch.toml
//! ```

mod daemon;
mod wiring;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::wiring::{Components, StartupError};

const DEFAULT_FILTER: &str = "info,nodewatchd=debug,nodewatch=debug";

/// Exit status for configuration and registration failures.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "nodewatchd", about = "nodewatch node monitor daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor loop and the status server until interrupted.
    Run {
        /// Path to the configuration file.
        #[arg(long, default_value = "nodewatch.toml")]
        config: PathBuf,

        /// Register nodes and serve the status page, but never probe.
        #[arg(long)]
        dry_run: bool,

        /// Wait this long before the first check cycle (e.g. "30s").
        #[arg(long, default_value = "0s", value_parser = parse_delay)]
        startup_delay: Duration,
    },
    /// Run a single check cycle, print the text report, and exit.
    Once {
        #[arg(long, default_value = "nodewatch.toml")]
        config: PathBuf,
    },
    /// Validate the configuration and exit.
    CheckConfig {
        #[arg(long, default_value = "nodewatch.toml")]
        config: PathBuf,
    },
}

fn parse_delay(s: &str) -> Result<Duration, String> {
    nodewatch_core::parse_duration(s).ok_or_else(|| format!("invalid duration: {s:?}"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result = match cli.command {
        Command::Run {
            config,
            dry_run,
            startup_delay,
        } => {
            let started = match Components::load(&config) {
                Ok(components) => components.bind_status().await.map(|l| (components, l)),
                Err(e) => Err(e),
            };
            match started {
                Ok((components, listener)) => daemon::run(components, listener, dry_run, startup_delay).await,
                Err(e) => return startup_failed(&config, e),
            }
        }
        Command::Once { config } => match Components::load(&config) {
            Ok(components) => daemon::once(components).await,
            Err(e) => return startup_failed(&config, e),
        },
        Command::CheckConfig { config } => match Components::load(&config) {
            Ok(components) => {
                println!(
                    "{}: ok, {} nodes, status on {}",
                    config.display(),
                    components.registry.len(),
                    components.listen
                );
                Ok(())
            }
            Err(e) => return startup_failed(&config, e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "nodewatchd failed");
            ExitCode::FAILURE
        }
    }
}

fn startup_failed(config: &std::path::Path, err: StartupError) -> ExitCode {
    error!(config = %config.display(), error = %err, "cannot start");
    ExitCode::from(EXIT_CONFIG)
}
