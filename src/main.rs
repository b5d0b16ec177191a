//! Cloud Run demo service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request        ┌──────────┐    ┌──────────┐    ┌──────────┐
//!     ─────────────────────▶│   net    │───▶│   http   │───▶│ upstream │────▶ httpbin
//!                           │ listener │    │ handlers │    │  client  │
//!                           └────┬─────┘    └────┬─────┘    └────┬─────┘
//!                                │ request ctx   │               │ ctx.run
//!                                ▼               ▼               ▼
//!                           ┌──────────────────────────────────────────┐
//!     SIGTERM / SIGINT ────▶│ lifecycle: root ctx → coordinator → drain│
//!                           └──────────────────────────────────────────┘
//! ```
//!
//! On a termination signal the root context is cancelled (aborting every
//! context-aware upstream call), the listener stops accepting, and in-flight
//! connections get `shutdown.timeout_secs` to finish before they are dropped.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use effective_cloudrun::config::{self, ConfigError, ServiceConfig};
use effective_cloudrun::lifecycle::{watch_for_termination, DrainOutcome, Service, TerminationSignal};
use effective_cloudrun::observability::init_logging;

#[derive(Parser)]
#[command(name = "effective-cloudrun")]
#[command(about = "Cloud Run service with coordinated graceful shutdown", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds in-flight requests get after a termination signal
    #[arg(long, value_name = "SECS")]
    shutdown_timeout: Option<u64>,
}

impl Cli {
    /// File, then environment, then flags.
    fn load_config(&self) -> Result<ServiceConfig, ConfigError> {
        let mut config = config::from_env(self.config.as_deref())?;

        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(secs) = self.shutdown_timeout {
            config.shutdown.timeout_secs = secs;
        }

        config::validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is configured from the config, so errors here go to stderr.
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("effective-cloudrun: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_logging(&config.observability) {
        eprintln!("effective-cloudrun: failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.listener.port,
        shutdown_timeout_secs = config.shutdown.timeout_secs,
        "effective-cloudrun starting"
    );

    let watcher = match watch_for_termination(&TerminationSignal::ALL) {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::error!(error = %err, "Failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let service = match Service::bind(&config).await {
        Ok(service) => service,
        Err(err) => {
            tracing::error!(error = %err, "Failed to start service");
            return ExitCode::FAILURE;
        }
    };

    let result = service.run(watcher).await;
    ExitCode::from(DrainOutcome::report(&result).exit_code())
}
