use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use printer_connector::agent::{Agent, AgentOptions};
use printer_connector::core::Config;
use printer_connector::utils::init_logger;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "printer-connector", version, about = "Moonraker-to-cloud printer connector")]
struct Cli {
    /// Path to config JSON (required)
    #[arg(long)]
    config: PathBuf,

    /// Log level: debug|info|warn|error
    #[arg(long, default_value = "info", value_parser = ["debug", "info", "warn", "error"])]
    log_level: String,

    /// Run one iteration of each loop and exit (debug)
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    // Usage errors (missing --config, bad --log-level) exit 2 via clap
    let cli = Cli::parse();

    init_logger(&cli.log_level);

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid config");
        std::process::exit(1);
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let agent = match Agent::new(AgentOptions {
        config_path: cli.config,
        config,
        version: VERSION.to_string(),
        once: cli.once,
    }) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize agent");
            std::process::exit(1);
        }
    };

    if let Err(e) = agent.run(shutdown).await {
        tracing::error!(error = %e, "agent exited with error");
        std::process::exit(1);
    }

    tracing::info!("agent exited cleanly");
}

/// SIGINT and SIGTERM both cancel the root token; loops drain and the
/// process exits 0.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}
