//! TurboGHA gateway - Turborepo remote cache for CI runners
//!
//! Serves the Turborepo remote cache API on localhost and stores artifacts
//! in the GitHub Actions cache, or on the local filesystem when the runner
//! exposes no cache service.

mod artifact;
mod backend;
mod config;
mod error;
mod logging;
mod post_step;
mod provider;
mod remote;
mod server;
mod tracker;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use config::{Cli, Command};
use provider::Provider;
use tracker::Tracker;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug, cli.log_timestamps)?;

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = cli.gateway_config();
            info!(
                version = env!("CARGO_PKG_VERSION"),
                port = config.port,
                "Starting TurboGHA gateway"
            );

            let tracker = Arc::new(Tracker::new());
            let provider = match Provider::from_config(&config, Arc::clone(&tracker)) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    error!(error = %e, "Failed to initialize cache provider");
                    return Err(e);
                }
            };

            if let Err(e) = server::serve(&config, provider, tracker).await {
                error!(error = %e, "Gateway failed");
                return Err(e);
            }
        }
        Command::Shutdown { log_file } => {
            post_step::run(cli.port, &cli.shutdown_token, log_file.as_deref()).await;
        }
    }

    Ok(())
}
