//! Workflow post step
//!
//! Asks the gateway started earlier in the job to shut down, then prints its
//! log so the output ends up in the job log. Failures are reported but never
//! fail the step.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::server::protocol::SHUTDOWN_TOKEN_HEADER;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Send `DELETE /shutdown` to the gateway at `base_url`
pub async fn request_shutdown(base_url: &str, token: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(SHUTDOWN_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")?;

    let url = format!("{}/shutdown", base_url.trim_end_matches('/'));
    let response = client
        .delete(&url)
        .header(SHUTDOWN_TOKEN_HEADER, token)
        .send()
        .await
        .with_context(|| format!("Failed to reach gateway at {}", url))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Gateway refused shutdown ({}): {}", status, body);
    }

    info!("Gateway shutdown requested");
    Ok(())
}

/// Read the server log, if one was written
pub async fn read_server_log(log_file: Option<&Path>) -> Option<String> {
    let path = log_file?;
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Some(contents),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read server log");
            None
        }
    }
}

/// Run the whole post step against the gateway on `port`
pub async fn run(port: u16, token: &str, log_file: Option<&Path>) {
    let base_url = format!("http://127.0.0.1:{}", port);
    if let Err(e) = request_shutdown(&base_url, token).await {
        warn!(error = %e, "Server shutdown failed");
    }

    match read_server_log(log_file).await {
        Some(contents) => {
            println!("Server logs:");
            println!("{}", contents);
        }
        None => println!("No server logs available"),
    }
}
