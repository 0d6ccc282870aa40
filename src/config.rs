//! Command-line and environment configuration

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};

/// Default listening port
pub const DEFAULT_PORT: u16 = 41230;

/// Default shared shutdown secret
pub const DEFAULT_SHUTDOWN_TOKEN: &str = "turbogha-internal";

/// Default maximum payload: 500 MiB
pub const DEFAULT_MAX_PAYLOAD: u64 = 500 * 1024 * 1024;

/// Shortest accepted shutdown grace delay
pub const MIN_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(
    name = "turbogha-gateway",
    about = "Turborepo remote cache gateway for CI, backed by the GitHub Actions cache or the local filesystem",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable debug logging
    #[arg(long, global = true, env = "DEBUG", value_parser = FalseyValueParser::new())]
    pub debug: bool,

    /// Prefix log lines with a timestamp
    #[arg(long, global = true, env = "LOG_TIMESTAMPS", value_parser = FalseyValueParser::new())]
    pub log_timestamps: bool,

    /// Port the gateway listens on
    #[arg(long, global = true, env = "TURBOGHA_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Shared secret required by DELETE /shutdown
    #[arg(
        long,
        global = true,
        env = "TURBOGHA_SHUTDOWN_TOKEN",
        default_value = DEFAULT_SHUTDOWN_TOKEN,
        hide_env_values = true
    )]
    pub shutdown_token: String,

    /// Address the gateway binds to
    #[arg(long, global = true, env = "TURBOGHA_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Maximum accepted upload size in bytes
    #[arg(long, global = true, env = "TURBOGHA_MAX_PAYLOAD", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: u64,

    /// Maximum time spent handling a single request
    #[arg(long, global = true, env = "TURBOGHA_REQUEST_TIMEOUT", default_value_t = 300)]
    pub request_timeout_secs: u64,

    /// Delay between an accepted shutdown request and closing the listener
    #[arg(long, global = true, env = "TURBOGHA_SHUTDOWN_GRACE_MS", default_value_t = 500)]
    pub shutdown_grace_ms: u64,

    /// Directory for filesystem artifacts and remote staging files
    #[arg(long, global = true, env = "TURBOGHA_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Remote cache service URL
    #[arg(long, global = true, env = "ACTIONS_CACHE_URL")]
    pub cache_url: Option<String>,

    /// Remote cache service token
    #[arg(long, global = true, env = "ACTIONS_RUNTIME_TOKEN", hide_env_values = true)]
    pub runtime_token: Option<String>,

    /// Namespace separating this gateway's remote entries from others
    #[arg(long, global = true, env = "TURBOGHA_CACHE_VERSION", default_value = "turbogha")]
    pub cache_version: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the cache gateway (default)
    Serve,
    /// Ask a running gateway to shut down and print its log
    Shutdown {
        /// Server log file to print afterwards
        #[arg(long, env = "TURBOGHA_LOG_FILE")]
        log_file: Option<PathBuf>,
    },
}

/// Remote cache service settings
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub cache_url: Option<String>,
    pub runtime_token: Option<String>,
    pub namespace: String,
}

impl RemoteSettings {
    /// Whether the remote cache service is configured and well-formed
    pub fn is_valid(&self) -> bool {
        let url_ok = self
            .cache_url
            .as_deref()
            .is_some_and(|url| url.starts_with("http://") || url.starts_with("https://"));
        let token_ok = self.runtime_token.as_deref().is_some_and(|t| !t.is_empty());
        url_ok && token_ok
    }
}

/// Resolved gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: IpAddr,
    pub port: u16,
    pub shutdown_token: String,
    pub max_payload: u64,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub cache_dir: PathBuf,
    pub remote: RemoteSettings,
}

impl GatewayConfig {
    /// Directory holding filesystem-backend artifacts
    pub fn artifacts_dir(&self) -> PathBuf {
        self.cache_dir.join("artifacts")
    }

    /// Directory holding remote-backend staging files
    pub fn staging_dir(&self) -> PathBuf {
        self.cache_dir.join("staging")
    }
}

impl Cli {
    /// Resolve defaults into a [`GatewayConfig`]
    pub fn gateway_config(&self) -> GatewayConfig {
        let cache_dir = self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("turbogha")
        });

        GatewayConfig {
            host: self.host,
            port: self.port,
            shutdown_token: self.shutdown_token.clone(),
            max_payload: self.max_payload,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms).max(MIN_SHUTDOWN_GRACE),
            cache_dir,
            remote: RemoteSettings {
                cache_url: self.cache_url.clone(),
                runtime_token: self.runtime_token.clone(),
                namespace: self.cache_version.clone(),
            },
        }
    }
}
