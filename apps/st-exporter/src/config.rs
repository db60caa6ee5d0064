use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use st_metrics::auth::DEFAULT_TOKEN_URL;
use st_metrics::reader::DEFAULT_API_URL;
use st_metrics::Credentials;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(
    name = "st-exporter",
    version,
    about = "Exports SmartThings device attributes as Prometheus metrics"
)]
pub struct Args {
    /// The OAuth client ID
    #[arg(long, env = "CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// The OAuth client secret
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// The status refresh interval in seconds (default 60)
    #[arg(long, env = "REFRESH_INTERVAL")]
    pub interval: Option<String>,

    /// Path to the TLS certificate for the metrics endpoint
    #[arg(long, env = "SSL_CERT_FILE")]
    pub cert_file: Option<PathBuf>,

    /// Path to the TLS private key for the metrics endpoint
    #[arg(long, env = "SSL_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Address the metrics endpoint listens on
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:9153")]
    pub listen_addr: SocketAddr,

    /// OAuth token endpoint
    #[arg(long, env = "TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// SmartThings API base URL
    #[arg(long, env = "API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// YAML file replacing the built-in attribute table
    #[arg(long, env = "ATTRIBUTES_FILE")]
    pub attributes: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("client id and client secret are required")]
    MissingCredentials,
    #[error("the interval specified is not an integer")]
    IntervalNotInteger,
    #[error("the interval should be greater than zero")]
    IntervalNotPositive,
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    pub interval: Duration,
    pub listen_addr: SocketAddr,
    pub tls: Option<TlsPaths>,
    pub token_url: String,
    pub api_url: String,
    pub attributes: Option<PathBuf>,
}

/// Parse the poll interval in seconds. An empty value selects the default.
pub fn parse_interval(raw: &str) -> Result<u64, ConfigError> {
    if raw.is_empty() {
        return Ok(DEFAULT_INTERVAL_SECS);
    }
    let interval: i64 = raw.parse().map_err(|_| ConfigError::IntervalNotInteger)?;
    if interval <= 0 {
        return Err(ConfigError::IntervalNotPositive);
    }
    Ok(interval as u64)
}

/// True when clap stopped only to print help or version text.
pub fn is_info_request(err: &clap::Error) -> bool {
    matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Settings {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let (Some(client_id), Some(client_secret)) =
            (non_empty(args.client_id), non_empty(args.client_secret))
        else {
            return Err(ConfigError::MissingCredentials);
        };

        let interval = parse_interval(args.interval.as_deref().unwrap_or_default())?;

        let tls = match (args.cert_file, args.key_file) {
            (Some(cert_file), Some(key_file)) => Some(TlsPaths {
                cert_file,
                key_file,
            }),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!("both cert and key files are needed for TLS, serving plain HTTP");
                None
            }
            (None, None) => None,
        };

        Ok(Self {
            credentials: Credentials::new(client_id, client_secret),
            interval: Duration::from_secs(interval),
            listen_addr: args.listen_addr,
            tls,
            token_url: args.token_url,
            api_url: args.api_url,
            attributes: args.attributes,
        })
    }
}
