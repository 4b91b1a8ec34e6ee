use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants;

/// Infisical credential resolver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Infisical API base URL
    #[arg(short = 'u', long, env = "INFISICAL_API_URL", default_value = constants::INFISICAL_DEFAULT_API_URL)]
    pub api_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Maximum exchange attempts per auth method
    #[arg(long, env = "INFISICAL_AUTH_MAX_ATTEMPTS", default_value = "3")]
    pub max_attempts: u32,

    /// Per-request timeout in seconds
    #[arg(long, env = "INFISICAL_AUTH_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Cloud metadata probe timeout in milliseconds
    #[arg(long, env = "INFISICAL_AUTH_PROBE_TIMEOUT_MS", default_value = "1000")]
    pub probe_timeout_ms: u64,

    /// Session file path (defaults to ~/.infisical/session.json)
    #[arg(long, env = "INFISICAL_SESSION_FILE")]
    pub session_file: Option<String>,

    /// Keep the session in memory only
    #[arg(long, env = "INFISICAL_NO_SESSION_FILE", default_value = "false")]
    pub no_session_file: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Resolve credentials and establish a session (default)
    Login,
    /// Show the persisted session, if any
    Status,
    /// Discard the cached and persisted session
    Logout,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_url: String,

    // Exchange retry policy
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_total_wait: Duration,

    // Timeouts
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,

    // Session lifetime
    pub expiry_margin: chrono::Duration,
    pub service_token_ttl: chrono::Duration,

    // Cloud metadata endpoints
    pub gcp_metadata_url: String,
    pub azure_metadata_url: String,

    // Persistence
    pub session_file: Option<PathBuf>,

    // Logging
    pub log_level: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: constants::INFISICAL_DEFAULT_API_URL.to_string(),
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_total_wait: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_millis(1000),
            expiry_margin: chrono::Duration::seconds(60),
            service_token_ttl: chrono::Duration::hours(1),
            gcp_metadata_url: "http://metadata.google.internal".to_string(),
            azure_metadata_url: "http://169.254.169.254".to_string(),
            session_file: default_session_file(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone().unwrap_or(Command::Login);
        Ok((Self::from_args(args)?, command))
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let defaults = Config::default();

        let session_file = if args.no_session_file {
            None
        } else {
            args.session_file
                .map(|s| expand_tilde(&s))
                .or(defaults.session_file)
        };

        Ok(Config {
            api_url: args.api_url.trim_end_matches('/').to_string(),
            max_attempts: args.max_attempts,
            base_backoff: std::env::var("INFISICAL_AUTH_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_backoff),
            max_total_wait: std::env::var("INFISICAL_AUTH_MAX_TOTAL_WAIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_total_wait),
            connect_timeout: std::env::var("INFISICAL_AUTH_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
            probe_timeout: Duration::from_millis(args.probe_timeout_ms),
            expiry_margin: std::env::var("INFISICAL_AUTH_EXPIRY_MARGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(chrono::Duration::seconds)
                .unwrap_or(defaults.expiry_margin),
            service_token_ttl: defaults.service_token_ttl,
            gcp_metadata_url: std::env::var("INFISICAL_GCP_METADATA_URL")
                .unwrap_or(defaults.gcp_metadata_url),
            azure_metadata_url: std::env::var("INFISICAL_AZURE_METADATA_URL")
                .unwrap_or(defaults.azure_metadata_url),
            session_file,
            log_level: args.log_level,
            log_json: args.log_json,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max attempts must be at least 1");
        }

        reqwest::Url::parse(&self.api_url)
            .with_context(|| format!("Invalid API URL: {}", self.api_url))?;

        if self.expiry_margin < chrono::Duration::zero() {
            anyhow::bail!("expiry margin cannot be negative");
        }

        Ok(())
    }
}

/// Default session file under the CLI config folder
fn default_session_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(constants::CONFIG_FOLDER_NAME)
            .join(constants::SESSION_FILE_NAME)
    })
}

/// Expand tilde (~) in file paths to user's home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
