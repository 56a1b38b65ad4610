use clap::Parser;
use lib_survey::utils::mask_url_password;
use lib_survey::{ConnectOptions, Durability, ServiceSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "server_survey.conf";

pub const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:3000", "http://localhost:5173"];
pub const DEFAULT_CORS_PREVIEW_PATTERN: &str = r"^https://[a-z0-9-]+\.vercel\.app$";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no document store connection string: set MONGODB_URI or pass --mongodb-uri")]
    MissingConnectionString,
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

fn positive_secs(
    value: Option<u64>,
    default: Duration,
    name: &'static str,
) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::ZeroInterval(name)),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Survey submission server backed by a document store", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PORT", help = "Port to listen on for HTTP requests.")]
    pub port: Option<u16>,

    #[clap(long, env = "SURVEY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SURVEY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SURVEY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error). RUST_LOG takes precedence.")]
    pub log_level: Option<String>,

    #[clap(long, env = "MONGODB_URI", help = "Document store connection string.")]
    pub mongodb_uri: Option<String>,

    #[clap(long, env = "MONGODB_DATABASE", help = "Database that holds the surveys collection.")]
    pub database: Option<String>,

    #[clap(long, env = "SURVEY_SERVER_SELECTION_TIMEOUT_MS", help = "Milliseconds to wait for a usable server before an operation fails.")]
    pub server_selection_timeout_ms: Option<u64>,

    #[clap(long, env = "SURVEY_SOCKET_TIMEOUT_MS", help = "Milliseconds allowed for a single store round trip.")]
    pub socket_timeout_ms: Option<u64>,

    #[clap(long, env = "SURVEY_CONNECT_TIMEOUT_MS", help = "Milliseconds allowed for opening a store connection.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "SURVEY_MAX_POOL_SIZE", help = "Maximum number of pooled store connections.")]
    pub max_pool_size: Option<u32>,

    #[clap(long, env = "SURVEY_RECONNECT_DELAY_MS", help = "Fixed delay in milliseconds between reconnection attempts.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "SURVEY_WRITE_MAX_RETRIES", help = "Total attempts per survey write.")]
    pub write_max_retries: Option<u32>,

    #[clap(long, env = "SURVEY_WRITE_RETRY_DELAY_MS", help = "Fixed delay in milliseconds between write attempts.")]
    pub write_retry_delay_ms: Option<u64>,

    #[clap(long, env = "SURVEY_WRITE_TIMEOUT_MS", help = "Milliseconds to wait for a majority acknowledgment of a write.")]
    pub write_timeout_ms: Option<u64>,

    #[clap(long, env = "SURVEY_WARMUP_INTERVAL_SECS", help = "Seconds between warm-up probes of the store.")]
    pub warmup_interval_secs: Option<u64>,

    #[clap(long, env = "SURVEY_PING_INTERVAL_SECS", help = "Seconds between keep-alive pings of the public address.")]
    pub ping_interval_secs: Option<u64>,

    #[clap(long, env = "SURVEY_SELF_PING_URL", help = "Public address of this service. Enables the keep-alive pinger.")]
    pub self_ping_url: Option<String>,

    #[clap(long, env = "SURVEY_CORS_ORIGINS", value_delimiter = ',', help = "Comma separated list of allowed browser origins.")]
    pub cors_origins: Option<Vec<String>>,

    #[clap(long, env = "SURVEY_CORS_PREVIEW_PATTERN", help = "Regular expression matching allowed preview-deployment origins.")]
    pub cors_preview_pattern: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            mongodb_uri: other.mongodb_uri.or(self.mongodb_uri),
            database: other.database.or(self.database),
            server_selection_timeout_ms: other.server_selection_timeout_ms.or(self.server_selection_timeout_ms),
            socket_timeout_ms: other.socket_timeout_ms.or(self.socket_timeout_ms),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            max_pool_size: other.max_pool_size.or(self.max_pool_size),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            write_max_retries: other.write_max_retries.or(self.write_max_retries),
            write_retry_delay_ms: other.write_retry_delay_ms.or(self.write_retry_delay_ms),
            write_timeout_ms: other.write_timeout_ms.or(self.write_timeout_ms),
            warmup_interval_secs: other.warmup_interval_secs.or(self.warmup_interval_secs),
            ping_interval_secs: other.ping_interval_secs.or(self.ping_interval_secs),
            self_ping_url: other.self_ping_url.or(self.self_ping_url),
            cors_origins: other.cors_origins.or(self.cors_origins),
            cors_preview_pattern: other.cors_preview_pattern.or(self.cors_preview_pattern),
        }
    }

    /// Built-in defaults. Every field except the connection string has one.
    pub fn defaults() -> Config {
        let connect = ConnectOptions::default();
        let service = ServiceSettings::default();
        Config {
            port: Some(3001),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            database: Some(connect.database),
            server_selection_timeout_ms: Some(millis(connect.server_selection_timeout)),
            socket_timeout_ms: Some(millis(connect.socket_timeout)),
            connect_timeout_ms: Some(millis(connect.connect_timeout)),
            max_pool_size: Some(connect.max_pool_size),
            reconnect_delay_ms: Some(millis(service.reconnect_delay)),
            write_max_retries: Some(service.write_max_retries),
            write_retry_delay_ms: Some(millis(service.write_retry_delay)),
            write_timeout_ms: Some(millis(service.durability.timeout)),
            warmup_interval_secs: Some(service.warmup_interval.as_secs()),
            ping_interval_secs: Some(service.ping_interval.as_secs()),
            cors_origins: Some(DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect()),
            cors_preview_pattern: Some(DEFAULT_CORS_PREVIEW_PATTERN.to_string()),
            ..Default::default()
        }
    }

    /// Converts the merged configuration into the write service's settings.
    pub fn service_settings(&self) -> Result<ServiceSettings, ConfigError> {
        let target = self
            .mongodb_uri
            .as_ref()
            .filter(|uri| !uri.trim().is_empty())
            .ok_or(ConfigError::MissingConnectionString)?
            .clone();

        let defaults = ServiceSettings::default();
        let connect_defaults = ConnectOptions::default();
        let connect = ConnectOptions {
            server_selection_timeout: self
                .server_selection_timeout_ms
                .map_or(connect_defaults.server_selection_timeout, Duration::from_millis),
            socket_timeout: self
                .socket_timeout_ms
                .map_or(connect_defaults.socket_timeout, Duration::from_millis),
            connect_timeout: self
                .connect_timeout_ms
                .map_or(connect_defaults.connect_timeout, Duration::from_millis),
            max_pool_size: self.max_pool_size.unwrap_or(connect_defaults.max_pool_size),
            database: self.database.clone().unwrap_or(connect_defaults.database),
        };

        Ok(ServiceSettings {
            target,
            connect,
            reconnect_delay: self
                .reconnect_delay_ms
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            write_max_retries: self.write_max_retries.unwrap_or(defaults.write_max_retries),
            write_retry_delay: self
                .write_retry_delay_ms
                .map_or(defaults.write_retry_delay, Duration::from_millis),
            durability: Durability {
                majority: true,
                timeout: self
                    .write_timeout_ms
                    .map_or(defaults.durability.timeout, Duration::from_millis),
            },
            warmup_interval: positive_secs(
                self.warmup_interval_secs,
                defaults.warmup_interval,
                "warmup interval",
            )?,
            ping_interval: positive_secs(
                self.ping_interval_secs,
                defaults.ping_interval,
                "ping interval",
            )?,
            self_ping_url: self
                .self_ping_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
        })
    }

    /// One-line summary for the startup log. The connection string is masked.
    pub fn summary(&self) -> String {
        format!(
            "port={:?} store={} database={:?} writeMaxRetries={:?} writeRetryDelayMs={:?} reconnectDelayMs={:?} selfPingUrl={:?}",
            self.port,
            self.mongodb_uri
                .as_deref()
                .map_or_else(|| "<unset>".to_string(), mask_url_password),
            self.database,
            self.write_max_retries,
            self.write_retry_delay_ms,
            self.reconnect_delay_ms,
            self.self_ping_url,
        )
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Where the merged configuration came from, for logging once the
/// subscriber is installed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Unreadable(PathBuf, String),
}

pub fn load_config() -> (Config, ConfigSource) {
    load_config_from(Config::parse())
}

/// Layers defaults, the JSON config file and the already parsed CLI/env
/// values, in that order.
pub fn load_config_from(cli: Config) -> (Config, ConfigSource) {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Load from config file (server_survey.conf) if present.
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let source = if config_file_path.exists() {
        match fs::read_to_string(&config_file_path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<Config>(&s).map_err(|e| e.to_string()))
        {
            Ok(file_config) => {
                current_config = current_config.merge(file_config);
                ConfigSource::File(config_file_path)
            }
            Err(e) => ConfigSource::Unreadable(config_file_path, e),
        }
    } else {
        ConfigSource::Missing(config_file_path)
    };

    // 3. Environment variables and CLI arguments override the file.
    (current_config.merge(cli), source)
}
