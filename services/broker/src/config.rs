use std::env;
use std::fmt;

/// Validated broker configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bind_addr: String,
    pub control_path: String,
    pub heartbeat_interval_s: u64,
    pub auth_timeout_s: u64,
    pub request_timeout_s: u64,
    pub max_frame_bytes: usize,
    pub stream_queue_depth: usize,
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            bind_addr: "0.0.0.0:8080".to_owned(),
            control_path: "/ws/tunnel".to_owned(),
            heartbeat_interval_s: 30,
            auth_timeout_s: 10,
            request_timeout_s: 300,
            max_frame_bytes: 8 * 1024 * 1024,
            stream_queue_depth: 128,
            log_level: "info".to_owned(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for `{field}`: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            field: name,
            reason: format!("`{raw}` is not valid"),
        }),
    }
}

/// Load configuration from process environment variables, matching the
/// option set and defaults from the external interface section.
pub fn load_config() -> Result<BrokerConfig, ConfigError> {
    let defaults = BrokerConfig::default();
    Ok(BrokerConfig {
        bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        control_path: env::var("CONTROL_PATH").unwrap_or(defaults.control_path),
        heartbeat_interval_s: parse_env("HEARTBEAT_INTERVAL_S", defaults.heartbeat_interval_s)?,
        auth_timeout_s: parse_env("AUTH_TIMEOUT_S", defaults.auth_timeout_s)?,
        request_timeout_s: parse_env("REQUEST_TIMEOUT_S", defaults.request_timeout_s)?,
        max_frame_bytes: parse_env("MAX_FRAME_BYTES", defaults.max_frame_bytes)?,
        stream_queue_depth: parse_env("STREAM_QUEUE_DEPTH", defaults.stream_queue_depth)?,
        log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
    })
}
