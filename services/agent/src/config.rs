//! Agent configuration loading.
//!
//! TOML is the config source, matching the teacher's
//! `forwarder::config` convention for an edge-deployed process; the token
//! itself lives in a separate file referenced by `token_file` rather than
//! inline in the TOML, so the config file can be committed or logged
//! without leaking the secret.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Validated agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub broker_url: String,
    pub control_path: String,
    pub token: String,
    pub target_url: String,
    pub request_timeout_s: u64,
    pub reconnect_base_s: u64,
    pub reconnect_max_s: u64,
    pub reconnect_factor_cap: u32,
    pub client_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    broker_url: Option<String>,
    control_path: Option<String>,
    token_file: Option<String>,
    target_url: Option<String>,
    request_timeout_s: Option<u64>,
    reconnect_base_s: Option<u64>,
    reconnect_max_s: Option<u64>,
    reconnect_factor_cap: Option<u32>,
    client_version: Option<String>,
}

/// Load agent config from a TOML file at `path`.
pub fn load_config_from_path(path: &Path) -> Result<AgentConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

/// Load agent config from the default path `/etc/tunely/agent.toml`.
pub fn load_config() -> Result<AgentConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/tunely/agent.toml"))
}

/// Load agent config from a TOML string, applying the documented defaults
/// from `SPEC_FULL.md` §10 for everything but `broker_url`, `token_file`,
/// and `target_url`, which are required.
pub fn load_config_from_str(toml_str: &str) -> Result<AgentConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let broker_url = raw.broker_url.ok_or_else(|| ConfigError::MissingField("broker_url".to_owned()))?;
    let target_url = raw.target_url.ok_or_else(|| ConfigError::MissingField("target_url".to_owned()))?;
    let token_file = raw.token_file.ok_or_else(|| ConfigError::MissingField("token_file".to_owned()))?;
    let token = read_token_file(&token_file)?;

    Ok(AgentConfig {
        broker_url,
        control_path: raw.control_path.unwrap_or_else(|| "/ws/tunnel".to_owned()),
        token,
        target_url,
        request_timeout_s: raw.request_timeout_s.unwrap_or(300),
        reconnect_base_s: raw.reconnect_base_s.unwrap_or(5),
        reconnect_max_s: raw.reconnect_max_s.unwrap_or(300),
        reconnect_factor_cap: raw.reconnect_factor_cap.unwrap_or(8),
        client_version: raw.client_version,
    })
}

fn read_token_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading token file '{path}': {e}")))?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue(format!("token file '{path}' is empty")));
    }
    Ok(trimmed.to_owned())
}
