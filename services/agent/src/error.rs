use std::fmt;

/// Errors from the uplink connect loop and the control-channel handshake.
/// Named by meaning, matching the teacher's `UplinkError` shape.
#[derive(Debug)]
pub enum AgentError {
    Connect(String),
    Ws(String),
    Protocol(String),
    Serialization(String),
    Disconnected,
    /// `AUTH_ERROR` from the broker, carrying its `code` when present. A
    /// permanent code (`auth_failed`, `tunnel_disabled`) ends the connect
    /// loop outright; anything else is treated as transient.
    AuthRejected { code: Option<String>, message: String },
}

impl AgentError {
    /// Permanent auth rejections should make the process exit rather than
    /// retry forever against credentials that will never work.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AgentError::AuthRejected { code: Some(code), .. }
                if code == "auth_failed" || code == "tunnel_disabled"
        )
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Connect(s) => write!(f, "connection error: {s}"),
            AgentError::Ws(s) => write!(f, "websocket error: {s}"),
            AgentError::Protocol(s) => write!(f, "protocol error: {s}"),
            AgentError::Serialization(s) => write!(f, "serialization error: {s}"),
            AgentError::Disconnected => write!(f, "control channel disconnected"),
            AgentError::AuthRejected { code, message } => {
                write!(f, "auth rejected ({}): {message}", code.as_deref().unwrap_or("unknown"))
            }
        }
    }
}

impl std::error::Error for AgentError {}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
