use std::fmt;

/// Semantic error kinds from the error handling design table. Named by
/// meaning, not by the Rust type that happened to produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    AuthFailed,
    TunnelDisabled,
    AlreadyConnected,
    HeartbeatTimeout,
    ProtocolError,
    TransportError,
    RequestTimeout,
    TargetUnavailable,
    SessionClosed,
    DomainUnavailable,
}

impl BrokerError {
    /// The `AUTH_ERROR.code` / log-record code for this error kind.
    pub fn code(self) -> &'static str {
        match self {
            BrokerError::AuthFailed => "auth_failed",
            BrokerError::TunnelDisabled => "tunnel_disabled",
            BrokerError::AlreadyConnected => "already_connected",
            BrokerError::HeartbeatTimeout => "heartbeat_timeout",
            BrokerError::ProtocolError => "protocol_error",
            BrokerError::TransportError => "transport_error",
            BrokerError::RequestTimeout => "request_timeout",
            BrokerError::TargetUnavailable => "target_unavailable",
            BrokerError::SessionClosed => "session_closed",
            BrokerError::DomainUnavailable => "domain_unavailable",
        }
    }

    /// The HTTP status a public client sees for this error, where applicable.
    pub fn http_status(self) -> u16 {
        match self {
            BrokerError::DomainUnavailable => 502,
            BrokerError::RequestTimeout => 504,
            BrokerError::TargetUnavailable => 503,
            BrokerError::SessionClosed => 502,
            _ => 500,
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::error::Error for BrokerError {}
