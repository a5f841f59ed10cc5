use async_trait::async_trait;

/// Tunnel mode. `Tcp` is reserved for the out-of-scope raw-byte relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainMode {
    Http,
    Tcp,
}

/// A domain record as owned by the external administrative store. The core
/// only ever reads these through `DomainStore`; it never mutates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRecord {
    pub domain: String,
    pub token: String,
    pub enabled: bool,
    pub mode: DomainMode,
}

/// One completed forward, as handed to the external request-log sink.
#[derive(Debug, Clone)]
pub struct ForwardLogRecord {
    pub domain: String,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// The administrative/persistence surface the core depends on but does not
/// own. A real deployment backs this with a database and an admin API; this
/// crate only specifies the contract and ships an in-memory implementation
/// good enough to run the core end to end.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Look up a domain record by its bearer token, used exactly once per
    /// agent authentication attempt.
    async fn lookup_by_token(&self, token: &str) -> Option<DomainRecord>;

    /// Record one completed (or failed) forward. Best-effort: the core does
    /// not treat a failure to record as a forwarding error.
    async fn record_request(&self, record: ForwardLogRecord);
}
