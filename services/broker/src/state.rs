use std::sync::Arc;
use std::time::Duration;

use tunely_protocol::DomainStore;

use crate::config::BrokerConfig;
use crate::pending::PendingTable;
use crate::registry::DomainRegistry;
use crate::session::SessionLimits;

/// Shared application state, handed to every axum handler via `State`.
/// Cheap to clone: every field is itself an `Arc`/`Clone`-cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub registry: DomainRegistry,
    pub pending: PendingTable,
    pub store: Arc<dyn DomainStore>,
    pub config: Arc<BrokerConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn DomainStore>, config: BrokerConfig) -> Self {
        let pending = PendingTable::new(config.stream_queue_depth);
        AppState {
            registry: DomainRegistry::new(),
            pending,
            store,
            config: Arc::new(config),
        }
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            heartbeat_interval: Duration::from_secs(self.config.heartbeat_interval_s),
            auth_timeout: Duration::from_secs(self.config.auth_timeout_s),
            max_frame_bytes: self.config.max_frame_bytes,
        }
    }
}
