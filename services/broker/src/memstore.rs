//! An in-memory `DomainStore`. The real administrative CRUD surface and its
//! durable backing are out of scope (spec §1); this is enough to run the
//! core end to end and to back the integration tests in `tests/`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tunely_protocol::{DomainRecord, DomainStore, ForwardLogRecord};

#[derive(Default)]
pub struct InMemoryDomainStore {
    records_by_token: RwLock<HashMap<String, DomainRecord>>,
}

impl InMemoryDomainStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a domain record. Used by `main` to wire a fixed set of domains
    /// from configuration, and by tests to set up fixtures.
    pub async fn insert(&self, record: DomainRecord) {
        self.records_by_token.write().await.insert(record.token.clone(), record);
    }
}

#[async_trait::async_trait]
impl DomainStore for InMemoryDomainStore {
    async fn lookup_by_token(&self, token: &str) -> Option<DomainRecord> {
        self.records_by_token.read().await.get(token).cloned()
    }

    async fn record_request(&self, record: ForwardLogRecord) {
        tracing::info!(
            domain = %record.domain,
            id = %record.request_id,
            method = %record.method,
            path = %record.path,
            status = ?record.status,
            error = ?record.error,
            duration_ms = record.duration_ms,
            "request log"
        );
    }
}
