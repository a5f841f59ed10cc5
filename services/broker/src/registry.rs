use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex, RwLock};
use tunely_protocol::{DomainRecord, Message};

use crate::error::BrokerError;

/// A bound agent connection, owned by the registry for the lifetime of the
/// control channel. `writer` is the single outbound queue into the
/// session's writer task; `close_tx` asynchronously signals the session to
/// tear down when it is preempted.
#[derive(Clone)]
pub struct ActiveConnection {
    pub tunnel_id: String,
    pub domain: String,
    pub writer: tokio::sync::mpsc::Sender<Message>,
    pub bound_at: Instant,
    pub heartbeat_deadline: Arc<Mutex<Instant>>,
    close_tx: watch::Sender<bool>,
}

impl ActiveConnection {
    /// A receiver the owning session task selects on to learn it has been
    /// preempted and should close.
    pub fn close_rx(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    fn signal_close(&self) {
        let _ = self.close_tx.send(true);
    }
}

/// Process-wide `domain -> ActiveConnection` map. Enforces at-most-one
/// active agent per domain.
#[derive(Clone, Default)]
pub struct DomainRegistry {
    connections: Arc<RwLock<HashMap<String, ActiveConnection>>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a freshly-authenticated agent to `record.domain`. If another
    /// connection already owns the domain: rejects with `AlreadyConnected`
    /// unless `force`, in which case the old connection is preempted
    /// (signaled to close) and replaced atomically under one write-lock
    /// acquisition — no observer can see two connections for the domain.
    pub async fn bind(
        &self,
        record: &DomainRecord,
        tunnel_id: String,
        writer: tokio::sync::mpsc::Sender<Message>,
        force: bool,
    ) -> Result<ActiveConnection, BrokerError> {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get(&record.domain) {
            if !force {
                return Err(BrokerError::AlreadyConnected);
            }
            existing.signal_close();
        }
        let (close_tx, _close_rx) = watch::channel(false);
        let conn = ActiveConnection {
            tunnel_id,
            domain: record.domain.clone(),
            writer,
            bound_at: Instant::now(),
            heartbeat_deadline: Arc::new(Mutex::new(Instant::now())),
            close_tx,
        };
        connections.insert(record.domain.clone(), conn.clone());
        Ok(conn)
    }

    pub async fn lookup(&self, domain: &str) -> Option<ActiveConnection> {
        self.connections.read().await.get(domain).cloned()
    }

    /// Remove the entry for `domain` only if it is still `conn` — a no-op if
    /// it has already been replaced by a preemptor. Idempotent.
    pub async fn unbind(&self, domain: &str, tunnel_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get(domain) {
            if existing.tunnel_id == tunnel_id {
                connections.remove(domain);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunely_protocol::DomainMode;

    fn record(domain: &str) -> DomainRecord {
        DomainRecord {
            domain: domain.to_owned(),
            token: "t".to_owned(),
            enabled: true,
            mode: DomainMode::Http,
        }
    }

    fn writer() -> tokio::sync::mpsc::Sender<Message> {
        tokio::sync::mpsc::channel(8).0
    }

    #[tokio::test]
    async fn bind_without_force_rejects_a_second_connection() {
        let registry = DomainRegistry::new();
        registry
            .bind(&record("demo"), "a".into(), writer(), false)
            .await
            .unwrap();
        let err = registry
            .bind(&record("demo"), "b".into(), writer(), false)
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::AlreadyConnected);
    }

    #[tokio::test]
    async fn bind_with_force_preempts_and_signals_the_old_connection_to_close() {
        let registry = DomainRegistry::new();
        let first = registry
            .bind(&record("demo"), "a".into(), writer(), false)
            .await
            .unwrap();
        let mut close_rx = first.close_rx();
        assert!(!*close_rx.borrow());

        let second = registry
            .bind(&record("demo"), "b".into(), writer(), true)
            .await
            .unwrap();

        close_rx.changed().await.unwrap();
        assert!(*close_rx.borrow());

        let current = registry.lookup("demo").await.unwrap();
        assert_eq!(current.tunnel_id, second.tunnel_id);
    }

    #[tokio::test]
    async fn unbind_is_a_no_op_if_the_entry_was_already_replaced() {
        let registry = DomainRegistry::new();
        let first = registry
            .bind(&record("demo"), "a".into(), writer(), false)
            .await
            .unwrap();
        registry
            .bind(&record("demo"), "b".into(), writer(), true)
            .await
            .unwrap();

        // The preempted session's own teardown calls unbind with its own id.
        registry.unbind("demo", &first.tunnel_id).await;
        let current = registry.lookup("demo").await.unwrap();
        assert_eq!(current.tunnel_id, "b");

        // Idempotent: calling it again changes nothing.
        registry.unbind("demo", &first.tunnel_id).await;
        assert!(registry.lookup("demo").await.is_some());
    }

    #[tokio::test]
    async fn lookup_on_unbound_domain_returns_none() {
        let registry = DomainRegistry::new();
        assert!(registry.lookup("nobody-home").await.is_none());
    }
}
