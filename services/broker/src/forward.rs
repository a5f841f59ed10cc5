//! Forward Dispatcher: the public-facing `Forward(domain, req) -> resp |
//! stream` operation. One task per public HTTP request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::info;
use tunely_protocol::{strip_hop_by_hop, DomainStore, ForwardLogRecord, Headers, Message, Request};

use crate::error::BrokerError;
use crate::pending::{Delivery, PendingTable, StreamFrame};
use crate::registry::DomainRegistry;

/// The public envelope, already stripped of transport concerns: this is the
/// shape `http::forward_handler` decodes the JSON body into.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub timeout: Option<u64>,
}

/// What `forward` resolves to for the public HTTP layer to render.
pub enum ForwardOutcome {
    Unary {
        status: u16,
        headers: Headers,
        body: Option<String>,
        duration_ms: u64,
    },
    Stream {
        status: u16,
        headers: Headers,
        chunks: tokio::sync::mpsc::Receiver<StreamFrame>,
    },
}

/// Run one forward: look up the domain's session, strip hop-by-hop headers,
/// dispatch a `REQUEST` frame, await the first reply, enforce the deadline,
/// and log exactly one record for the attempt. `default_timeout_s` is the
/// configured `request_timeout_s`, used when the envelope omits `timeout`.
pub async fn forward(
    domain: &str,
    req: ForwardRequest,
    registry: &DomainRegistry,
    pending: &PendingTable,
    store: &Arc<dyn DomainStore>,
    default_timeout_s: u64,
) -> Result<ForwardOutcome, BrokerError> {
    let started = Instant::now();
    let conn = registry
        .lookup(domain)
        .await
        .ok_or(BrokerError::DomainUnavailable)?;

    let mut headers = req.headers;
    strip_hop_by_hop(&mut headers);

    let (id, awaiter) = pending.create(&conn.tunnel_id).await;
    let deadline_s = req.timeout.unwrap_or(default_timeout_s);

    let frame = Message::Request(Request {
        id: id.clone(),
        method: req.method.clone(),
        path: req.path.clone(),
        headers,
        body: req.body,
        timeout: req.timeout,
        timestamp: None,
    });

    if conn.writer.send(frame).await.is_err() {
        pending.cancel(&id, BrokerError::SessionClosed).await;
        record(store, domain, &id, &req.method, &req.path, None, Some("session_closed"), started)
            .await;
        return Err(BrokerError::SessionClosed);
    }

    let outcome = match timeout(Duration::from_secs(deadline_s), awaiter).await {
        Ok(Ok(Ok(Delivery::Response(resp)))) => {
            record(
                store,
                domain,
                &id,
                &req.method,
                &req.path,
                Some(resp.status),
                resp.error.as_deref(),
                started,
            )
            .await;
            Ok(ForwardOutcome::Unary {
                status: resp.status,
                headers: resp.headers,
                body: resp.body,
                duration_ms: resp.duration_ms.unwrap_or_else(|| elapsed_ms(started)),
            })
        }
        Ok(Ok(Ok(Delivery::StreamStart { start, chunks }))) => {
            record(store, domain, &id, &req.method, &req.path, Some(start.status), None, started)
                .await;
            Ok(ForwardOutcome::Stream {
                status: start.status,
                headers: start.headers,
                chunks,
            })
        }
        Ok(Ok(Err(err))) => {
            record(
                store,
                domain,
                &id,
                &req.method,
                &req.path,
                None,
                Some(err.code()),
                started,
            )
            .await;
            Err(err)
        }
        Ok(Err(_)) => {
            // Awaiter dropped without a send: treat as session loss.
            record(store, domain, &id, &req.method, &req.path, None, Some("session_closed"), started)
                .await;
            Err(BrokerError::SessionClosed)
        }
        Err(_) => {
            pending.cancel(&id, BrokerError::RequestTimeout).await;
            record(
                store,
                domain,
                &id,
                &req.method,
                &req.path,
                None,
                Some("request_timeout"),
                started,
            )
            .await;
            Err(BrokerError::RequestTimeout)
        }
    };

    outcome
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

async fn record(
    store: &Arc<dyn DomainStore>,
    domain: &str,
    id: &str,
    method: &str,
    path: &str,
    status: Option<u16>,
    error: Option<&str>,
    started: Instant,
) {
    let duration_ms = elapsed_ms(started);
    info!(%domain, id, method, path, ?status, error, duration_ms, "forward completed");
    store
        .record_request(ForwardLogRecord {
            domain: domain.to_owned(),
            request_id: id.to_owned(),
            method: method.to_owned(),
            path: path.to_owned(),
            status,
            error: error.map(str::to_owned),
            duration_ms,
        })
        .await;
}
