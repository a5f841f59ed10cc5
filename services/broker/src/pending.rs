use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tunely_protocol::{Response, StreamChunk, StreamEnd, StreamStart};
use uuid::Uuid;

use crate::error::BrokerError;

/// One chunk-stream frame, forwarded to the Dispatcher's stream consumer
/// after the initial `StreamStart` has settled the entry's kind.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Chunk(StreamChunk),
    End(StreamEnd),
}

/// What a pending entry resolves to: a single `RESPONSE`, or a stream whose
/// chunks arrive on a bounded channel after the `StreamStart` head.
pub enum Delivery {
    Response(Response),
    StreamStart {
        start: StreamStart,
        chunks: mpsc::Receiver<StreamFrame>,
    },
}

/// Outcome channel handed back from `create`: resolves once, to either a
/// completed `Delivery` or a `BrokerError` (cancellation, timeout, session
/// loss).
pub type Awaiter = oneshot::Receiver<Result<Delivery, BrokerError>>;

enum Slot {
    /// Waiting for the first inbound frame for this id.
    AwaitingFirstFrame(oneshot::Sender<Result<Delivery, BrokerError>>),
    /// `StreamStart` has already been delivered; further chunks go here.
    Streaming(mpsc::Sender<StreamFrame>),
}

struct Entry {
    owner_session: String,
    slot: Slot,
}

/// `request id -> waiter`, serialized under a single `RwLock` per the
/// shared-resource policy (short critical sections, no nested locks).
#[derive(Clone, Default)]
pub struct PendingTable {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    stream_queue_depth: usize,
}

impl PendingTable {
    pub fn new(stream_queue_depth: usize) -> Self {
        PendingTable {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stream_queue_depth,
        }
    }

    /// Allocate a fresh, collision-resistant request id and register a
    /// waiter for it, owned by `session`.
    pub async fn create(&self, session: &str) -> (String, Awaiter) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let entry = Entry {
            owner_session: session.to_owned(),
            slot: Slot::AwaitingFirstFrame(tx),
        };
        self.entries.write().await.insert(id.clone(), entry);
        (id, rx)
    }

    /// Deliver a unary `RESPONSE`. Silently does nothing if `id` is
    /// unknown. If the entry had already settled into `Streaming`, this is
    /// a protocol error: a session may not send `RESPONSE` after
    /// `STREAM_START`.
    pub async fn deliver_response(&self, id: &str, response: Response) {
        let entry = self.entries.write().await.remove(id);
        if let Some(entry) = entry {
            match entry.slot {
                Slot::AwaitingFirstFrame(tx) => {
                    let _ = tx.send(Ok(Delivery::Response(response)));
                }
                Slot::Streaming(_) => {
                    tracing::warn!(id, "RESPONSE received after STREAM_START; dropping");
                }
            }
        }
    }

    /// Deliver `STREAM_START`. Settles the entry's kind to streaming and
    /// hands the consumer a bounded channel for subsequent chunks.
    pub async fn deliver_stream_start(&self, id: &str, start: StreamStart) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(id) else {
            return;
        };
        match &entry.slot {
            Slot::AwaitingFirstFrame(_) => {
                let (chunk_tx, chunk_rx) = mpsc::channel(self.stream_queue_depth);
                let Slot::AwaitingFirstFrame(tx) =
                    std::mem::replace(&mut entry.slot, Slot::Streaming(chunk_tx))
                else {
                    unreachable!()
                };
                let _ = tx.send(Ok(Delivery::StreamStart {
                    start,
                    chunks: chunk_rx,
                }));
            }
            Slot::Streaming(_) => {
                tracing::warn!(id, "duplicate STREAM_START; dropping");
            }
        }
    }

    /// Deliver a `STREAM_CHUNK` or `STREAM_END` for an already-started
    /// stream. Drops and logs if `id` is unknown or hasn't seen `START`
    /// yet (the frame-prefix invariant). Sending blocks (providing
    /// back-pressure) if the bounded queue is full and the consumer isn't
    /// draining. `STREAM_END` removes the entry.
    pub async fn deliver_stream_frame(&self, id: &str, frame: StreamFrame) {
        let is_end = matches!(frame, StreamFrame::End(_));
        let sender = {
            let entries = self.entries.read().await;
            match entries.get(id) {
                Some(Entry {
                    slot: Slot::Streaming(tx),
                    ..
                }) => Some(tx.clone()),
                Some(Entry {
                    slot: Slot::AwaitingFirstFrame(_),
                    ..
                }) => {
                    tracing::warn!(id, "stream frame before STREAM_START; dropping");
                    None
                }
                None => None,
            }
        };
        if let Some(sender) = sender {
            let _ = sender.send(frame).await;
        }
        if is_end {
            self.entries.write().await.remove(id);
        }
    }

    /// Remove the entry and fail its waiter with `reason`. A no-op if the
    /// entry has already completed (idempotent).
    pub async fn cancel(&self, id: &str, reason: BrokerError) {
        let entry = self.entries.write().await.remove(id);
        if let Some(Entry {
            slot: Slot::AwaitingFirstFrame(tx),
            ..
        }) = entry
        {
            let _ = tx.send(Err(reason));
        }
        // A `Streaming` slot's sender simply drops here; the consumer sees
        // the channel close and treats it as a terminal (cancelled) state.
    }

    /// Fail every entry owned by `session` with `reason`, used on session
    /// termination (teardown or preemption).
    pub async fn fail_all_owned_by(&self, session: &str, reason: BrokerError) {
        let mut entries = self.entries.write().await;
        let ids: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.owner_session == session)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(entry) = entries.remove(&id) {
                if let Slot::AwaitingFirstFrame(tx) = entry.slot {
                    let _ = tx.send(Err(reason));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunely_protocol::Headers;

    fn response(id: &str) -> Response {
        Response {
            id: id.to_owned(),
            status: 200,
            headers: Headers::new(),
            body: Some("ok".to_owned()),
            error: None,
            duration_ms: Some(1),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn deliver_response_resolves_the_awaiter() {
        let table = PendingTable::new(16);
        let (id, rx) = table.create("s1").await;
        table.deliver_response(&id, response(&id)).await;
        match rx.await.unwrap().unwrap() {
            Delivery::Response(r) => assert_eq!(r.status, 200),
            _ => panic!("expected unary response"),
        }
    }

    #[tokio::test]
    async fn unknown_id_delivery_is_silently_dropped() {
        let table = PendingTable::new(16);
        table.deliver_response("no-such-id", response("no-such-id")).await;
    }

    #[tokio::test]
    async fn stream_start_then_chunks_then_end_in_order() {
        let table = PendingTable::new(16);
        let (id, rx) = table.create("s1").await;
        table
            .deliver_stream_start(
                &id,
                StreamStart {
                    id: id.clone(),
                    status: 200,
                    headers: Headers::new(),
                    timestamp: None,
                },
            )
            .await;
        let mut chunks = match rx.await.unwrap().unwrap() {
            Delivery::StreamStart { chunks, .. } => chunks,
            _ => panic!("expected stream start"),
        };
        table
            .deliver_stream_frame(
                &id,
                StreamFrame::Chunk(StreamChunk {
                    id: id.clone(),
                    data: "a".into(),
                    sequence: Some(0),
                    timestamp: None,
                }),
            )
            .await;
        table
            .deliver_stream_frame(
                &id,
                StreamFrame::End(StreamEnd {
                    id: id.clone(),
                    error: None,
                    duration_ms: Some(1),
                    total_chunks: Some(1),
                    timestamp: None,
                }),
            )
            .await;

        match chunks.recv().await.unwrap() {
            StreamFrame::Chunk(c) => assert_eq!(c.sequence, Some(0)),
            StreamFrame::End(_) => panic!("expected chunk first"),
        }
        match chunks.recv().await.unwrap() {
            StreamFrame::End(_) => {}
            StreamFrame::Chunk(_) => panic!("expected end second"),
        }
    }

    #[tokio::test]
    async fn cancel_fails_the_waiter_and_is_a_no_op_afterward() {
        let table = PendingTable::new(16);
        let (id, rx) = table.create("s1").await;
        table.cancel(&id, BrokerError::RequestTimeout).await;
        assert_eq!(rx.await.unwrap().unwrap_err(), BrokerError::RequestTimeout);

        // Cancel on a completed (already-removed) entry is a no-op.
        table.cancel(&id, BrokerError::RequestTimeout).await;
    }

    #[tokio::test]
    async fn fail_all_owned_by_only_affects_the_matching_session() {
        let table = PendingTable::new(16);
        let (id_a, rx_a) = table.create("session-a").await;
        let (id_b, rx_b) = table.create("session-b").await;
        let _ = id_b;

        table.fail_all_owned_by("session-a", BrokerError::SessionClosed).await;

        assert_eq!(rx_a.await.unwrap().unwrap_err(), BrokerError::SessionClosed);
        table.deliver_response(&id_a, response(&id_a)).await; // already gone, no panic

        table.deliver_response(&id_a, response("ignored")).await;
        assert!(!rx_b.is_terminated());
    }
}
