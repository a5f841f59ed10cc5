//! Agent Session: the broker-side state machine for one accepted control
//! channel. Mirrors the shape of `server::ws_forwarder::handle_forwarder_socket`
//! but is split into the four states the spec names explicitly, since a
//! session here lives much longer and juggles more concurrent producers
//! (Dispatcher, Heartbeater, Reader's PONG-replier) onto the single outbound
//! channel than the teacher's forwarder socket ever does.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsFrame, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{info, warn};
use tunely_protocol::{codec, Auth, AuthError, AuthOk, DecodedFrame, DomainStore, Message, Ping, Pong};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::pending::{PendingTable, StreamFrame};
use crate::registry::{ActiveConnection, DomainRegistry};

/// Session-scoped tunables threaded down from `BrokerConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub heartbeat_interval: Duration,
    pub auth_timeout: Duration,
    pub max_frame_bytes: usize,
}

/// `K` from §4.4 ("heartbeat_interval * K, K≈2.5"), expressed as a ratio so
/// we stay in integer `Duration` arithmetic.
const HEARTBEAT_TIMEOUT_NUM: u32 = 5;
const HEARTBEAT_TIMEOUT_DEN: u32 = 2;

/// Drive one accepted control channel end to end: `AwaitingAuth ->
/// Authenticated -> Closing -> Closed`. Returns once the channel is fully
/// torn down; never panics on a misbehaving peer.
pub async fn run_agent_session(
    socket: WebSocket,
    store: Arc<dyn DomainStore>,
    registry: DomainRegistry,
    pending: PendingTable,
    limits: SessionLimits,
) {
    let (sink, mut stream) = socket.split();

    // Single-writer task: every outbound frame — AUTH_OK/AUTH_ERROR,
    // Dispatcher's REQUESTs, the Heartbeater's PINGs, and the Reader's PONG
    // replies — funnels through this one mpsc queue, guaranteeing frames are
    // never interleaved mid-message on the underlying socket.
    let (writer_tx, writer_rx) = mpsc::channel::<Message>(64);
    let writer_task = tokio::spawn(run_writer(sink, writer_rx));

    let authenticated = match await_auth(&mut stream, &store, &registry, &limits, &writer_tx).await
    {
        Ok(authenticated) => authenticated,
        Err(()) => {
            drop(writer_tx);
            let _ = writer_task.await;
            return;
        }
    };
    let (domain, tunnel_id, conn) = authenticated;

    info!(%domain, %tunnel_id, "agent session authenticated");
    let _ = writer_tx
        .send(Message::AuthOk(AuthOk {
            domain: domain.clone(),
            tunnel_id: tunnel_id.clone(),
            server_version: Some(env!("CARGO_PKG_VERSION").to_owned()),
        }))
        .await;

    let mut close_rx = conn.close_rx();
    let heartbeat_deadline = conn.heartbeat_deadline.clone();
    reset_heartbeat_deadline(&heartbeat_deadline, limits.heartbeat_interval).await;

    let mut heartbeat_tick = tokio::time::interval(limits.heartbeat_interval);
    heartbeat_tick.tick().await; // first tick fires immediately; skip it

    let close_reason = loop {
        tokio::select! {
            biased;

            _ = close_rx.changed() => {
                break BrokerError::SessionClosed; // preempted by a forcing AUTH
            }

            _ = heartbeat_tick.tick() => {
                if Instant::now() > *heartbeat_deadline.lock().await {
                    break BrokerError::HeartbeatTimeout;
                }
                if writer_tx.send(Message::Ping(Ping { timestamp: None })).await.is_err() {
                    break BrokerError::TransportError;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsFrame::Text(text))) => {
                        match codec::decode(&text, limits.max_frame_bytes) {
                            Ok(DecodedFrame::Known(msg)) => {
                                if let Err(reason) = route_inbound(
                                    msg,
                                    &writer_tx,
                                    &pending,
                                    &heartbeat_deadline,
                                    limits.heartbeat_interval,
                                ).await {
                                    break reason;
                                }
                            }
                            Ok(DecodedFrame::Unknown(tag)) => {
                                warn!(%domain, tag, "dropping frame with unknown type");
                            }
                            Err(err) => {
                                warn!(%domain, %err, "protocol error decoding inbound frame");
                                break BrokerError::ProtocolError;
                            }
                        }
                    }
                    Some(Ok(WsFrame::Close(_))) | None => break BrokerError::TransportError,
                    Some(Ok(_)) => {} // binary/ping/pong frames: axum answers WS-level pings itself
                    Some(Err(_)) => break BrokerError::TransportError,
                }
            }
        }
    };

    // Closing. Whatever actually killed the session (heartbeat timeout,
    // preemption, transport/protocol error), every pending entry it still
    // owns observes plain entry loss: `session_closed`, per the error table
    // in `SPEC_FULL.md` §7 and the heartbeat-timeout scenario in §8.
    registry.unbind(&domain, &tunnel_id).await;
    pending.fail_all_owned_by(&tunnel_id, BrokerError::SessionClosed).await;
    drop(conn);
    drop(writer_tx);
    let _ = writer_task.await;
    info!(%domain, %tunnel_id, reason = close_reason.code(), "agent session closed");
}

async fn reset_heartbeat_deadline(deadline: &Arc<Mutex<Instant>>, interval: Duration) {
    *deadline.lock().await = Instant::now() + interval * HEARTBEAT_TIMEOUT_NUM / HEARTBEAT_TIMEOUT_DEN;
}

type Sink = futures_util::stream::SplitSink<WebSocket, WsFrame>;
type Stream = futures_util::stream::SplitStream<WebSocket>;

/// The session's single outbound pump: serializes every queued `Message` and
/// writes it to the socket, in order, one writer only.
async fn run_writer(mut sink: Sink, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let Ok(text) = codec::encode(&msg) else {
            continue;
        };
        if sink.send(WsFrame::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// `AwaitingAuth`: accept exactly one frame within `auth_timeout`, which must
/// be `AUTH`. Resolves the registry bind and returns the new
/// `ActiveConnection` plus identifying fields, or sends `AUTH_ERROR` through
/// the writer and returns `Err(())` on any failure.
async fn await_auth(
    stream: &mut Stream,
    store: &Arc<dyn DomainStore>,
    registry: &DomainRegistry,
    limits: &SessionLimits,
    writer_tx: &mpsc::Sender<Message>,
) -> Result<(String, String, ActiveConnection), ()> {
    let first = timeout(limits.auth_timeout, stream.next()).await;
    let auth: Auth = match first {
        Ok(Some(Ok(WsFrame::Text(text)))) => match codec::decode(&text, limits.max_frame_bytes) {
            Ok(DecodedFrame::Known(Message::Auth(auth))) => auth,
            _ => {
                send_auth_error(writer_tx, "protocol_error", "expected AUTH as the first frame").await;
                return Err(());
            }
        },
        Ok(Some(Ok(_))) | Ok(Some(Err(_))) | Ok(None) => {
            send_auth_error(writer_tx, "protocol_error", "connection closed before AUTH").await;
            return Err(());
        }
        Err(_) => {
            send_auth_error(writer_tx, "auth_timeout", "no AUTH frame within the auth timeout").await;
            return Err(());
        }
    };

    let Some(record) = store.lookup_by_token(&auth.token).await else {
        send_auth_error(writer_tx, "auth_failed", "unknown token").await;
        return Err(());
    };
    if !record.enabled {
        send_auth_error(writer_tx, "tunnel_disabled", "tunnel is disabled").await;
        return Err(());
    }

    let tunnel_id = Uuid::new_v4().to_string();
    match registry
        .bind(&record, tunnel_id.clone(), writer_tx.clone(), auth.force.unwrap_or(false))
        .await
    {
        Ok(conn) => Ok((record.domain, tunnel_id, conn)),
        Err(err) => {
            send_auth_error(writer_tx, err.code(), "domain already has an active connection").await;
            Err(())
        }
    }
}

async fn send_auth_error(writer_tx: &mpsc::Sender<Message>, code: &str, message: &str) {
    let _ = writer_tx
        .send(Message::AuthError(AuthError {
            error: message.to_owned(),
            code: Some(code.to_owned()),
        }))
        .await;
}

/// Reader-side demultiplexing for one inbound frame while `Authenticated`.
async fn route_inbound(
    msg: Message,
    writer_tx: &mpsc::Sender<Message>,
    pending: &PendingTable,
    heartbeat_deadline: &Arc<Mutex<Instant>>,
    heartbeat_interval: Duration,
) -> Result<(), BrokerError> {
    match msg {
        Message::Pong(_) => {
            reset_heartbeat_deadline(heartbeat_deadline, heartbeat_interval).await;
        }
        Message::Ping(ping) => {
            reset_heartbeat_deadline(heartbeat_deadline, heartbeat_interval).await;
            let _ = writer_tx.send(Message::Pong(Pong { timestamp: ping.timestamp })).await;
        }
        Message::Response(resp) => pending.deliver_response(&resp.id, resp).await,
        Message::StreamStart(start) => pending.deliver_stream_start(&start.id, start).await,
        Message::StreamChunk(chunk) => {
            pending.deliver_stream_frame(&chunk.id, StreamFrame::Chunk(chunk)).await;
        }
        Message::StreamEnd(end) => {
            pending.deliver_stream_frame(&end.id, StreamFrame::End(end)).await;
        }
        Message::Auth(_) | Message::AuthOk(_) | Message::AuthError(_) | Message::Request(_) => {
            return Err(BrokerError::ProtocolError);
        }
    }
    Ok(())
}
