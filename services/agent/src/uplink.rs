//! Connect loop: dials the broker, performs the `AUTH` handshake, then runs
//! one session (reader + heartbeat-pong-replier + per-request executor
//! tasks) until the channel drops, reconnecting with exponential backoff.
//! Shaped after the teacher's `forwarder::uplink::UplinkSession`, generalized
//! from the race-timing hello/ack handshake to Tunely's `AUTH`/`AUTH_OK`
//! control-channel handshake.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsFrame;
use tracing::{info, warn};
use tunely_protocol::{codec, Auth, DecodedFrame, Message, Pong};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::executor;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// An authenticated control channel, ready to run its reader/writer pumps.
struct UplinkSession {
    ws: WsStream,
}

impl UplinkSession {
    async fn connect(cfg: &AgentConfig, force: bool) -> Result<(Self, String, String), AgentError> {
        let url = format!("{}{}", cfg.broker_url, cfg.control_path);
        let (ws, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| AgentError::Connect(e.to_string()))?;
        let mut session = UplinkSession { ws };

        session
            .send(&Message::Auth(Auth {
                token: cfg.token.clone(),
                client_version: cfg.client_version.clone(),
                force: Some(force),
            }))
            .await?;

        match session.recv().await? {
            Message::AuthOk(ok) => Ok((session, ok.domain, ok.tunnel_id)),
            Message::AuthError(err) => Err(AgentError::AuthRejected { code: err.code, message: err.error }),
            other => Err(AgentError::Protocol(format!("expected AUTH_OK or AUTH_ERROR, got {other:?}"))),
        }
    }

    async fn send(&mut self, msg: &Message) -> Result<(), AgentError> {
        let text = codec::encode(msg).map_err(|e| AgentError::Serialization(e.to_string()))?;
        self.ws
            .send(WsFrame::Text(text.into()))
            .await
            .map_err(|e| AgentError::Ws(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Message, AgentError> {
        loop {
            match self.ws.next().await {
                None => return Err(AgentError::Disconnected),
                Some(Err(e)) => return Err(AgentError::Ws(e.to_string())),
                Some(Ok(WsFrame::Text(text))) => match codec::decode(&text, usize::MAX) {
                    Ok(DecodedFrame::Known(msg)) => return Ok(msg),
                    Ok(DecodedFrame::Unknown(tag)) => {
                        warn!(tag, "dropping frame with unknown type");
                        continue;
                    }
                    Err(e) => return Err(AgentError::Protocol(e.to_string())),
                },
                Some(Ok(WsFrame::Close(_))) => return Err(AgentError::Disconnected),
                Some(Ok(WsFrame::Ping(data))) => {
                    let _ = self.ws.send(WsFrame::Pong(data)).await;
                    continue;
                }
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// `factor = 2^min(attempts, cap)`, i.e. the doubling sequence from
/// `spec.md` §4.6 capped at `2^reconnect_factor_cap` (2⁸ = 256 at the
/// documented default).
fn backoff_factor(attempts: u32, cap: u32) -> u64 {
    1u64 << attempts.min(cap)
}

/// Base delay before jitter, given the combined reconnect/reject attempt
/// count. Exposed separately from jitter application so tests can assert
/// monotonicity and the ceiling deterministically.
fn backoff_delay(base_s: u64, max_s: u64, cap: u32, attempts: u32) -> Duration {
    let factor = backoff_factor(attempts, cap);
    Duration::from_secs(base_s.saturating_mul(factor).min(max_s))
}

fn with_jitter(delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
    let secs = (delay.as_secs_f64() * (1.0 + jitter)).max(0.0);
    Duration::from_secs_f64(secs)
}

/// Run the agent forever: connect, run one session, reconnect with backoff.
/// Returns only when a permanent auth rejection ends the process (the
/// caller should exit).
pub async fn run(cfg: AgentConfig) -> AgentError {
    let client = reqwest::Client::new();
    let mut attempts: u32 = 0;
    let mut force = false;

    loop {
        match UplinkSession::connect(&cfg, force).await {
            Ok((session, domain, tunnel_id)) => {
                info!(%domain, %tunnel_id, "connected to broker");
                attempts = 0;
                force = false;
                run_session(session, &cfg, &client).await;
                warn!(%domain, "control channel lost; reconnecting");
            }
            Err(err) if err.is_permanent() => {
                warn!(%err, "permanent auth rejection; exiting");
                return err;
            }
            Err(AgentError::AuthRejected { code, message }) => {
                warn!(code = ?code, %message, "auth rejected");
                if code.as_deref() == Some("already_connected") {
                    force = true;
                }
                attempts += 1;
            }
            Err(err) => {
                warn!(%err, "failed to connect to broker");
                attempts += 1;
            }
        }

        let delay = with_jitter(backoff_delay(
            cfg.reconnect_base_s,
            cfg.reconnect_max_s,
            cfg.reconnect_factor_cap,
            attempts,
        ));
        tokio::time::sleep(delay).await;
    }
}

/// Drive one authenticated session: a single-writer outbound task plus a
/// reader loop that answers `PING` with `PONG` and spawns one executor task
/// per inbound `REQUEST`. Returns once the channel drops.
async fn run_session(session: UplinkSession, cfg: &AgentConfig, client: &reqwest::Client) {
    let UplinkSession { ws } = session;
    let (mut sink, mut stream) = ws.split();

    let (writer_tx, mut writer_rx) = mpsc::channel::<Message>(64);
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            let Ok(text) = codec::encode(&msg) else { continue };
            if sink.send(WsFrame::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        match stream.next().await {
            None => break,
            Some(Err(_)) => break,
            Some(Ok(WsFrame::Close(_))) => break,
            Some(Ok(WsFrame::Ping(data))) => {
                // WS-level ping; tokio-tungstenite answers these itself on
                // most transports, but reply defensively since we own the
                // stream half directly here.
                let _ = writer_tx.send(Message::Pong(Pong { timestamp: None })).await;
                let _ = data;
            }
            Some(Ok(WsFrame::Text(text))) => match codec::decode(&text, usize::MAX) {
                Ok(DecodedFrame::Known(Message::Request(req))) => {
                    let client = client.clone();
                    let target_url = cfg.target_url.clone();
                    let default_timeout_s = cfg.request_timeout_s;
                    let outbound = writer_tx.clone();
                    tokio::spawn(async move {
                        executor::handle_request(&client, &target_url, default_timeout_s, req, outbound)
                            .await;
                    });
                }
                Ok(DecodedFrame::Known(Message::Ping(ping))) => {
                    let _ = writer_tx.send(Message::Pong(Pong { timestamp: ping.timestamp })).await;
                }
                Ok(DecodedFrame::Known(Message::Pong(_))) => {} // broker is authoritative for liveness
                Ok(DecodedFrame::Known(other)) => {
                    warn!(?other, "unexpected message on an established session");
                }
                Ok(DecodedFrame::Unknown(tag)) => {
                    warn!(tag, "dropping frame with unknown type");
                }
                Err(e) => {
                    warn!(error = %e, "protocol error on an established session");
                    break;
                }
            },
            Some(Ok(_)) => {}
        }
    }

    drop(writer_tx);
    let _ = writer_task.await;
}
