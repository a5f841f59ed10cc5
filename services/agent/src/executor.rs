//! Agent Executor: performs the local HTTP call for one inbound `REQUEST`
//! and emits either a unary `RESPONSE` or a `STREAM_START -> STREAM_CHUNK* ->
//! STREAM_END` sequence, detected from the target's `Content-Type`.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::Method;
use tokio::sync::mpsc;
use tracing::warn;
use tunely_protocol::{
    decode_body_from_wire, encode_body_for_wire, normalize_headers, Headers, Message, Request,
    Response, StreamChunk, StreamEnd, StreamStart,
};

/// Run one `REQUEST` against the local target and emit the reply (or
/// sequence of replies) onto `outbound`, the session's single outbound
/// queue. Never panics on a malformed or unreachable target.
pub async fn handle_request(
    client: &reqwest::Client,
    target_url: &str,
    default_timeout_s: u64,
    req: Request,
    outbound: mpsc::Sender<Message>,
) {
    let started = Instant::now();
    let id = req.id.clone();
    let timeout_s = req.timeout.unwrap_or(default_timeout_s);

    let method = match Method::from_bytes(req.method.as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            send_error_response(&outbound, &id, 400, "unsupported HTTP method", started).await;
            return;
        }
    };

    let url = format!("{}{}", target_url.trim_end_matches('/'), req.path);
    let mut builder = client.request(method, &url).timeout(Duration::from_secs(timeout_s));
    for (name, value) in &req.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &req.body {
        match decode_body_from_wire(&req.headers, body) {
            Ok(raw) => builder = builder.body(raw),
            Err(e) => {
                send_error_response(&outbound, &id, 400, &format!("invalid request body: {e}"), started)
                    .await;
                return;
            }
        }
    }

    let resp = match builder.send().await {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => {
            send_error_response(&outbound, &id, 504, "target timeout", started).await;
            return;
        }
        Err(e) => {
            send_error_response(&outbound, &id, 503, &e.to_string(), started).await;
            return;
        }
    };

    let status = resp.status().as_u16();
    let headers = normalize_headers(
        resp.headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("").to_owned())),
    );

    let is_event_stream = headers
        .get("content-type")
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("text/event-stream"));

    if is_event_stream {
        stream_reply(id, status, headers, resp, outbound, started).await;
    } else {
        unary_reply(id, status, headers, resp, outbound, started).await;
    }
}

async fn unary_reply(
    id: String,
    status: u16,
    headers: Headers,
    resp: reqwest::Response,
    outbound: mpsc::Sender<Message>,
    started: Instant,
) {
    match resp.bytes().await {
        Ok(raw) => {
            let body = encode_body_for_wire(&headers, &raw);
            let _ = outbound
                .send(Message::Response(Response {
                    id,
                    status,
                    headers,
                    body: Some(body),
                    error: None,
                    duration_ms: Some(elapsed_ms(started)),
                    timestamp: None,
                }))
                .await;
        }
        Err(e) => {
            send_error_response(&outbound, &id, 503, &e.to_string(), started).await;
        }
    }
}

async fn stream_reply(
    id: String,
    status: u16,
    headers: Headers,
    resp: reqwest::Response,
    outbound: mpsc::Sender<Message>,
    started: Instant,
) {
    if outbound
        .send(Message::StreamStart(StreamStart { id: id.clone(), status, headers, timestamp: None }))
        .await
        .is_err()
    {
        return;
    }

    let mut body = resp.bytes_stream();
    let mut sequence = 0u64;
    let mut stream_error = None;

    while let Some(next) = body.next().await {
        match next {
            Ok(bytes) if bytes.is_empty() => continue,
            Ok(bytes) => {
                let data = String::from_utf8_lossy(&bytes).into_owned();
                let chunk = Message::StreamChunk(StreamChunk {
                    id: id.clone(),
                    data,
                    sequence: Some(sequence),
                    timestamp: None,
                });
                if outbound.send(chunk).await.is_err() {
                    return; // consumer gone; nothing more to deliver
                }
                sequence += 1;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "error reading target stream body");
                stream_error = Some(e.to_string());
                break;
            }
        }
    }

    let _ = outbound
        .send(Message::StreamEnd(StreamEnd {
            id,
            error: stream_error,
            duration_ms: Some(elapsed_ms(started)),
            total_chunks: Some(sequence),
            timestamp: None,
        }))
        .await;
}

async fn send_error_response(
    outbound: &mpsc::Sender<Message>,
    id: &str,
    status: u16,
    error: &str,
    started: Instant,
) {
    let _ = outbound
        .send(Message::Response(Response {
            id: id.to_owned(),
            status,
            headers: Headers::new(),
            body: None,
            error: Some(error.to_owned()),
            duration_ms: Some(elapsed_ms(started)),
            timestamp: None,
        }))
        .await;
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
