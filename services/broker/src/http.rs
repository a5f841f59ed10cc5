//! Public-facing HTTP surface: the forward endpoint, the control-channel WS
//! upgrade, and the ambient health/readiness routes (§6 of `SPEC_FULL.md`).

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tunely_protocol::Headers;

use crate::forward::{forward, ForwardOutcome, ForwardRequest};
use crate::pending::StreamFrame;
use crate::session::run_agent_session;
use crate::state::AppState;

pub async fn tunnel_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let limits = state.session_limits();
    ws.on_upgrade(move |socket| {
        run_agent_session(socket, state.store.clone(), state.registry.clone(), state.pending.clone(), limits)
    })
}

/// The public HTTP envelope: `{method, path, headers?, body?, timeout?}`.
/// Per the Open Question resolution in `SPEC_FULL.md` §3, `body` is a raw
/// string identical in shape to the control-channel `REQUEST.body`.
#[derive(Debug, Deserialize)]
pub struct ForwardEnvelope {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: Headers,
    pub body: Option<String>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
struct UnaryEnvelope {
    status: u16,
    headers: Headers,
    body: Option<String>,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: &'static str,
}

pub async fn forward_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(envelope): Json<ForwardEnvelope>,
) -> Response {
    let req = ForwardRequest {
        method: envelope.method,
        path: envelope.path,
        headers: envelope.headers,
        body: envelope.body,
        timeout: envelope.timeout,
    };

    match forward(
        &domain,
        req,
        &state.registry,
        &state.pending,
        &state.store,
        state.config.request_timeout_s,
    )
    .await
    {
        Ok(ForwardOutcome::Unary { status, headers, body, duration_ms }) => {
            Json(UnaryEnvelope { status, headers, body, duration_ms }).into_response()
        }
        Ok(ForwardOutcome::Stream { status, headers, chunks }) => stream_response(status, headers, chunks),
        Err(err) => {
            let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(ErrorEnvelope { error: err.code() })).into_response()
        }
    }
}

/// Render a streamed forward as a `text/event-stream` response: the
/// status/headers resolve immediately from `STREAM_START`, then each
/// `CHUNK.data` is written to the body as-is, as it arrives.
fn stream_response(
    status: u16,
    headers: Headers,
    chunks: tokio::sync::mpsc::Receiver<StreamFrame>,
) -> Response {
    let body_stream = futures_util::stream::unfold(chunks, |mut rx| async move {
        match rx.recv().await {
            Some(StreamFrame::Chunk(chunk)) => {
                Some((Ok::<_, std::io::Error>(axum::body::Bytes::from(chunk.data)), rx))
            }
            Some(StreamFrame::End(_)) | None => None,
        }
    });

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));
    for (name, value) in &headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            builder = builder.header(name, value);
        }
    }
    if !headers.contains_key("content-type") {
        builder = builder.header(CONTENT_TYPE, "text/event-stream");
    }

    builder
        .body(axum::body::Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    // A bound lookup against a sentinel domain would be meaningless; ready
    // means the process accepted the `DomainStore` and can serve at all.
    let _ = &state.store;
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_envelope_defaults_headers_to_empty_when_absent() {
        let json = r#"{"method":"GET","path":"/ping"}"#;
        let envelope: ForwardEnvelope = serde_json::from_str(json).unwrap();
        assert!(envelope.headers.is_empty());
        assert!(envelope.body.is_none());
    }
}
