use crate::headers::Headers;
use serde::{Deserialize, Serialize};

/// One control-channel frame. Exactly one message per frame, tagged by `type`.
///
/// Variant names are renamed explicitly to the wire tokens from the protocol
/// rather than via `rename_all`, since the Rust-idiomatic `PascalCase` names
/// (`AuthOk`, `StreamStart`) don't collapse onto `SCREAMING_SNAKE_CASE` the
/// same way `rename_all` would assume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "AUTH")]
    Auth(Auth),
    #[serde(rename = "AUTH_OK")]
    AuthOk(AuthOk),
    #[serde(rename = "AUTH_ERROR")]
    AuthError(AuthError),
    #[serde(rename = "REQUEST")]
    Request(Request),
    #[serde(rename = "RESPONSE")]
    Response(Response),
    #[serde(rename = "STREAM_START")]
    StreamStart(StreamStart),
    #[serde(rename = "STREAM_CHUNK")]
    StreamChunk(StreamChunk),
    #[serde(rename = "STREAM_END")]
    StreamEnd(StreamEnd),
    #[serde(rename = "PING")]
    Ping(Ping),
    #[serde(rename = "PONG")]
    Pong(Pong),
}

/// The nine wire-visible type tokens, for logging and for matching on a
/// frame's tag before the payload has been validated.
pub mod tags {
    pub const AUTH: &str = "AUTH";
    pub const AUTH_OK: &str = "AUTH_OK";
    pub const AUTH_ERROR: &str = "AUTH_ERROR";
    pub const REQUEST: &str = "REQUEST";
    pub const RESPONSE: &str = "RESPONSE";
    pub const STREAM_START: &str = "STREAM_START";
    pub const STREAM_CHUNK: &str = "STREAM_CHUNK";
    pub const STREAM_END: &str = "STREAM_END";
    pub const PING: &str = "PING";
    pub const PONG: &str = "PONG";

    pub const ALL: &[&str] = &[
        AUTH, AUTH_OK, AUTH_ERROR, REQUEST, RESPONSE, STREAM_START, STREAM_CHUNK, STREAM_END,
        PING, PONG,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthOk {
    pub domain: String,
    pub tunnel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStart {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnd {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}
