//! Wire types and codec for the Tunely broker/agent control channel.
//!
//! This crate is deliberately free of any transport (no WebSocket, no HTTP):
//! it models the framed JSON messages in the protocol, header/body encoding
//! rules shared by both the broker and the agent, and the `DomainStore`
//! contract the broker depends on without owning.

mod body;
mod codec;
mod headers;
mod message;
mod store;

pub use body::{decode_body_from_wire, encode_body_for_wire};
pub use codec::{decode, encode, CodecError, DecodedFrame, DEFAULT_MAX_FRAME_BYTES};
pub use headers::{normalize_headers, strip_hop_by_hop, Headers};
pub use message::{
    tags, Auth, AuthError, AuthOk, Message, Ping, Pong, Request, Response, StreamChunk,
    StreamEnd, StreamStart,
};
pub use store::{DomainMode, DomainRecord, DomainStore, ForwardLogRecord};
