use crate::message::Message;
use thiserror::Error;

/// The default maximum frame size, per the configuration default in the
/// external interface section: 8 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds the configured maximum")]
    FrameTooLarge(usize),
    #[error("frame is not valid JSON: {0}")]
    NotJson(serde_json::Error),
    #[error("frame has a known type `{tag}` but malformed payload: {source}")]
    Malformed {
        tag: String,
        source: serde_json::Error,
    },
    #[error("frame has no `type` field")]
    MissingTag,
}

/// Outcome of decoding one wire frame: either a fully-typed message, or a
/// frame whose `type` tag is not one of the nine known variants — callers
/// are expected to log and drop these rather than treat them as errors.
#[derive(Debug)]
pub enum DecodedFrame {
    Known(Message),
    Unknown(String),
}

/// Serialize a message to its wire (JSON) representation. The codec does
/// not interpret message semantics; it only encodes/decodes.
pub fn encode(message: &Message) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::NotJson)
}

/// Parse one wire frame. `max_frame_bytes` bounds the frame measured in
/// bytes of the encoded text, matching the boundary test in the spec: a
/// frame at exactly the limit is accepted, one byte over is rejected.
pub fn decode(text: &str, max_frame_bytes: usize) -> Result<DecodedFrame, CodecError> {
    if text.len() > max_frame_bytes {
        return Err(CodecError::FrameTooLarge(text.len()));
    }

    let value: serde_json::Value = serde_json::from_str(text).map_err(CodecError::NotJson)?;
    let tag = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(CodecError::MissingTag)?
        .to_owned();

    if !crate::message::tags::ALL.contains(&tag.as_str()) {
        return Ok(DecodedFrame::Unknown(tag));
    }

    match serde_json::from_value::<Message>(value) {
        Ok(message) => Ok(DecodedFrame::Known(message)),
        Err(source) => Err(CodecError::Malformed { tag, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Auth, Message};

    #[test]
    fn encode_then_decode_returns_the_same_message() {
        let msg = Message::Auth(Auth {
            token: "t".to_owned(),
            client_version: Some("1.0".to_owned()),
            force: Some(true),
        });
        let text = encode(&msg).unwrap();
        match decode(&text, DEFAULT_MAX_FRAME_BYTES).unwrap() {
            DecodedFrame::Known(decoded) => assert_eq!(decoded, msg),
            DecodedFrame::Unknown(tag) => panic!("unexpected unknown tag {tag}"),
        }
    }

    #[test]
    fn frame_at_exactly_the_limit_is_accepted() {
        let text = r#"{"type":"PING"}"#;
        assert!(decode(text, text.len()).is_ok());
    }

    #[test]
    fn frame_one_byte_over_the_limit_is_rejected() {
        let text = r#"{"type":"PING"}"#;
        let err = decode(text, text.len() - 1).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge(_)));
    }

    #[test]
    fn unknown_type_is_reported_as_unknown_not_an_error() {
        let text = r#"{"type":"FROBNICATE","foo":"bar"}"#;
        match decode(text, DEFAULT_MAX_FRAME_BYTES).unwrap() {
            DecodedFrame::Unknown(tag) => assert_eq!(tag, "FROBNICATE"),
            DecodedFrame::Known(_) => panic!("expected unknown"),
        }
    }

    #[test]
    fn known_tag_with_malformed_payload_is_a_codec_error() {
        let text = r#"{"type":"AUTH"}"#; // missing required `token`
        let err = decode(text, DEFAULT_MAX_FRAME_BYTES).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }

    #[test]
    fn missing_type_field_is_a_codec_error() {
        let text = r#"{"token":"t"}"#;
        let err = decode(text, DEFAULT_MAX_FRAME_BYTES).unwrap_err();
        assert!(matches!(err, CodecError::MissingTag));
    }
}
