use crate::headers::Headers;
use base64::{engine::general_purpose::STANDARD, Engine};

/// Returns true if the given `Content-Type` value should be treated as text
/// (and therefore transported as a raw UTF-8 string rather than Base64).
///
/// Anything starting with `text/` is text, as are a handful of structured
/// syntaxes commonly served with a non-`text/` MIME type.
fn is_text_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    let ct = ct.split(';').next().unwrap_or("").trim();
    ct.starts_with("text/")
        || ct == "application/json"
        || ct == "application/xml"
        || ct == "application/javascript"
        || ct.ends_with("+json")
        || ct.ends_with("+xml")
}

fn content_type<'a>(headers: &'a Headers) -> Option<&'a str> {
    headers.get("content-type").map(String::as_str)
}

/// Encode a raw response/request body for the wire: UTF-8 passthrough for
/// text content types (invalid sequences replaced per Unicode replacement
/// rules), Base64 otherwise.
pub fn encode_body_for_wire(headers: &Headers, raw: &[u8]) -> String {
    match content_type(headers) {
        Some(ct) if is_text_content_type(ct) => String::from_utf8_lossy(raw).into_owned(),
        None => String::from_utf8_lossy(raw).into_owned(),
        Some(_) => STANDARD.encode(raw),
    }
}

/// Decode a wire body back into raw bytes, given the headers that describe
/// it. Mirrors `encode_body_for_wire`: text content types are taken as UTF-8
/// bytes directly, everything else is Base64-decoded.
pub fn decode_body_from_wire(headers: &Headers, body: &str) -> Result<Vec<u8>, base64::DecodeError> {
    match content_type(headers) {
        Some(ct) if is_text_content_type(ct) => Ok(body.as_bytes().to_vec()),
        None => Ok(body.as_bytes().to_vec()),
        Some(_) => STANDARD.decode(body),
    }
}
