use std::collections::BTreeMap;

/// Header mapping with case-insensitive keys. Stored pre-lowercased so
/// lookups, iteration order, and wire output are all deterministic.
pub type Headers = BTreeMap<String, String>;

/// Hop-by-hop headers stripped from a public request before it is forwarded
/// onto the control channel. Comparison is case-insensitive.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-connection",
];

/// Build a normalized `Headers` map from an iterator of (possibly mixed
/// case, possibly duplicated) name/value pairs. Duplicate names collapse to
/// the last value, matching the wire contract.
pub fn normalize_headers<I, K, V>(pairs: I) -> Headers
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut headers = Headers::new();
    for (name, value) in pairs {
        headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }
    headers
}

/// Remove hop-by-hop headers in place. Idempotent: calling it twice is a
/// no-op the second time.
pub fn strip_hop_by_hop(headers: &mut Headers) {
    headers.retain(|name, _| !HOP_BY_HOP.contains(&name.as_str()));
}
