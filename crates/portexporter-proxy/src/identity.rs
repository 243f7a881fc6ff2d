use hyper::header::HeaderMap;
use portexporter_proto::TUNNEL_ID_HEADER;

/// Identity a gateway asserts when registering its tunnel
///
/// `None` when the header is missing, empty, or not visible ASCII. The value
/// is trusted as-is; only the listener's TLS policy authenticates the caller.
pub fn identify(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(TUNNEL_ID_HEADER)?.to_str().ok()?;
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}
