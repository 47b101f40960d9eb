//! Host URL resolution.

/// Rewrite an `http(s)` host URL to its WebSocket equivalent. Anything else
/// is handed to the transport unchanged.
pub(crate) fn resolve_host_url(host: &str) -> String {
    if let Some(rest) = host.strip_prefix("https://") {
        return format!("wss://{rest}");
    }
    if let Some(rest) = host.strip_prefix("http://") {
        return format!("ws://{rest}");
    }
    host.to_string()
}
