//! Client address resolution

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Placeholder used when no address is known for a client
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the address a request is attributed to.
///
/// Forwarding headers are only consulted when `trust_proxy` is set: first
/// `X-Real-IP`, then the first entry of `X-Forwarded-For`. Otherwise, or when
/// neither carries a usable value, the transport peer is used.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(real_ip) = header_value("x-real-ip") {
        return Some(real_ip.to_string());
    }

    header_value("x-forwarded-for")
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
}
