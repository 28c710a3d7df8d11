//! Client address resolution for request logging.
//!
//! # Header Priority
//!
//! Checks in order, the first non-empty value wins:
//!
//! 1. `Fly-Client-IP` (set by the Fly.io edge proxy)
//! 2. `X-Real-IP` (nginx and others)
//! 3. First entry of `X-Forwarded-For`
//! 4. The connection's peer address
//! 5. [`UNKNOWN_IP`]
//!
//! Some proxies append the client port to header values, so every textual
//! address goes through [`strip_port`].
//!
//! # Security Warning
//!
//! **These headers are client controlled.** The resolved address is only
//! used for logging; never make access decisions with it unless a trusted
//! proxy overwrites the headers.

use std::borrow::Cow;

use axum::extract::ConnectInfo;
use axum::http::Request;

use crate::listener::ClientAddr;

/// Fallback value when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Proxy headers consulted before the peer address, in priority order.
const SINGLE_VALUE_HEADERS: [&str; 2] = ["fly-client-ip", "x-real-ip"];

/// Resolve the client address of `req` for logging.
///
/// Returns a borrowed [`UNKNOWN_IP`] when nothing is available, so the
/// common no-header case allocates only for the peer address.
pub fn resolve_client_addr<B>(req: &Request<B>) -> Cow<'static, str> {
    let headers = req.headers();

    for name in SINGLE_VALUE_HEADERS {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok())
            && !value.trim().is_empty()
        {
            return Cow::Owned(strip_port(value.trim()).to_string());
        }
    }

    // Format: "client, proxy1, proxy2" - we want the first (client) entry
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
        && !first.trim().is_empty()
    {
        return Cow::Owned(strip_port(first.trim()).to_string());
    }

    if let Some(ConnectInfo(ClientAddr(addr))) = req.extensions().get::<ConnectInfo<ClientAddr>>()
    {
        return Cow::Owned(addr.ip().to_string());
    }

    Cow::Borrowed(UNKNOWN_IP)
}

/// Strip a trailing `:port` and IPv6 brackets from a textual address.
///
/// ```text
/// 203.0.113.7:5000   -> 203.0.113.7
/// [2001:db8::1]:443  -> 2001:db8::1
/// 2001:db8::1        -> 2001:db8::1   (bare IPv6 has no port)
/// example.org        -> example.org
/// ```
pub fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }

    match addr.rsplit_once(':') {
        // A single colon separates host and port
        Some((host, port))
            if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            host
        }
        _ => addr,
    }
}
