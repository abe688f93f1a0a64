//! `trpc-timeout` parsing and deadline computation.
//!
//! Clients may send a `trpc-timeout` header with the number of milliseconds
//! they are willing to wait. The router combines it with its own configured
//! timeout; the smaller one wins.

use std::time::Duration;

use http::HeaderMap;

/// Header carrying the client's timeout in milliseconds.
pub const TRPC_TIMEOUT_HEADER: &str = "trpc-timeout";

/// Parse the `trpc-timeout` header.
///
/// Returns `None` if the header is missing, malformed or `0` (no timeout).
pub fn parse_timeout(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(TRPC_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_timeout_ms)
}

/// Parse a millisecond count; `0` and anything unparsable mean no timeout.
pub fn parse_timeout_ms(value: &str) -> Option<Duration> {
    let ms: u64 = value.trim().parse().ok()?;
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// The effective timeout is the smaller of the two; `None` if neither is set.
pub fn compute_effective_timeout(
    router_timeout: Option<Duration>,
    message_timeout: Option<Duration>,
) -> Option<Duration> {
    match (router_timeout, message_timeout) {
        (Some(router), Some(message)) => Some(router.min(message)),
        (Some(router), None) => Some(router),
        (None, Some(message)) => Some(message),
        (None, None) => None,
    }
}
