//! Fixed-window request limiter keyed on the client address.
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::AppError;
use crate::store::Storage;
use crate::AppState;

/// Header a fronting proxy sets to the caller's address
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Caller address: the proxy header when it parses, else the socket peer
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get(REAL_IP_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

/// Rate limiter middleware
pub async fn rate_limit<S: Storage + 'static>(
    State(state): State<Arc<AppState<S>>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let client_ip = client_ip(request.headers(), peer).to_string();

    let max_requests = state.settings.rate_limit.max_requests;
    let window = Duration::from_secs(state.settings.rate_limit.window_secs);

    {
        let mut entry = state
            .rate_limits
            .entry(client_ip.clone())
            .or_insert_with(RateLimitEntry::new);

        if entry.window_start.elapsed() > window {
            entry.requests = 0;
            entry.window_start = Instant::now();
        }

        if entry.requests >= max_requests {
            debug!(client_ip, "request rate limited");
            return Err(AppError::RateLimitExceeded);
        }
        entry.requests += 1;
    }

    Ok(next.run(request).await)
}

/// Rate limit entry for a client
#[derive(Debug)]
pub struct RateLimitEntry {
    requests: u32,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new() -> Self {
        Self {
            requests: 0,
            window_start: Instant::now(),
        }
    }
}

/// Drop windows that ended more than `window` ago
pub fn prune<S>(state: &AppState<S>, window: Duration) {
    state.rate_limits.retain(|_, entry| entry.window_start.elapsed() <= window);
}
