//! Fixed-window in-memory rate limiter for the public tracking endpoint.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use metrics::counter;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Clone)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
}

/// Per-key fixed-window counter. Entries reset lazily when their window
/// expires.
pub struct RateLimiter {
    entries: DashMap<String, WindowEntry>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
        }
    }

    /// Records a hit for `key`; errors once the window's budget is spent.
    pub fn check(&self, key: &str) -> Result<(), ServiceError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        if entry.count > self.limit {
            counter!("cargotrack_rate_limited_total").increment(1);
            debug!(key, "rate limit exceeded");
            return Err(ServiceError::RateLimitExceeded);
        }
        Ok(())
    }
}

/// Middleware guarding the public tracking route. Keyed by forwarded client
/// address when present; anonymous traffic shares one bucket.
pub async fn public_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if let Err(e) = state.rate_limiter.check(&key) {
        return e.into_response();
    }
    next.run(request).await
}
