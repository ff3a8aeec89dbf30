//! Adaptive rate limiter for chat-completions endpoints.
//!
//! Epistemic foundation:
//! - K_i: Endpoints may return `x-ratelimit-*` headers on each response
//! - K_i: 429 errors require exponential backoff
//! - I^B: Exact rate limits unknowable until headers received

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest backoff after repeated 429s.
pub(crate) const MAX_BACKOFF_SECS: f64 = 60.0;

/// Rate limit state for a single model.
#[derive(Debug, Default)]
pub struct ModelRateLimitState {
    /// Remaining requests in current interval
    pub remaining_requests: Option<u32>,
    /// When the request limit resets
    pub reset_requests_at: Option<Instant>,
    /// Consecutive 429 errors (for backoff)
    pub consecutive_429s: u32,
    /// Backoff until this time
    pub backoff_until: Option<Instant>,
}

impl ModelRateLimitState {
    /// Get time to wait before proceeding.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut max_wait = Duration::ZERO;

        if let Some(until) = self.backoff_until.filter(|&t| t > now) {
            max_wait = max_wait.max(until - now);
        }

        if self.remaining_requests == Some(0) {
            if let Some(reset_at) = self.reset_requests_at.filter(|&t| t > now) {
                max_wait = max_wait.max(reset_at - now);
            }
        }

        max_wait
    }

    /// Record a 429 error and calculate backoff.
    pub fn record_429(&mut self) {
        self.consecutive_429s += 1;
        let backoff_secs = 2.0_f64.powi(self.consecutive_429s as i32).min(MAX_BACKOFF_SECS);
        self.backoff_until = Some(Instant::now() + Duration::from_secs_f64(backoff_secs));
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs = backoff_secs,
            "Rate limited (429), backing off"
        );
    }

    /// Record a successful request.
    pub fn record_success(&mut self) {
        self.consecutive_429s = 0;
        self.backoff_until = None;
    }

    /// Update state from response headers.
    pub fn update_from_headers(&mut self, headers: &HeaderMap) {
        let header = |key: &str| headers.get(key).and_then(|v| v.to_str().ok());

        if let Some(remaining) = header("x-ratelimit-remaining-requests") {
            self.remaining_requests = remaining.parse().ok();
        }
        if let Some(secs) = header("x-ratelimit-reset-requests")
            .and_then(|s| s.trim_end_matches('s').parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s >= 0.0)
        {
            self.reset_requests_at = Some(Instant::now() + Duration::from_secs_f64(secs));
        }
    }
}

/// Per-model rate limiter shared by every call through one client.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: DashMap<String, ModelRateLimitState>,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait if necessary before making a request to the given model.
    ///
    /// Returns the duration waited.
    pub async fn wait_if_needed(&self, model: &str) -> Duration {
        // Guard dropped before sleeping
        let wait_time = self
            .states
            .get(model)
            .map(|s| s.wait_time())
            .unwrap_or(Duration::ZERO);

        if wait_time > Duration::ZERO {
            debug!(
                model = model,
                wait_ms = wait_time.as_millis() as u64,
                "Waiting for rate limit"
            );
            self.total_wait_ms
                .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait_time).await;
        }

        wait_time
    }

    /// Record a request result.
    pub fn record_request(&self, model: &str, status: u16, headers: &HeaderMap) {
        let mut state = self.states.entry(model.to_string()).or_default();
        state.update_from_headers(headers);

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429();
        } else if status < 400 {
            state.record_success();
        }
    }

    /// Total 429 responses seen.
    pub fn total_429s(&self) -> u64 {
        self.total_429s.load(Ordering::Relaxed)
    }

    /// Total time spent waiting, in seconds.
    pub fn total_wait_secs(&self) -> f64 {
        self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }
}
