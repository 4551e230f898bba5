//! Adaptive rate limiter for the Spotify Web API.
//!
//! Epistemic foundation:
//! - K_i: Spotify signals throttling with 429 and a Retry-After header
//! - K_i: 429 errors without Retry-After require exponential backoff
//! - B_i: Limits vary by endpoint and app tier
//! - I^B: Exact limits unknowable until a 429 arrives

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Rate limit state for a single endpoint.
#[derive(Debug)]
pub struct EndpointRateLimitState {
    /// Consecutive 429 errors (for backoff)
    pub consecutive_429s: u32,
    /// Backoff until this time
    pub backoff_until: Option<Instant>,
    /// Last update time
    pub last_updated: Instant,
}

impl Default for EndpointRateLimitState {
    fn default() -> Self {
        Self {
            consecutive_429s: 0,
            backoff_until: None,
            last_updated: Instant::now(),
        }
    }
}

impl EndpointRateLimitState {
    /// Check if we can proceed with a request.
    pub fn can_proceed(&self) -> bool {
        !self.backoff_until.is_some_and(|t| Instant::now() < t)
    }

    /// Get time to wait before proceeding.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        match self.backoff_until.filter(|&t| t > now) {
            Some(backoff_until) => backoff_until - now,
            None => Duration::ZERO,
        }
    }

    /// Record a 429 error and calculate backoff.
    ///
    /// Retry-After takes precedence; otherwise exponential, capped at 60s.
    pub fn record_429(&mut self, retry_after_secs: Option<f64>) {
        self.consecutive_429s += 1;
        let backoff_secs = match retry_after_secs {
            Some(secs) => secs.max(1.0),
            None => (2.0_f64).powi(self.consecutive_429s as i32).min(60.0),
        };
        self.backoff_until = Some(Instant::now() + Duration::from_secs_f64(backoff_secs));
        self.last_updated = Instant::now();
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs = backoff_secs,
            "Rate limited (429), backing off"
        );
    }

    /// Record a successful request.
    pub fn record_success(&mut self) {
        if self.consecutive_429s > 0 {
            self.consecutive_429s = 0;
            self.backoff_until = None;
        }
        self.last_updated = Instant::now();
    }
}

/// Parse the Retry-After header (seconds) from a response.
pub fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<f64> {
    headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .parse::<f64>()
        .ok()
}

/// Adaptive rate limiter for the Spotify Web API.
///
/// Tracks per-endpoint backoff state and provides waits on 429s.
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Per-endpoint rate limit state
    states: DashMap<String, EndpointRateLimitState>,
    /// Global stats
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait if necessary before making a request to the given endpoint.
    ///
    /// Returns the duration waited.
    pub async fn wait_if_needed(&self, endpoint: &str) -> Duration {
        let wait_time = {
            let state = self.states.entry(endpoint.to_string()).or_default();
            state.wait_time()
        };

        if wait_time > Duration::ZERO {
            debug!(
                endpoint = endpoint,
                wait_ms = wait_time.as_millis(),
                "Waiting for rate limit"
            );
            self.total_wait_ms
                .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait_time).await;
        }

        wait_time
    }

    /// Check if we can proceed (non-blocking).
    pub fn can_proceed(&self, endpoint: &str) -> bool {
        self.states
            .entry(endpoint.to_string())
            .or_default()
            .can_proceed()
    }

    /// Record a request result.
    pub fn record_request(&self, endpoint: &str, status: u16, headers: &reqwest::header::HeaderMap) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut state = self.states.entry(endpoint.to_string()).or_default();

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429(retry_after_secs(headers));
        } else if status < 400 {
            state.record_success();
        }
    }

    /// Get statistics.
    pub fn stats(&self) -> RateLimiterStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_429s = self.total_429s.load(Ordering::Relaxed);
        let total_wait_ms = self.total_wait_ms.load(Ordering::Relaxed);

        RateLimiterStats {
            total_requests,
            total_429s,
            total_wait_secs: total_wait_ms as f64 / 1000.0,
            rate_limit_ratio: if total_requests > 0 {
                total_429s as f64 / total_requests as f64
            } else {
                0.0
            },
            endpoints_tracked: self.states.len(),
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
    pub rate_limit_ratio: f64,
    pub endpoints_tracked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_proceeds_immediately() {
        let state = EndpointRateLimitState::default();
        assert!(state.can_proceed());
        assert_eq!(state.wait_time(), Duration::ZERO);
    }

    #[test]
    fn test_429_with_retry_after_blocks() {
        let mut state = EndpointRateLimitState::default();
        state.record_429(Some(5.0));
        assert!(!state.can_proceed());
        assert!(state.wait_time() > Duration::from_secs(4));
    }

    #[test]
    fn test_success_resets_backoff() {
        let mut state = EndpointRateLimitState::default();
        state.record_429(None);
        assert_eq!(state.consecutive_429s, 1);
        state.record_success();
        assert_eq!(state.consecutive_429s, 0);
        assert!(state.can_proceed());
    }

    #[test]
    fn test_exponential_backoff_caps_at_sixty() {
        let mut state = EndpointRateLimitState::default();
        for _ in 0..10 {
            state.record_429(None);
        }
        assert!(state.wait_time() <= Duration::from_secs(60));
    }

    #[test]
    fn test_limiter_tracks_per_endpoint() {
        let limiter = RateLimiter::new();
        let headers = reqwest::header::HeaderMap::new();
        limiter.record_request("audio-features", 429, &headers);
        limiter.record_request("search", 200, &headers);

        assert!(!limiter.can_proceed("audio-features"));
        assert!(limiter.can_proceed("search"));

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_429s, 1);
        assert_eq!(stats.endpoints_tracked, 2);
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "12".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), Some(12.0));

        let empty = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after_secs(&empty), None);
    }
}
