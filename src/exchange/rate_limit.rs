// =============================================================================
// Request Weight — keep order-book polling inside the Binance budget
// =============================================================================
//
// Every response carries `X-MBX-USED-WEIGHT-1M`, the weight consumed in the
// current minute. The connector records it and refuses a request that would
// push the total past 1000 (the exchange allows 1200). A refused request is a
// soft failure for the sampler; nothing here retries or sleeps.
//
// Refused requests bring back no header, so a recorded weight expires one
// window after it was reported.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Requests that would exceed this are refused.
const WEIGHT_HARD_LIMIT: u32 = 1000;
const WEIGHT_WARN_THRESHOLD: u32 = 800;
/// Length of the `X-MBX-USED-WEIGHT-1M` window.
const WEIGHT_WINDOW: Duration = Duration::from_secs(60);

/// Request weight of `GET /api/v3/depth` for a given `limit`.
pub fn depth_request_weight(limit: usize) -> u32 {
    match limit {
        0..=100 => 5,
        101..=500 => 25,
        501..=1000 => 50,
        _ => 250,
    }
}

pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    /// When `used_weight_1m` was last reported.
    reported_at: Mutex<Option<Instant>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            reported_at: Mutex::new(None),
        }
    }

    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(w) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };
        self.record_weight(w);
    }

    fn record_weight(&self, w: u32) {
        let prev = self.used_weight();
        self.used_weight_1m.store(w, Ordering::Relaxed);
        *self.reported_at.lock() = Some(Instant::now());
        if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = w,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request weight nearing the per-minute budget"
            );
        }
        debug!(used_weight_1m = w, "request weight");
    }

    /// Whether `weight` more fits under the hard limit.
    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight();
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked, would exceed rate limit"
            );
        }
        allowed
    }

    /// Last reported weight, or 0 once its window has rolled over.
    pub fn used_weight(&self) -> u32 {
        match *self.reported_at.lock() {
            Some(at) if at.elapsed() < WEIGHT_WINDOW => {
                self.used_weight_1m.load(Ordering::Relaxed)
            }
            _ => 0,
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn header_updates_used_weight() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_static("42"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.used_weight(), 42);
    }

    #[test]
    fn garbage_header_is_ignored() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_static("lots"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.used_weight(), 0);
    }

    #[test]
    fn blocks_requests_past_hard_limit() {
        let tracker = RateLimitTracker::new();
        tracker.record_weight(996);
        assert!(tracker.can_send_request(4));
        assert!(!tracker.can_send_request(5));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_recovers_after_the_window() {
        let tracker = RateLimitTracker::new();
        tracker.record_weight(997);
        let weight = depth_request_weight(20);
        assert!(!tracker.can_send_request(weight));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!tracker.can_send_request(weight));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(tracker.used_weight(), 0);
        assert!(tracker.can_send_request(weight));
    }

    #[test]
    fn absurd_header_weight_does_not_overflow() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_static("4294967295"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.used_weight(), u32::MAX);
        assert!(!tracker.can_send_request(5));
    }

    #[test]
    fn depth_weights_follow_limit_tiers() {
        assert_eq!(depth_request_weight(20), 5);
        assert_eq!(depth_request_weight(500), 25);
        assert_eq!(depth_request_weight(5000), 250);
    }
}
