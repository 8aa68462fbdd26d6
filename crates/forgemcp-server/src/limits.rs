//! Sliding-window rate limiting.
//!
//! One limiter instance tracks many string keys (tool names, client IPs).
//! Each key keeps only timestamps inside the current window, pruned on
//! every touch; keys whose window has drained are purged periodically so
//! per-IP keying cannot grow without bound.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How many operations between purges of empty keys.
const PURGE_EVERY_OPS: u64 = 256;

/// Backoff schedule for [`SlidingWindowLimiter::wait_for_slot`].
const WAIT_BACKOFF_MS: [u64; 4] = [100, 200, 400, 800];
const WAIT_BACKOFF_CAP_MS: u64 = 1000;

/// Limiter configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: usize,
    /// Window length in milliseconds
    pub window_ms: u64,
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<String, VecDeque<u64>>,
    ops: u64,
}

/// Per-key sliding-window counter.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl SlidingWindowLimiter {
    /// Create a limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// The limiter configuration.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Check and consume a slot for `key`. Returns whether the request is
    /// allowed; allowed requests are recorded at the current time.
    pub fn check_limit(&self, key: &str) -> bool {
        let now = now_ms();
        let mut state = self.state.lock();

        state.ops += 1;
        if state.ops % PURGE_EVERY_OPS == 0 {
            let cutoff = now.saturating_sub(self.config.window_ms);
            state.windows.retain(|_, window| {
                while window.front().is_some_and(|&t| t <= cutoff) {
                    window.pop_front();
                }
                !window.is_empty()
            });
        }

        let window_ms = self.config.window_ms;
        let max = self.config.max_requests;
        let window = state.windows.entry(key.to_string()).or_default();
        Self::prune(window, now, window_ms);

        if window.len() >= max {
            return false;
        }
        window.push_back(now);
        true
    }

    fn prune(window: &mut VecDeque<u64>, now: u64, window_ms: u64) {
        let cutoff = now.saturating_sub(window_ms);
        while window.front().is_some_and(|&t| t <= cutoff) {
            window.pop_front();
        }
    }

    /// Requests recorded for `key` inside the current window.
    pub fn current_count(&self, key: &str) -> usize {
        let now = now_ms();
        let mut state = self.state.lock();
        let window_ms = self.config.window_ms;
        match state.windows.get_mut(key) {
            Some(window) => {
                Self::prune(window, now, window_ms);
                window.len()
            }
            None => 0,
        }
    }

    /// Milliseconds until the oldest recorded request leaves the window.
    /// Zero when a slot is available now.
    pub fn time_until_slot(&self, key: &str) -> u64 {
        let now = now_ms();
        let mut state = self.state.lock();
        let window_ms = self.config.window_ms;
        let max = self.config.max_requests;
        match state.windows.get_mut(key) {
            Some(window) => {
                Self::prune(window, now, window_ms);
                if window.len() < max {
                    return 0;
                }
                window
                    .front()
                    .map(|&oldest| (oldest + window_ms).saturating_sub(now))
                    .unwrap_or(0)
            }
            None => 0,
        }
    }

    /// Wait until a slot is available, consuming it. Retries `check_limit`
    /// with exponential backoff: 100, 200, 400, 800 ms, then capped at
    /// 1000 ms per retry.
    pub async fn wait_for_slot(&self, key: &str) {
        let mut attempt = 0usize;
        loop {
            if self.check_limit(key) {
                return;
            }
            let backoff = WAIT_BACKOFF_MS
                .get(attempt)
                .copied()
                .unwrap_or(WAIT_BACKOFF_CAP_MS);
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    /// Drop state for one key.
    pub fn clear(&self, key: &str) {
        self.state.lock().windows.remove(key);
    }

    /// Drop all state.
    pub fn clear_all(&self) {
        self.state.lock().windows.clear();
    }

    /// Number of keys currently tracked (pruned or not).
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize, window_ms: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimitConfig {
            max_requests: max,
            window_ms,
        })
    }

    #[test]
    fn allows_up_to_max_then_refuses() {
        let l = limiter(3, 50);
        assert!(l.check_limit("x"));
        assert!(l.check_limit("x"));
        assert!(l.check_limit("x"));
        assert!(!l.check_limit("x"));
        assert_eq!(l.current_count("x"), 3);
    }

    #[test]
    fn window_slides_open_again() {
        let l = limiter(3, 50);
        for _ in 0..3 {
            assert!(l.check_limit("x"));
        }
        assert!(!l.check_limit("x"));
        std::thread::sleep(Duration::from_millis(60));
        assert!(l.check_limit("x"));
    }

    #[test]
    fn keys_are_independent() {
        let l = limiter(1, 60_000);
        assert!(l.check_limit("a"));
        assert!(!l.check_limit("a"));
        assert!(l.check_limit("b"));
    }

    #[test]
    fn time_until_slot_is_zero_when_open() {
        let l = limiter(2, 60_000);
        assert_eq!(l.time_until_slot("x"), 0);
        l.check_limit("x");
        assert_eq!(l.time_until_slot("x"), 0);
        l.check_limit("x");
        let wait = l.time_until_slot("x");
        assert!(wait > 0 && wait <= 60_000);
    }

    #[test]
    fn clear_resets_a_key() {
        let l = limiter(1, 60_000);
        assert!(l.check_limit("x"));
        assert!(!l.check_limit("x"));
        l.clear("x");
        assert!(l.check_limit("x"));
    }

    #[test]
    fn empty_keys_are_purged() {
        let l = limiter(1, 10);
        for i in 0..8 {
            l.check_limit(&format!("ip-{i}"));
        }
        std::thread::sleep(Duration::from_millis(20));
        // Drive enough operations to trigger a purge cycle.
        for _ in 0..PURGE_EVERY_OPS {
            l.check_limit("active");
        }
        assert!(l.tracked_keys() <= 2, "stale keys were not purged");
    }

    #[tokio::test]
    async fn wait_for_slot_eventually_admits() {
        let l = limiter(1, 80);
        assert!(l.check_limit("x"));
        let start = std::time::Instant::now();
        l.wait_for_slot("x").await;
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!l.check_limit("x"));
    }
}
