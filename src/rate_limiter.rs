//! rate_limiter.rs
//!
//! In-memory fixed-window rate limiter. Deliberately a single-process
//! substitute for a hosted limiter: counters reset on restart and live in
//! server memory, which is fine for tens of users. The limiter is a
//! component of `AppState` rather than a global singleton so a future
//! swap to a shared store does not ripple through the handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// Per-endpoint limits, mirrored from the sizes the booking flow needs.
pub const LIMIT_BOOKING_CREATE: RateLimit = RateLimit {
    window: Duration::from_secs(60),
    max_requests: 10,
};
pub const LIMIT_REGISTER: RateLimit = RateLimit {
    window: Duration::from_secs(60 * 60),
    max_requests: 3,
};

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub window: Duration,
    pub max_requests: u32,
}

#[derive(Debug)]
struct Entry {
    count: u32,
    window_start: Instant,
    last_access: Instant,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct RateLimiter {
    store: Arc<Mutex<HashMap<String, Entry>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks and counts one request for `key` (prefix + client IP).
    pub fn check(&self, key: &str, limit: RateLimit) -> Decision {
        let now = Instant::now();
        let mut store = self.store.lock().unwrap();

        let entry = store.entry(key.to_string()).or_insert(Entry {
            count: 0,
            window_start: now,
            last_access: now,
        });

        // Window expired: start a fresh one.
        if now.duration_since(entry.window_start) >= limit.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.last_access = now;

        if entry.count >= limit.max_requests {
            let elapsed = now.duration_since(entry.window_start);
            return Decision {
                allowed: false,
                remaining: 0,
                retry_after: Some(limit.window.saturating_sub(elapsed)),
            };
        }

        entry.count += 1;
        Decision {
            allowed: true,
            remaining: limit.max_requests - entry.count,
            retry_after: None,
        }
    }

    /// Drops entries idle for over an hour. Called from a background task.
    pub fn cleanup(&self) {
        let cutoff = Duration::from_secs(60 * 60);
        let now = Instant::now();
        let mut store = self.store.lock().unwrap();
        let before = store.len();
        store.retain(|_, entry| now.duration_since(entry.last_access) < cutoff);
        let removed = before - store.len();
        if removed > 0 {
            debug!(
                "rate limiter cleanup removed {} idle entries, {} remain",
                removed,
                store.len()
            );
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new();
        let limit = RateLimit {
            window: Duration::from_secs(60),
            max_requests: 3,
        };

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("10.0.0.1", limit);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let blocked = limiter.check("10.0.0.1", limit);
        assert!(!blocked.allowed);
        assert!(blocked.retry_after.is_some());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let limit = RateLimit {
            window: Duration::from_secs(60),
            max_requests: 1,
        };

        assert!(limiter.check("10.0.0.1", limit).allowed);
        assert!(!limiter.check("10.0.0.1", limit).allowed);
        assert!(limiter.check("10.0.0.2", limit).allowed);
    }

    #[test]
    fn window_expiry_resets_the_counter() {
        let limiter = RateLimiter::new();
        let limit = RateLimit {
            window: Duration::from_millis(50),
            max_requests: 1,
        };

        assert!(limiter.check("10.0.0.1", limit).allowed);
        assert!(!limiter.check("10.0.0.1", limit).allowed);

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("10.0.0.1", limit).allowed);
    }

    #[test]
    fn cleanup_keeps_recent_entries() {
        let limiter = RateLimiter::new();
        let limit = RateLimit {
            window: Duration::from_secs(60),
            max_requests: 5,
        };

        limiter.check("10.0.0.1", limit);
        limiter.check("10.0.0.2", limit);
        limiter.cleanup();
        assert_eq!(limiter.len(), 2);
    }
}
