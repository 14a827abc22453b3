//! Sliding-window rate limiter used to bound restart/allocate retries.
//!
//! Shaped after the rate limiter API surface exercised in
//! `users-core`'s `security_rate_limiting_tests.rs` (a config struct plus a
//! `check`-style call), but driven by the two joint conditions this
//! names rather than per-minute/per-hour buckets: a minimum gap between
//! accepted requests, and a cap on accepted requests within a trailing
//! window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimiterConfig;

/// Admits or rejects restart/allocate attempts under two joint conditions
///: `minInterval` since the last accepted request, and fewer
/// than `maxRequests` accepted requests in the trailing `interval` window.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    accepted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            accepted: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    /// Returns `true` iff a request may be accepted right now, and if so
    /// records it against both the min-interval and window conditions.
    pub fn accept(&self) -> bool {
        self.accept_at(Instant::now())
    }

    /// Same as `accept`, parameterized on the current instant for testing.
    pub fn accept_at(&self, now: Instant) -> bool {
        let mut accepted = self.accepted.lock().unwrap();
        self.prune(&mut accepted, now);

        if let Some(&last) = accepted.back() {
            if now.saturating_duration_since(last) < self.config.min_interval {
                return false;
            }
        }

        if accepted.len() >= self.config.max_requests {
            return false;
        }

        accepted.push_back(now);
        true
    }

    /// How long until the min-interval condition alone would next permit a
    /// request. Ignores the window condition — the caller polls for window
    /// openings separately.
    pub fn time_until_next_request(&self) -> Duration {
        self.time_until_next_request_at(Instant::now())
    }

    pub fn time_until_next_request_at(&self, now: Instant) -> Duration {
        let accepted = self.accepted.lock().unwrap();
        match accepted.back() {
            Some(&last) => {
                let elapsed = now.saturating_duration_since(last);
                self.config.min_interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    /// Drop timestamps strictly older than `now - interval`. A timestamp
    /// exactly at the window edge is retained (boundary rule).
    fn prune(&self, accepted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = accepted.front() {
            if now.saturating_duration_since(front) > self.config.interval {
                accepted.pop_front();
            } else {
                break;
            }
        }
    }
}
