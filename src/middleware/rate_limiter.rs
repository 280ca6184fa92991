//! Per-caller admission control
//!
//! Fixed window counter per identity, stored in a concurrent map. Windows are
//! reset lazily on access, and every `SWEEP_EVERY` checks the expired ones
//! are dropped, so there is no background sweeper.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::config::RateLimitConfig;
use crate::core::errors::AdmissionError;

/// Checks between two passes over the map for expired windows
const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Admission controller: at most `max_requests` per identity per window
pub struct RateLimiter {
    enabled: bool,
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, Window>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            enabled: true,
            max_requests,
            window,
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_seconds),
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Never rejects
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_requests: u32::MAX,
            window: Duration::from_secs(60),
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Consume one request from `identity`'s budget
    pub fn check(&self, identity: &str) -> Result<(), AdmissionError> {
        self.check_at(identity, Instant::now())
    }

    pub fn check_at(&self, identity: &str, now: Instant) -> Result<(), AdmissionError> {
        if !self.enabled {
            return Ok(());
        }

        // Before taking the entry guard: retain locks every shard
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.sweep_expired(now);
        }

        // The entry guard holds the shard lock, so check-and-increment is atomic
        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + self.window,
            });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        if entry.count >= self.max_requests {
            let retry_after = entry.reset_at.saturating_duration_since(now);
            warn!(
                "Rate limit exceeded for '{}' ({} per {:?})",
                identity, self.max_requests, self.window
            );
            return Err(AdmissionError::RateLimited {
                identity: identity.to_string(),
                max_requests: self.max_requests,
                window: self.window,
                retry_after,
            });
        }

        entry.count += 1;
        Ok(())
    }

    /// Requests left for `identity` in its current window
    pub fn remaining(&self, identity: &str) -> u32 {
        let now = Instant::now();
        match self.windows.get(identity) {
            Some(w) if now < w.reset_at => self.max_requests.saturating_sub(w.count),
            _ => self.max_requests,
        }
    }

    fn sweep_expired(&self, now: Instant) {
        let before = self.windows.len();
        self.windows.retain(|_, w| now < w.reset_at);
        let dropped = before.saturating_sub(self.windows.len());
        if dropped > 0 {
            debug!("Dropped {} expired rate limit windows", dropped);
        }
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_then_reject() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        let now = Instant::now();

        for i in 0..10 {
            assert!(limiter.check_at("alice", now + Duration::from_millis(i)).is_ok());
        }

        let err = limiter
            .check_at("alice", now + Duration::from_secs(1))
            .unwrap_err();
        let AdmissionError::RateLimited {
            max_requests,
            retry_after,
            ..
        } = err;
        assert_eq!(max_requests, 10);
        assert_eq!(retry_after, Duration::from_secs(59));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at("bob", now).is_ok());
        assert!(limiter.check_at("bob", now).is_ok());
        assert!(limiter.check_at("bob", now + Duration::from_secs(59)).is_err());

        let later = now + Duration::from_secs(60);
        assert!(limiter.check_at("bob", later).is_ok());
        assert!(limiter.check_at("bob", later).is_ok());
        assert!(limiter.check_at("bob", later).is_err());
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at("a", now).is_ok());
        assert!(limiter.check_at("a", now).is_err());
        assert!(limiter.check_at("b", now).is_ok());
        assert_eq!(limiter.tracked_identities(), 2);
    }

    #[test]
    fn test_remaining_budget() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check("carol").is_ok());
        assert!(limiter.check("carol").is_ok());
        assert_eq!(limiter.remaining("carol"), 1);
        assert_eq!(limiter.remaining("nobody"), 3);
    }

    #[test]
    fn test_expired_windows_are_swept() {
        let limiter = RateLimiter::new(1000, Duration::from_secs(60));
        let now = Instant::now();
        for i in 0..10 {
            assert!(limiter.check_at(&format!("client-{}", i), now).is_ok());
        }
        assert_eq!(limiter.tracked_identities(), 10);

        let later = now + Duration::from_secs(61);
        for _ in 0..SWEEP_EVERY {
            assert!(limiter.check_at("steady", later).is_ok());
        }
        assert_eq!(limiter.tracked_identities(), 1);
        assert_eq!(limiter.remaining("steady"), 1000 - SWEEP_EVERY as u32);
    }

    #[test]
    fn test_disabled_never_rejects() {
        let limiter = RateLimiter::disabled();
        for _ in 0..1000 {
            assert!(limiter.check("anyone").is_ok());
        }
    }
}
