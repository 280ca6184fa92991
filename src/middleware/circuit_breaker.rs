use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls go through
    Closed,
    /// Remote capability is failing, callers fall back immediately
    Open,
    /// One trial call is let through after the cool-down
    HalfOpen,
}

/// Verdict of [`CircuitBreaker::admit_at`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Rejected,
    Pass,
    Trial,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// Cool-down before a trial call is allowed
    pub open_for: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for: Duration::from_secs(60),
        }
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            open_for: Duration::from_secs(config.open_seconds),
        }
    }
}

/// Returned by [`CircuitBreaker::call`]
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The call was not attempted
    Open,
    /// The call ran and failed
    Inner(E),
}

/// Fail-fast guard around one remote capability (translation, inpainting,
/// captioning, generation).
///
/// An open circuit is just another failure from the caller's point of view:
/// the stage takes its documented fallback without waiting on the network.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    total_rejected: u64,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_started: None,
                total_failures: 0,
                total_successes: 0,
                total_rejected: 0,
            })),
        }
    }

    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now())
    }

    /// Same as [`allow_request`](Self::allow_request) with an explicit clock
    pub fn allow_request_at(&self, now: Instant) -> bool {
        self.admit_at(now) != Admission::Rejected
    }

    fn admit_at(&self, now: Instant) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::HalfOpen => {
                // A trial call that never reported back is replaced after another cool-down
                let stale = inner
                    .trial_started
                    .map(|t| now.saturating_duration_since(t) >= self.config.open_for)
                    .unwrap_or(true);
                if stale {
                    warn!("{} breaker trial call never finished, sending a new one", self.name);
                    inner.trial_started = Some(now);
                    Admission::Trial
                } else {
                    inner.total_rejected += 1;
                    Admission::Rejected
                }
            }
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|t| now.saturating_duration_since(t) >= self.config.open_for)
                    .unwrap_or(true);
                if cooled {
                    debug!("{} breaker half-open, letting one trial call through", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started = Some(now);
                    Admission::Trial
                } else {
                    inner.total_rejected += 1;
                    Admission::Rejected
                }
            }
        }
    }

    /// The trial call was dropped before it finished; the circuit stays open but
    /// the next caller may try straight away.
    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            debug!("{} breaker trial call abandoned", self.name);
            inner.state = CircuitState::Open;
            inner.trial_started = None;
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            debug!("{} breaker closed", self.name);
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.trial_started = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            warn!(
                "{} breaker opened after {} consecutive failures",
                self.name, inner.consecutive_failures
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.trial_started = None;
        }
    }

    /// Run `op` through the breaker, recording its result
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit_at(Instant::now());
        if admission == Admission::Rejected {
            return Err(BreakerError::Open);
        }
        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };
        let result = op().await;
        guard.armed = false;
        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejected: inner.total_rejected,
        }
    }
}

/// Puts the circuit back to open if a trial call future is dropped mid-flight
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: &'static str,
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_for: Duration::from_secs(30),
            },
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker(3);
        let now = Instant::now();

        breaker.record_failure_at(now);
        breaker.record_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(!breaker.allow_request_at(now + Duration::from_secs(1)));
        assert_eq!(breaker.stats().total_rejected, 1);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let breaker = breaker(2);
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_trial() {
        let breaker = breaker(1);
        let now = Instant::now();
        breaker.record_failure_at(now);

        let later = now + Duration::from_secs(31);
        assert!(breaker.allow_request_at(later));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Only one trial call at a time
        assert!(!breaker.allow_request_at(later));

        breaker.record_failure_at(later);
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.allow_request_at(later + Duration::from_secs(31)));
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_records_outcome() {
        let breaker = breaker(1);

        let ok: Result<u32, BreakerError<&str>> = breaker.call(|| async { Ok(7) }).await;
        assert_eq!(ok.ok(), Some(7));

        let failed: Result<u32, BreakerError<&str>> = breaker.call(|| async { Err("down") }).await;
        assert!(matches!(failed, Err(BreakerError::Inner("down"))));

        let skipped: Result<u32, BreakerError<&str>> = breaker.call(|| async { Ok(1) }).await;
        assert!(matches!(skipped, Err(BreakerError::Open)));
    }

    #[test]
    fn test_stale_trial_is_replaced() {
        let breaker = breaker(1);
        let now = Instant::now();
        breaker.record_failure_at(now);

        let trial_at = now + Duration::from_secs(31);
        assert!(breaker.allow_request_at(trial_at));
        assert!(!breaker.allow_request_at(trial_at + Duration::from_secs(10)));

        // The first trial call never reported; a second one goes out after another cool-down
        assert!(breaker.allow_request_at(trial_at + Duration::from_secs(30)));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_reopens_circuit() {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_for: Duration::from_millis(20),
            },
        );
        let failed: Result<u32, BreakerError<&str>> = breaker.call(|| async { Err("down") }).await;
        assert!(failed.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Caller gives up while the trial call is still in flight
        let timed_out = tokio::time::timeout(
            Duration::from_millis(5),
            breaker.call(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<u32, &str>(1)
            }),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let next: Result<u32, BreakerError<&str>> = breaker.call(|| async { Ok(2) }).await;
        assert_eq!(next.ok(), Some(2));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stats_serialize() {
        let breaker = breaker(1);
        breaker.record_failure();
        let json = serde_json::to_value(breaker.stats()).unwrap();
        assert_eq!(json["name"], "test");
        assert_eq!(json["state"], "open");
        assert_eq!(json["total_failures"], 1);
    }
}
