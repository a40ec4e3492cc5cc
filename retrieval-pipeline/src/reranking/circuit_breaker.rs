//! Three-state circuit breaker shared by every call through one
//! [`super::RerankerClient`]: `closed` → `open` after `k` consecutive
//! failures, `open` → `half_open` after `reset`, `half_open`'s next call is
//! a probe that closes the breaker on success or reopens it on failure.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            reset,
        }
    }

    /// Whether a call may proceed right now. Flips `open` → `half_open` if
    /// the reset window has elapsed, letting exactly the next call through
    /// as a probe.
    pub async fn allow(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.reset {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns `true` if this success recovered the breaker from `half_open`.
    pub async fn record_success(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let recovered = inner.state == State::HalfOpen;
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        recovered
    }

    /// Returns `true` if this failure (re)opened the breaker.
    pub async fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
                true
            }
            State::Open => false,
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_k_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert!(breaker.allow().await);
        assert!(!breaker.record_failure().await);
        assert!(!breaker.record_failure().await);
        assert!(breaker.record_failure().await);
        assert!(!breaker.allow().await);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        assert!(!breaker.record_failure().await);
        assert!(!breaker.record_failure().await);
        assert!(breaker.allow().await);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure().await;
        assert!(!breaker.allow().await);
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(breaker.allow().await);
        assert!(breaker.record_failure().await);
        assert!(!breaker.allow().await);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_and_reports_recovery() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(breaker.allow().await);
        assert!(breaker.record_success().await);
        assert!(breaker.allow().await);
    }
}
