//! Sliding-window rate limiter. Follows the same small hand-rolled
//! `Mutex<State>` shape as the reranker's
//! [`crate::reranking::circuit_breaker::CircuitBreaker`] rather than pulling
//! in a rate-limiting crate.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, RwLock};

use common::error::AppError;

/// Per-principal sliding window: admits a call iff fewer than `limit` calls
/// from that principal landed in the trailing `window`. Construct one
/// instance per endpoint class (query, ingest, ...) rather than sharing a
/// single limiter across classes with different budgets.
pub struct SlidingWindowLimiter {
    principals: RwLock<HashMap<String, Mutex<VecDeque<Instant>>>>,
    limit: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { principals: RwLock::new(HashMap::new()), limit: limit.max(1), window }
    }

    /// Admits or rejects a call for `principal`. A rejected call is not
    /// recorded, so it doesn't count against the window once admitted calls
    /// age out.
    pub async fn allow(&self, principal: &str) -> bool {
        {
            let principals = self.principals.read().await;
            if let Some(deque) = principals.get(principal) {
                return self.try_admit(deque).await;
            }
        }

        let mut principals = self.principals.write().await;
        let deque = principals.entry(principal.to_string()).or_insert_with(|| Mutex::new(VecDeque::new()));
        self.try_admit(deque).await
    }

    /// Same as [`Self::allow`], returning an [`AppError::RateLimited`] with
    /// the number of whole seconds until the oldest call ages out, for
    /// callers that want a `Retry-After` value.
    pub async fn check(&self, principal: &str) -> Result<(), AppError> {
        if self.allow(principal).await {
            return Ok(());
        }
        let retry_after_s = self.retry_after_secs(principal).await;
        Err(AppError::RateLimited(format!(
            "rate limit exceeded for {principal}, retry after {retry_after_s}s"
        )))
    }

    async fn try_admit(&self, deque: &Mutex<VecDeque<Instant>>) -> bool {
        let mut deque = deque.lock().await;
        let now = Instant::now();
        evict_expired(&mut deque, now, self.window);
        if deque.len() < self.limit {
            deque.push_back(now);
            true
        } else {
            false
        }
    }

    /// Seconds until `principal`'s oldest recorded call ages out of the
    /// window, for callers that want to set a `Retry-After` header.
    pub async fn retry_after_secs(&self, principal: &str) -> u64 {
        let principals = self.principals.read().await;
        let Some(deque) = principals.get(principal) else { return 0 };
        let deque = deque.lock().await;
        let Some(oldest) = deque.front() else { return 0 };
        self.window.saturating_sub(oldest.elapsed()).as_secs() + 1
    }
}

fn evict_expired(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = deque.front() {
        if now.duration_since(*front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}
