//! External HTTP reranker client with retry, jittered exponential backoff,
//! and a shared circuit breaker. `rerank` never returns an error: every
//! failure mode (circuit open, exhausted retries, malformed response) falls
//! back to the caller's input order, per the identity-fallback contract.

mod circuit_breaker;

use std::{sync::Arc, time::Duration};

use common::{error::AppError, utils::config::AppConfig};
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::warn;

use crate::metrics::MetricsRegistry;
use circuit_breaker::CircuitBreaker;

/// One rerank candidate: the pair the client reorders.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub chunk_id: String,
    pub text: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultItem>,
}

#[derive(Deserialize)]
struct RerankResultItem {
    index: usize,
    relevance_score: f32,
}

enum CallError {
    /// Network error, timeout, or 429/5xx — worth retrying.
    Retryable(AppError),
    /// Non-retryable transport/protocol failure (4xx other than 429, or an
    /// unparseable body).
    Fatal(AppError),
}

pub struct RerankerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_attempts: u32,
    timeout: Duration,
    breaker: CircuitBreaker,
    metrics: Arc<MetricsRegistry>,
}

impl RerankerClient {
    pub fn new(config: &AppConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.provider_base_url.clone(),
            api_key: config.provider_api_key.clone(),
            model: config.rerank_model.clone(),
            max_attempts: config.rerank_max_attempts.max(1),
            timeout: Duration::from_millis(config.rerank_timeout_ms),
            breaker: CircuitBreaker::new(
                config.rerank_circuit_threshold,
                Duration::from_secs(config.rerank_circuit_reset_s),
            ),
            metrics,
        }
    }

    /// Reorders `items` by relevance to `query`. Always returns a full,
    /// same-length reordering of `items` — degraded paths return the input
    /// order unchanged rather than an error or a truncated list.
    pub async fn rerank(
        &self,
        query: &str,
        items: Vec<RerankCandidate>,
        language: &str,
    ) -> Vec<RerankCandidate> {
        if items.len() <= 1 {
            return items;
        }

        self.metrics
            .increment_counter(&format!("rerank_model::{}", self.model), 1)
            .await;
        self.metrics
            .increment_counter(&format!("rerank_language::{}", language), 1)
            .await;

        if !self.breaker.allow().await {
            self.metrics
                .increment_counter("rerank_fallback::circuit_open", 1)
                .await;
            self.metrics
                .increment_counter("rerank_circuit::open_skip", 1)
                .await;
            return items;
        }

        match self.call_with_retry(query, &items).await {
            Ok(order) => {
                if self.breaker.record_success().await {
                    self.metrics
                        .increment_counter("rerank_circuit::recovered", 1)
                        .await;
                }
                apply_order(items, order)
            }
            Err(()) => {
                if self.breaker.record_failure().await {
                    self.metrics
                        .increment_counter("rerank_circuit::opened", 1)
                        .await;
                }
                self.metrics
                    .increment_counter("rerank_fallback::empty_response", 1)
                    .await;
                items
            }
        }
    }

    async fn call_with_retry(
        &self,
        query: &str,
        items: &[RerankCandidate],
    ) -> Result<Vec<usize>, ()> {
        let mut backoff = ExponentialBackoff::from_millis(2).map(jitter);

        for attempt in 1..=self.max_attempts {
            self.metrics.increment_counter("rerank_retry::attempt", 1).await;

            match self.call_once(query, items).await {
                Ok(order) => {
                    if attempt > 1 {
                        self.metrics
                            .increment_counter("rerank_retry::success_after_retry", 1)
                            .await;
                    }
                    return Ok(order);
                }
                Err(CallError::Fatal(err)) => {
                    warn!(error = %err, "reranker call failed fatally, not retrying");
                    break;
                }
                Err(CallError::Retryable(err)) => {
                    warn!(error = %err, attempt, "reranker call failed, will retry");
                    if attempt == self.max_attempts {
                        break;
                    }
                    if let Some(delay) = backoff.next() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.metrics.increment_counter("rerank_retry::exhausted", 1).await;
        Err(())
    }

    async fn call_once(&self, query: &str, items: &[RerankCandidate]) -> Result<Vec<usize>, CallError> {
        let documents: Vec<&str> = items.iter().map(|item| item.text.as_str()).collect();
        let body = RerankRequest { model: &self.model, query, documents };

        let response = self
            .http
            .post(format!("{}/rerank", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| CallError::Retryable(AppError::Reqwest(err)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(CallError::Retryable(AppError::Provider {
                message: format!("reranker returned {status}"),
                retryable: true,
            }));
        }
        if !status.is_success() {
            return Err(CallError::Fatal(AppError::Provider {
                message: format!("reranker returned {status}"),
                retryable: false,
            }));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|err| CallError::Fatal(AppError::Reqwest(err)))?;

        if parsed.results.is_empty() {
            return Err(CallError::Fatal(AppError::Provider {
                message: "reranker returned an empty result set".to_string(),
                retryable: false,
            }));
        }

        let mut ordered: Vec<RerankResultItem> = parsed
            .results
            .into_iter()
            .filter(|item| item.index < items.len())
            .collect();
        ordered.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen = std::collections::HashSet::with_capacity(ordered.len());
        let indices: Vec<usize> = ordered
            .into_iter()
            .map(|item| item.index)
            .filter(|idx| seen.insert(*idx))
            .collect();

        if indices.is_empty() {
            return Err(CallError::Fatal(AppError::Provider {
                message: "reranker returned no usable indices".to_string(),
                retryable: false,
            }));
        }

        Ok(indices)
    }
}

/// Places scored items first (in score order), then appends the rest in
/// their original relative order.
fn apply_order(items: Vec<RerankCandidate>, order: Vec<usize>) -> Vec<RerankCandidate> {
    let len = items.len();
    let mut slots: Vec<Option<RerankCandidate>> = items.into_iter().map(Some).collect();
    let mut taken = vec![false; len];
    let mut result = Vec::with_capacity(len);

    for idx in order {
        if let Some(slot) = slots.get_mut(idx) {
            if let Some(item) = slot.take() {
                result.push(item);
                taken[idx] = true;
            }
        }
    }

    for (idx, slot) in slots.into_iter().enumerate() {
        if !taken[idx] {
            if let Some(item) = slot {
                result.push(item);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str) -> RerankCandidate {
        RerankCandidate { chunk_id: id.to_string(), text: format!("text for {id}") }
    }

    #[test]
    fn apply_order_places_scored_prefix_then_preserves_remainder_order() {
        let items = vec![candidate("a"), candidate("b"), candidate("c"), candidate("d")];
        // Only indices 2 and 0 were scored; 1 and 3 are unscored remainder.
        let reordered = apply_order(items, vec![2, 0]);
        let ids: Vec<&str> = reordered.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn apply_order_with_full_scoring_is_a_pure_reorder() {
        let items = vec![candidate("a"), candidate("b"), candidate("c")];
        let reordered = apply_order(items, vec![1, 2, 0]);
        let ids: Vec<&str> = reordered.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn single_item_input_is_returned_without_a_network_call() {
        let config = AppConfig::default();
        let client = RerankerClient::new(&config, Arc::new(MetricsRegistry::default()));
        let items = vec![candidate("only")];
        let result = client.rerank("query", items, "en").await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk_id, "only");
    }

    #[tokio::test]
    async fn open_circuit_falls_back_to_identity_order() {
        let config = AppConfig::default();
        let client = RerankerClient::new(&config, Arc::new(MetricsRegistry::default()));
        client.breaker.record_failure().await;
        client.breaker.record_failure().await;
        client.breaker.record_failure().await;
        client.breaker.record_failure().await;
        client.breaker.record_failure().await;

        let items = vec![candidate("a"), candidate("b")];
        let result = client.rerank("query", items, "en").await;
        let ids: Vec<&str> = result.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
