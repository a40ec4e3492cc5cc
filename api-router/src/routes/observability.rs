use std::collections::HashMap;

use axum::{extract::State, Json};
use retrieval_pipeline::metrics::{MetricsRegistry, Status, Threshold};

use crate::api_state::ApiState;

/// `GET /v1/metrics`: the live snapshot plus recent history, same shape the
/// registry already produces.
pub async fn metrics(State(state): State<ApiState>) -> Json<retrieval_pipeline::metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot().await)
}

fn status_thresholds() -> HashMap<String, Threshold> {
    let mut thresholds = HashMap::new();
    thresholds.insert(
        "empty_retrieval".to_string(),
        Threshold { amber_at: 1.0, red_at: 10.0, higher_is_worse: true },
    );
    thresholds.insert(
        "rerank_circuit_opened".to_string(),
        Threshold { amber_at: 1.0, red_at: 1.0, higher_is_worse: true },
    );
    thresholds
}

/// `GET /v1/status`: the counters a human glances at first, classified
/// against the thresholds above. Metrics absent from the latest snapshot
/// contribute no status rather than a fabricated green.
pub async fn status(State(state): State<ApiState>) -> Json<HashMap<String, Status>> {
    let snapshot = state.metrics.snapshot().await;

    let opened = snapshot.counters.get("rerank_circuit::opened").copied().unwrap_or(0);
    let recovered = snapshot.counters.get("rerank_circuit::recovered").copied().unwrap_or(0);

    let mut values = HashMap::new();
    values.insert(
        "empty_retrieval".to_string(),
        snapshot.counters.get("empty_retrieval").copied().unwrap_or(0) as f64,
    );
    values.insert(
        "rerank_circuit_opened".to_string(),
        if opened > recovered { 1.0 } else { 0.0 },
    );

    Json(MetricsRegistry::status_digest(&values, &status_thresholds()))
}
