use std::collections::BTreeMap;

use axum::{extract::State, Json};
use common::storage::types::retrieval_settings::RetrievalSettings;
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct RetrievalSettingsBody {
    pub alpha: f32,
    pub top_k: usize,
    pub k_cite: usize,
    pub citation_coverage_threshold: f32,
    pub per_language_coverage_threshold: Option<BTreeMap<String, f32>>,
    pub rerank_max_attempts: u32,
    pub rerank_timeout_ms: u64,
    pub rerank_circuit_threshold: u32,
    pub rerank_circuit_reset_s: u64,
}

impl From<RetrievalSettings> for RetrievalSettingsBody {
    fn from(s: RetrievalSettings) -> Self {
        Self {
            alpha: s.alpha,
            top_k: s.top_k,
            k_cite: s.k_cite,
            citation_coverage_threshold: s.citation_coverage_threshold,
            per_language_coverage_threshold: s.per_language_coverage_threshold,
            rerank_max_attempts: s.rerank_max_attempts,
            rerank_timeout_ms: s.rerank_timeout_ms,
            rerank_circuit_threshold: s.rerank_circuit_threshold,
            rerank_circuit_reset_s: s.rerank_circuit_reset_s,
        }
    }
}

/// `GET /v1/admin/retrieval-tuning`.
pub async fn get_retrieval_tuning(
    State(state): State<ApiState>,
) -> Result<Json<RetrievalSettingsBody>, ApiError> {
    let settings = RetrievalSettings::get_current(&state.db).await?;
    Ok(Json(settings.into()))
}

/// Every field optional: a caller patches only the knobs it wants to move,
/// unset fields keep the current stored value.
#[derive(Debug, Deserialize, Default)]
pub struct PatchRetrievalTuningBody {
    pub alpha: Option<f32>,
    pub top_k: Option<usize>,
    pub k_cite: Option<usize>,
    pub citation_coverage_threshold: Option<f32>,
    pub per_language_coverage_threshold: Option<BTreeMap<String, f32>>,
    pub rerank_max_attempts: Option<u32>,
    pub rerank_timeout_ms: Option<u64>,
    pub rerank_circuit_threshold: Option<u32>,
    pub rerank_circuit_reset_s: Option<u64>,
}

/// `PATCH /v1/admin/retrieval-tuning`: live knobs the query orchestrator and
/// reranker read on every call, so a patch here takes effect on the very
/// next request without a restart.
pub async fn patch_retrieval_tuning(
    State(state): State<ApiState>,
    Json(body): Json<PatchRetrievalTuningBody>,
) -> Result<Json<RetrievalSettingsBody>, ApiError> {
    let mut current = RetrievalSettings::get_current(&state.db).await?;

    if let Some(alpha) = body.alpha {
        current.alpha = alpha;
    }
    if let Some(top_k) = body.top_k {
        current.top_k = top_k;
    }
    if let Some(k_cite) = body.k_cite {
        current.k_cite = k_cite;
    }
    if let Some(threshold) = body.citation_coverage_threshold {
        current.citation_coverage_threshold = threshold;
    }
    if body.per_language_coverage_threshold.is_some() {
        current.per_language_coverage_threshold = body.per_language_coverage_threshold;
    }
    if let Some(attempts) = body.rerank_max_attempts {
        current.rerank_max_attempts = attempts;
    }
    if let Some(timeout) = body.rerank_timeout_ms {
        current.rerank_timeout_ms = timeout;
    }
    if let Some(threshold) = body.rerank_circuit_threshold {
        current.rerank_circuit_threshold = threshold;
    }
    if let Some(reset) = body.rerank_circuit_reset_s {
        current.rerank_circuit_reset_s = reset;
    }

    let updated = RetrievalSettings::patch(&state.db, current).await?;
    Ok(Json(updated.into()))
}
