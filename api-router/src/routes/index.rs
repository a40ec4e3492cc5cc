use axum::{extract::State, Extension, Json};
use serde::Serialize;

use crate::{api_state::ApiState, auth::Principal, error::ApiError};

#[derive(Debug, Serialize)]
pub struct IndexHealthBody {
    pub document_count: usize,
    pub chunk_count: usize,
    pub last_build_at: Option<chrono::DateTime<chrono::Utc>>,
    pub errors: Vec<String>,
}

/// `GET /v1/index/health`.
pub async fn health(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<IndexHealthBody>, ApiError> {
    let index = state.index_registry.get_or_create(&principal.0).await;
    let health = index.health().await;

    Ok(Json(IndexHealthBody {
        document_count: health.document_count,
        chunk_count: health.chunk_count,
        last_build_at: health.last_build_at,
        errors: health.errors.into_iter().collect(),
    }))
}

/// `POST /v1/index/rebuild`: synchronous, rebuilds the caller's own index
/// from durable chunk storage.
pub async fn rebuild(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<IndexHealthBody>, ApiError> {
    let index = state.index_registry.get_or_create(&principal.0).await;
    index.rebuild(&principal.0, &state.db).await?;
    let health = index.health().await;

    Ok(Json(IndexHealthBody {
        document_count: health.document_count,
        chunk_count: health.chunk_count,
        last_build_at: health.last_build_at,
        errors: health.errors.into_iter().collect(),
    }))
}
