use axum::{
    extract::{Path, State},
    Extension, Json,
};
use common::storage::types::chunk::Chunk;
use serde::Serialize;

use crate::{api_state::ApiState, auth::Principal, error::ApiError};

#[derive(Debug, Serialize)]
pub struct ChunkBody {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    /// Always empty: highlighting is computed against a query at retrieval
    /// time (see `retrieval_pipeline::orchestrator::find_highlights`), which
    /// this standalone lookup has no access to.
    pub highlights: Vec<(usize, usize)>,
}

/// `GET /v1/chunks/{chunk_id}`.
pub async fn get_chunk(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(chunk_id): Path<String>,
) -> Result<Json<ChunkBody>, ApiError> {
    let chunk: Option<Chunk> = state.db.get_item(&chunk_id).await?;
    let chunk = chunk.ok_or_else(|| ApiError::NotFound(format!("chunk {chunk_id} not found")))?;

    if chunk.owner_id != principal.0 {
        return Err(ApiError::NotFound(format!("chunk {chunk_id} not found")));
    }

    Ok(Json(ChunkBody {
        chunk_id: chunk.id,
        document_id: chunk.document_id,
        ordinal: chunk.ordinal,
        text: chunk.text,
        char_start: chunk.char_start,
        char_end: chunk.char_end,
        highlights: Vec::new(),
    }))
}
