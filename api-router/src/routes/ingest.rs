use axum::{
    extract::{Multipart, Query, State},
    Extension, Json,
};
use common::storage::types::{document::Document, ingest_job::IngestJob, upload::UploadRecord};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, auth::Principal, error::ApiError};

#[derive(Debug, Serialize)]
pub struct IndexHealthBody {
    pub document_count: usize,
    pub chunk_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub document_id: String,
    pub chunk_count: usize,
    pub index_health: IndexHealthBody,
}

async fn run_sync(
    state: &ApiState,
    principal: &Principal,
    upload: UploadRecord,
) -> Result<IngestResponse, ApiError> {
    let job = IngestJob::enqueue(
        upload.id.clone(),
        principal.0.clone(),
        principal.0.clone(),
        &state.db,
    )
    .await?;
    state.ingestion_pipeline.process_job(job).await?;

    let mut response = state
        .db
        .client
        .query("SELECT * FROM document WHERE upload_id = $upload_id ORDER BY created_at DESC LIMIT 1")
        .bind(("upload_id", upload.id.clone()))
        .await
        .map_err(common::error::AppError::from)?;
    let documents: Vec<Document> = response.take(0).map_err(common::error::AppError::from)?;
    let document = documents.into_iter().next();
    let document = document
        .ok_or_else(|| ApiError::InternalError("ingested document not found after processing".to_string()))?;

    let index = state.index_registry.get_or_create(&principal.0).await;
    let health = index.health().await;

    Ok(IngestResponse {
        document_id: document.id,
        chunk_count: health.chunk_count,
        index_health: IndexHealthBody {
            document_count: health.document_count,
            chunk_count: health.chunk_count,
            errors: health.errors.into_iter().collect(),
        },
    })
}

#[derive(Debug, Deserialize)]
pub struct IngestRequestBody {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub content: String,
}

/// `POST /v1/ingest`: raw text content, synchronous. For callers that
/// already have extracted text (or a small plain-text/markdown document) and
/// don't want to round-trip through multipart encoding.
pub async fn ingest(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<IngestRequestBody>,
) -> Result<Json<IngestResponse>, ApiError> {
    if !state.ingest_limiter.allow(&principal.0).await {
        let retry_after_secs = state.ingest_limiter.retry_after_secs(&principal.0).await;
        return Err(ApiError::RateLimited {
            message: format!("rate limit exceeded for {}", principal.0),
            retry_after_secs,
        });
    }

    let upload = UploadRecord::store(
        body.content.as_bytes(),
        &body.file_name,
        body.mime_type.as_deref(),
        &principal.0,
        &state.db,
        &state.storage,
    )
    .await
    .map_err(common::error::AppError::from)?;

    Ok(Json(run_sync(&state, &principal, upload).await?))
}

#[derive(Debug, Deserialize)]
pub struct IngestUploadParams {
    #[serde(default, rename = "async")]
    pub is_async: bool,
}

#[derive(Debug, Serialize)]
pub struct JobEnqueueResponse {
    pub job_id: String,
    pub status: String,
}

/// `POST /v1/ingest-upload[?async=true]`: multipart file upload. Synchronous
/// by default (returns `IngestResponse` once the pipeline has fully run);
/// `?async=true` enqueues the job and returns 202 immediately, leaving the
/// worker to pick it up via `IngestJob::claim_next_ready`.
pub async fn ingest_upload(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<IngestUploadParams>,
    mut multipart: Multipart,
) -> Result<axum::response::Response, ApiError> {
    use axum::response::IntoResponse;

    if !state.ingest_limiter.allow(&principal.0).await {
        let retry_after_secs = state.ingest_limiter.retry_after_secs(&principal.0).await;
        return Err(ApiError::RateLimited {
            message: format!("rate limit exceeded for {}", principal.0),
            retry_after_secs,
        });
    }

    let mut file_name = None;
    let mut mime_type = None;
    let mut bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::ValidationError(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(str::to_string);
            mime_type = field.content_type().map(str::to_string);
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::ValidationError(format!("invalid file field: {e}")))?,
            );
        }
    }

    let file_name = file_name.ok_or_else(|| ApiError::ValidationError("missing file field".to_string()))?;
    let bytes = bytes.ok_or_else(|| ApiError::ValidationError("missing file field".to_string()))?;

    let upload = UploadRecord::store(
        bytes.as_ref(),
        &file_name,
        mime_type.as_deref(),
        &principal.0,
        &state.db,
        &state.storage,
    )
    .await
    .map_err(common::error::AppError::from)?;

    if params.is_async {
        let job = IngestJob::enqueue(
            upload.id.clone(),
            principal.0.clone(),
            principal.0.clone(),
            &state.db,
        )
        .await?;
        return Ok((
            axum::http::StatusCode::ACCEPTED,
            Json(JobEnqueueResponse { job_id: job.id, status: "queued".to_string() }),
        )
            .into_response());
    }

    Ok(Json(run_sync(&state, &principal, upload).await?).into_response())
}
