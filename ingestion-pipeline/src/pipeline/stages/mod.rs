use common::{
    error::AppError,
    storage::types::{
        chunk::{Chunk, ChunkMetadata},
        document::{Document, DocumentLanguage, DocumentStatus},
        upload::UploadRecord,
    },
};
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use crate::{
    chunker::{ChunkLanguage, ChunkSpan},
    utils::extracted_content::ExtractedContent,
};

use super::{
    context::PipelineContext,
    state::{Chunked, Embedded, Extracted, IngestionMachine, Persisted, Ready},
};

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}

fn to_document_language(language: ChunkLanguage) -> DocumentLanguage {
    match language {
        ChunkLanguage::En => DocumentLanguage::En,
        ChunkLanguage::Zh => DocumentLanguage::Zh,
        ChunkLanguage::Mixed => DocumentLanguage::Mixed,
    }
}

fn to_chunk_language(language: DocumentLanguage) -> ChunkLanguage {
    match language {
        DocumentLanguage::En => ChunkLanguage::En,
        DocumentLanguage::Zh => ChunkLanguage::Zh,
        DocumentLanguage::Mixed => ChunkLanguage::Mixed,
    }
}

/// Maps a chunk span back to the page or timestamp it was extracted from,
/// via the marker in effect at the span's start offset.
fn chunk_metadata(
    extracted: &ExtractedContent,
    span: &ChunkSpan,
    language: DocumentLanguage,
) -> ChunkMetadata {
    let marker = extracted.marker_at(span.char_start);
    ChunkMetadata {
        page: marker.and_then(|m| m.page),
        section: None,
        paragraph: None,
        language: Some(format!("{language:?}").to_lowercase()),
        timestamp_ms: marker.and_then(|m| m.timestamp_ms),
    }
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, owner_id = %ctx.job.owner_id)
)]
pub async fn extract(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    let upload = UploadRecord::get_by_id(ctx.job.upload_id(), ctx.db).await?;

    let document = Document::upsert(
        ctx.job.owner_id.clone(),
        upload.id.clone(),
        &upload.file_name,
        upload.mime_type.clone(),
        upload.sha256.clone(),
        ctx.db,
    )
    .await?;

    let extracted = ctx.services.extract_text(&upload).await?;
    let language = to_document_language(ChunkLanguage::detect(&extracted.text));
    let char_count = extracted.text.chars().count();
    Document::finalize_extraction(&document.id, language, char_count, ctx.db).await?;

    debug!(
        job_id = %ctx.job_id,
        attempt = ctx.attempt,
        document_id = %document.id,
        chars = char_count,
        markers = extracted.markers.len(),
        "document text extracted"
    );

    ctx.document = Some(Document {
        language,
        char_count,
        status: DocumentStatus::Extracted,
        ..document
    });
    ctx.extracted = Some(extracted);

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, owner_id = %ctx.job.owner_id)
)]
pub async fn chunk(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let document = ctx.document()?.clone();
    let text = ctx.extracted()?.text.clone();

    let spans = ctx
        .services
        .chunk(&text, to_chunk_language(document.language))?;

    debug!(
        job_id = %ctx.job_id,
        attempt = ctx.attempt,
        document_id = %document.id,
        chunk_count = spans.len(),
        "document chunked"
    );

    ctx.chunk_spans = spans;
    Document::set_status(&document.id, DocumentStatus::Chunked, ctx.db).await?;

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, owner_id = %ctx.job.owner_id)
)]
pub async fn embed(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let document = ctx.document()?.clone();
    let extracted = ctx.extracted()?;
    let language = document.language;

    let mut chunks = Vec::with_capacity(ctx.chunk_spans.len());
    for (ordinal, span) in ctx.chunk_spans.iter().enumerate() {
        let embedding = ctx.services.embed(&span.text).await?;
        let metadata = chunk_metadata(extracted, span, language);
        chunks.push(Chunk::new(
            document.id.clone(),
            document.owner_id.clone(),
            u32::try_from(ordinal).unwrap_or(u32::MAX),
            span.text.clone(),
            span.char_start,
            span.char_end,
            embedding,
            metadata,
        ));
    }

    debug!(
        job_id = %ctx.job_id,
        attempt = ctx.attempt,
        document_id = %document.id,
        embedded = chunks.len(),
        "chunks embedded"
    );

    ctx.chunks = chunks;

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, owner_id = %ctx.job.owner_id)
)]
pub async fn persist(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    let document = ctx.document()?.clone();

    Chunk::delete_by_document_id(&document.id, ctx.db).await?;
    Chunk::store_all(&ctx.chunks, ctx.db).await?;
    Document::set_status(&document.id, DocumentStatus::Indexed, ctx.db).await?;

    ctx.services.trigger_rebuild(&document.owner_id).await?;

    debug!(
        job_id = %ctx.job_id,
        attempt = ctx.attempt,
        document_id = %document.id,
        chunk_count = ctx.chunks.len(),
        "ingestion persistence flushed to database"
    );

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}
