use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{chunk::Chunk, document::Document, ingest_job::IngestJob},
    },
};
use tracing::error;

use crate::{chunker::ChunkSpan, utils::extracted_content::ExtractedContent};

use super::{config::IngestionConfig, services::PipelineServices};

pub struct PipelineContext<'a> {
    pub job: &'a IngestJob,
    pub job_id: String,
    pub attempt: u32,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub document: Option<Document>,
    pub extracted: Option<ExtractedContent>,
    pub chunk_spans: Vec<ChunkSpan>,
    pub chunks: Vec<Chunk>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        job: &'a IngestJob,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        let job_id = job.id.clone();
        let attempt = job.attempts;
        Self {
            job,
            job_id,
            attempt,
            db,
            pipeline_config,
            services,
            document: None,
            extracted: None,
            chunk_spans: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn document(&self) -> Result<&Document, AppError> {
        self.document
            .as_ref()
            .ok_or_else(|| AppError::InternalError("document expected to be available".into()))
    }

    pub fn extracted(&self) -> Result<&ExtractedContent, AppError> {
        self.extracted.as_ref().ok_or_else(|| {
            AppError::InternalError("extracted content expected to be available".into())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            job_id = %self.job_id,
            attempt = self.attempt,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
