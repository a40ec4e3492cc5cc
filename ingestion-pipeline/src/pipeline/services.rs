use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{store::StorageManager, types::upload::UploadRecord},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

use crate::{
    chunker::{chunk_text, ChunkLanguage, ChunkSpan},
    utils::{extracted_content::ExtractedContent, file_text_extraction::extract_text_from_file},
};

/// Notified once a document's chunks have been persisted, so the
/// in-memory hybrid index for that owner can be rebuilt off the fresh rows.
/// A trait, not a direct call into the retrieval crate, so this crate
/// doesn't need to depend on its internals.
#[async_trait]
pub trait IndexRebuildTrigger: Send + Sync {
    async fn rebuild(&self, owner_id: &str) -> Result<(), AppError>;
}

pub struct NoopIndexRebuildTrigger;

#[async_trait]
impl IndexRebuildTrigger for NoopIndexRebuildTrigger {
    async fn rebuild(&self, _owner_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn extract_text(&self, upload: &UploadRecord) -> Result<ExtractedContent, AppError>;

    fn chunk(&self, text: &str, language: ChunkLanguage) -> Result<Vec<ChunkSpan>, AppError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;

    async fn trigger_rebuild(&self, owner_id: &str) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    config: AppConfig,
    storage: StorageManager,
    embedding_provider: Arc<EmbeddingProvider>,
    rebuild_trigger: Arc<dyn IndexRebuildTrigger>,
}

impl DefaultPipelineServices {
    pub fn new(
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: AppConfig,
        storage: StorageManager,
        embedding_provider: Arc<EmbeddingProvider>,
        rebuild_trigger: Arc<dyn IndexRebuildTrigger>,
    ) -> Self {
        Self {
            openai_client,
            config,
            storage,
            embedding_provider,
            rebuild_trigger,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn extract_text(&self, upload: &UploadRecord) -> Result<ExtractedContent, AppError> {
        extract_text_from_file(upload, &self.openai_client, &self.config, &self.storage).await
    }

    fn chunk(&self, text: &str, language: ChunkLanguage) -> Result<Vec<ChunkSpan>, AppError> {
        chunk_text(
            text,
            self.config.chunk_max_chars,
            self.config.chunk_overlap,
            language,
        )
        .map_err(|e| AppError::Validation(e.to_string()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.embedding_provider.embed(text).await
    }

    async fn trigger_rebuild(&self, owner_id: &str) -> Result<(), AppError> {
        self.rebuild_trigger.rebuild(owner_id).await
    }
}
