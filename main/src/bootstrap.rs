//! Shared component wiring for the `server`, `worker`, and `consult`
//! binaries. Each binary only needs a subset of this, but building
//! everything from one function keeps the three entry points from drifting
//! out of sync with each other as dependencies are added.

use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use ingestion_pipeline::pipeline::{IndexRebuildTrigger, IngestionPipeline};
use retrieval_pipeline::{
    index::HybridIndexRegistry, metrics::MetricsRegistry, orchestrator::QueryOrchestrator,
    rate_limiter::SlidingWindowLimiter, reranking::RerankerClient, streaming::StreamingBridge,
};

/// Bridges the ingestion pipeline's generic rebuild hook to this service's
/// concrete per-owner hybrid index, so `ingestion-pipeline` never has to
/// depend on `retrieval-pipeline`.
struct HybridIndexRebuildTrigger {
    db: Arc<SurrealDbClient>,
    index_registry: Arc<HybridIndexRegistry>,
}

#[async_trait]
impl IndexRebuildTrigger for HybridIndexRebuildTrigger {
    async fn rebuild(&self, owner_id: &str) -> Result<(), AppError> {
        self.index_registry.rebuild(owner_id, &self.db).await
    }
}

/// Every shared dependency a binary may need, built once from config.
pub struct AppComponents {
    pub config: AppConfig,
    pub db: Arc<SurrealDbClient>,
    pub storage: StorageManager,
    pub index_registry: Arc<HybridIndexRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub streaming: Arc<StreamingBridge>,
    pub ingestion_pipeline: Arc<IngestionPipeline>,
    pub query_limiter: Arc<SlidingWindowLimiter>,
    pub ingest_limiter: Arc<SlidingWindowLimiter>,
}

pub async fn build(config: AppConfig) -> Result<AppComponents, Box<dyn std::error::Error>> {
    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let storage = StorageManager::new(&config).await?;

    let openai_client = Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );
    let embedding_provider = Arc::new(EmbeddingProvider::from_config(
        &config,
        Some(openai_client.clone()),
    ));
    let openai_client = Arc::new(openai_client);

    let metrics = Arc::new(MetricsRegistry::default());
    let index_registry = Arc::new(HybridIndexRegistry::new());
    let reranker = Arc::new(RerankerClient::new(&config, metrics.clone()));

    let orchestrator = Arc::new(QueryOrchestrator::new(
        db.clone(),
        index_registry.clone(),
        reranker,
        metrics.clone(),
        embedding_provider.clone(),
        openai_client.clone(),
        config.chat_model.clone(),
    ));
    let streaming = Arc::new(StreamingBridge::new(orchestrator.clone()));

    let rebuild_trigger: Arc<dyn IndexRebuildTrigger> = Arc::new(HybridIndexRebuildTrigger {
        db: db.clone(),
        index_registry: index_registry.clone(),
    });
    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        openai_client,
        config.clone(),
        storage.clone(),
        embedding_provider,
        rebuild_trigger,
    ));

    // `AppConfig` carries a single global rate budget rather than one per
    // endpoint class; query and ingest each get their own bucket of
    // independent state from the same limit/window pair.
    let query_limiter = Arc::new(SlidingWindowLimiter::new(
        config.rate_limit as usize,
        Duration::from_secs(config.rate_window_secs),
    ));
    let ingest_limiter = Arc::new(SlidingWindowLimiter::new(
        config.rate_limit as usize,
        Duration::from_secs(config.rate_window_secs),
    ));

    Ok(AppComponents {
        config,
        db,
        storage,
        index_registry,
        metrics,
        orchestrator,
        streaming,
        ingestion_pipeline,
        query_limiter,
        ingest_limiter,
    })
}
