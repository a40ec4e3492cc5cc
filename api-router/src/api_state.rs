use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::{
    index::HybridIndexRegistry, metrics::MetricsRegistry, orchestrator::QueryOrchestrator,
    rate_limiter::SlidingWindowLimiter, streaming::StreamingBridge,
};

/// All shared, already-constructed dependencies a route handler may need.
/// Built once in `main` and cloned cheaply (every field is an `Arc` or a
/// small value type) into each request.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub index_registry: Arc<HybridIndexRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub streaming: Arc<StreamingBridge>,
    pub ingestion_pipeline: Arc<IngestionPipeline>,
    pub query_limiter: Arc<SlidingWindowLimiter>,
    pub ingest_limiter: Arc<SlidingWindowLimiter>,
}

#[allow(clippy::too_many_arguments)]
impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        storage: StorageManager,
        index_registry: Arc<HybridIndexRegistry>,
        metrics: Arc<MetricsRegistry>,
        orchestrator: Arc<QueryOrchestrator>,
        streaming: Arc<StreamingBridge>,
        ingestion_pipeline: Arc<IngestionPipeline>,
        query_limiter: Arc<SlidingWindowLimiter>,
        ingest_limiter: Arc<SlidingWindowLimiter>,
    ) -> Self {
        Self {
            db,
            config,
            storage,
            index_registry,
            metrics,
            orchestrator,
            streaming,
            ingestion_pipeline,
            query_limiter,
            ingest_limiter,
        }
    }
}
