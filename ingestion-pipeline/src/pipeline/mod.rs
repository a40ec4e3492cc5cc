mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{
    DefaultPipelineServices, IndexRebuildTrigger, NoopIndexRebuildTrigger, PipelineServices,
};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_openai::Client;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::ingest_job::{IngestJob, JobStatus},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tracing::{info, warn};

use self::{
    context::PipelineContext,
    stages::{chunk, embed, extract, persist},
    state::ready,
};

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<async_openai::config::OpenAIConfig>>,
        config: AppConfig,
        storage: StorageManager,
        embedding_provider: Arc<EmbeddingProvider>,
        rebuild_trigger: Arc<dyn IndexRebuildTrigger>,
    ) -> Self {
        Self::new_with_config(
            db,
            openai_client,
            config,
            storage,
            embedding_provider,
            rebuild_trigger,
            IngestionConfig::default(),
        )
    }

    pub fn new_with_config(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<async_openai::config::OpenAIConfig>>,
        config: AppConfig,
        storage: StorageManager,
        embedding_provider: Arc<EmbeddingProvider>,
        rebuild_trigger: Arc<dyn IndexRebuildTrigger>,
        pipeline_config: IngestionConfig,
    ) -> Self {
        let services = DefaultPipelineServices::new(
            openai_client,
            config,
            storage,
            embedding_provider,
            rebuild_trigger,
        );
        Self::with_services(db, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(
            job_id = %job.id,
            attempt = job.attempts,
            worker_id = job.worker_id.as_deref().unwrap_or("unknown-worker"),
            owner_id = %job.owner_id
        )
    )]
    pub async fn process_job(&self, job: IngestJob) -> Result<(), AppError> {
        match self.drive_pipeline(&job).await {
            Ok(()) => {
                IngestJob::mark_succeeded(&job.id, &self.db).await?;
                info!(job_id = %job.id, attempt = job.attempts, "ingestion job succeeded");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let next_status = IngestJob::mark_failed(&job.id, reason.clone(), &self.db).await?;

                match next_status {
                    JobStatus::Failed => {
                        warn!(
                            job_id = %job.id,
                            attempt = job.attempts,
                            "ingestion job exhausted retries"
                        );
                    }
                    _ => {
                        let delay = Self::compute_retry_delay(&self.pipeline_config.tuning, job.attempts);
                        warn!(
                            job_id = %job.id,
                            attempt = job.attempts,
                            retry_backoff_secs = delay.as_secs(),
                            "ingestion job failed; requeued"
                        );
                    }
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    /// Exponential backoff for a failed job's next attempt: `base * 2^(attempt-1)`,
    /// capped at `retry_max_delay_secs`. `IngestJob` has no scheduled-retry
    /// field, so this value is advisory (logged for operators) rather than
    /// enforced as a queue-visibility delay.
    fn compute_retry_delay(tuning: &IngestionTuning, attempt: u32) -> Duration {
        let capped_attempt = attempt
            .saturating_sub(1)
            .min(tuning.retry_backoff_cap_exponent);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = tuning.retry_base_delay_secs.saturating_mul(multiplier);
        Duration::from_secs(delay.min(tuning.retry_max_delay_secs))
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(
        skip_all,
        fields(job_id = %job.id, attempt = job.attempts, owner_id = %job.owner_id)
    )]
    async fn drive_pipeline(&self, job: &IngestJob) -> Result<(), AppError> {
        let mut ctx = PipelineContext::new(
            job,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let machine = ready();
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = extract(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let extract_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = chunk(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let chunk_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = embed(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let embed_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = persist(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let persist_duration = stage_start.elapsed();

        let total_duration = pipeline_started.elapsed();
        info!(
            job_id = %ctx.job_id,
            attempt = ctx.attempt,
            total_ms = Self::duration_millis(total_duration),
            extract_ms = Self::duration_millis(extract_duration),
            chunk_ms = Self::duration_millis(chunk_duration),
            embed_ms = Self::duration_millis(embed_duration),
            persist_ms = Self::duration_millis(persist_duration),
            "ingestion pipeline finished"
        );

        Ok(())
    }
}


#[cfg(test)]
mod retry_delay_tests {
    use super::{IngestionPipeline, IngestionTuning};

    #[test]
    fn backoff_doubles_then_caps_at_max_delay() {
        let tuning = IngestionTuning {
            retry_base_delay_secs: 5,
            retry_max_delay_secs: 300,
            retry_backoff_cap_exponent: 6,
        };

        assert_eq!(
            IngestionPipeline::compute_retry_delay(&tuning, 1).as_secs(),
            5
        );
        assert_eq!(
            IngestionPipeline::compute_retry_delay(&tuning, 2).as_secs(),
            10
        );
        assert_eq!(
            IngestionPipeline::compute_retry_delay(&tuning, 4).as_secs(),
            40
        );
        assert_eq!(
            IngestionPipeline::compute_retry_delay(&tuning, 10).as_secs(),
            300
        );
    }
}
