#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod pipeline;
pub mod utils;

use chrono::{Duration as ChronoDuration, Utc};
use common::storage::{
    db::SurrealDbClient,
    types::ingest_job::{IngestJob, DEFAULT_LEASE_SECS},
};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let lease_duration = ChronoDuration::seconds(DEFAULT_LEASE_SECS);
    let idle_backoff = Duration::from_millis(500);

    match IngestJob::recover_stale(&db, Utc::now()).await {
        Ok(0) => {}
        Ok(count) => info!(%worker_id, recovered = count, "requeued stale ingestion jobs on startup"),
        Err(err) => error!(%worker_id, error = %err, "failed to sweep stale ingestion jobs on startup"),
    }

    loop {
        match IngestJob::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                info!(
                    %worker_id,
                    %job_id,
                    attempt = job.attempts,
                    "claimed ingestion job"
                );
                if let Err(err) = ingestion_pipeline.process_job(job).await {
                    error!(%worker_id, %job_id, error = %err, "ingestion job failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim ingestion job");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
