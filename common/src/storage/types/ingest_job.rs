use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LEASE_SECS: i64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// What a job replays if re-run: the upload it ingests. Kept as its own
/// struct (rather than a flat `upload_id` field) so the job record carries
/// a self-contained payload independent of any other field on `IngestJob`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestPayload {
    pub upload_id: String,
}

stored_object!(IngestJob, "ingest_job", {
    owner_id: String,
    payload: IngestPayload,
    /// Principal that enqueued the job. Usually equal to `owner_id` (the
    /// caller ingesting into their own scope), but kept distinct since an
    /// admin-triggered ingest acts on behalf of a different owner.
    actor: String,
    status: JobStatus,
    attempts: u32,
    max_attempts: u32,
    worker_id: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_error: Option<String>
});

impl IngestJob {
    pub fn new(upload_id: String, owner_id: String, actor: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            payload: IngestPayload { upload_id },
            actor,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            worker_id: None,
            lease_expires_at: None,
            queued_at: now,
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.payload.upload_id
    }

    pub async fn enqueue(
        upload_id: String,
        owner_id: String,
        actor: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let job = Self::new(upload_id, owner_id, actor);
        db.store_item(job.clone()).await?;
        AuditEntry::append(&job.id, None, JobStatus::Queued, "enqueue", None, db).await?;
        Ok(job)
    }

    /// Atomically claims the oldest queued job (or a job whose lease has
    /// expired), bumping `attempts` and stamping a fresh lease and
    /// `started_at`. The select and the guarded update run in a single
    /// transaction so two workers racing on `claim_next_ready` can't both
    /// win the same job.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Self>, AppError> {
        let lease_expires_at = now + lease;
        let query = r"
            BEGIN TRANSACTION;
            LET $candidate = (
                SELECT * FROM type::table($table)
                WHERE status = 'queued'
                   OR (status = 'running' AND lease_expires_at < $now)
                ORDER BY queued_at ASC
                LIMIT 1
            );
            UPDATE $candidate[0].id SET
                status = 'running',
                worker_id = $worker_id,
                attempts += 1,
                lease_expires_at = $lease_expires_at,
                started_at = $now,
                updated_at = $now
            WHERE status = 'queued' OR (status = 'running' AND lease_expires_at < $now);
            COMMIT TRANSACTION;
            RETURN $candidate;
        ";

        let mut response = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("now", now))
            .bind(("lease_expires_at", lease_expires_at))
            .await?;

        let candidates: Vec<Self> = response.take(0)?;
        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let claimed: Option<Self> = db.get_item(&candidate.id).await?;
        Ok(claimed)
    }

    pub async fn mark_succeeded(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let job: Option<Self> = db.get_item(id).await?;
        let from = job.map(|j| j.status);
        let now = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", JobStatus::Succeeded))
            .patch(PatchOp::replace("/completed_at", Some(now)))
            .patch(PatchOp::replace("/updated_at", surrealdb::Datetime::from(now)))
            .await?;

        AuditEntry::append(id, from, JobStatus::Succeeded, "completed", None, db).await?;
        Ok(())
    }

    /// Records a failed attempt. Requeues if attempts remain below
    /// `max_attempts`, otherwise moves to `failed` permanently and stamps
    /// `completed_at`.
    pub async fn mark_failed(
        id: &str,
        error: String,
        db: &SurrealDbClient,
    ) -> Result<JobStatus, AppError> {
        let job: Option<Self> = db.get_item(id).await?;
        let Some(job) = job else {
            return Err(AppError::NotFound(format!("ingest job {id} not found")));
        };

        let next_status = if job.attempts >= job.max_attempts {
            JobStatus::Failed
        } else {
            JobStatus::Queued
        };
        let now = Utc::now();
        let completed_at = matches!(next_status, JobStatus::Failed).then_some(now);

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", next_status.clone()))
            .patch(PatchOp::replace("/last_error", Some(error.clone())))
            .patch(PatchOp::replace("/completed_at", completed_at))
            .patch(PatchOp::replace("/updated_at", surrealdb::Datetime::from(now)))
            .await?;

        let action = match next_status {
            JobStatus::Failed => "exhausted retries",
            _ => "retry scheduled",
        };
        AuditEntry::append(
            id,
            Some(job.status),
            next_status.clone(),
            action,
            Some(error),
            db,
        )
        .await?;

        Ok(next_status)
    }

    /// Cancels a job an owner no longer wants run. Only `queued` or
    /// `running` jobs can be cancelled; a job that already reached a
    /// terminal state is left untouched and an error is returned.
    pub async fn cancel(id: &str, owner_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let job: Option<Self> = db.get_item(id).await?;
        let Some(job) = job else {
            return Err(AppError::NotFound(format!("ingest job {id} not found")));
        };
        if job.owner_id != owner_id {
            return Err(AppError::Auth("caller does not own this job".to_string()));
        }
        if !matches!(job.status, JobStatus::Queued | JobStatus::Running) {
            return Err(AppError::Validation(format!(
                "job {id} is already in a terminal state ({:?})",
                job.status
            )));
        }

        let now = Utc::now();
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", JobStatus::Cancelled))
            .patch(PatchOp::replace("/completed_at", Some(now)))
            .patch(PatchOp::replace("/updated_at", surrealdb::Datetime::from(now)))
            .await?;

        AuditEntry::append(
            id,
            Some(job.status),
            JobStatus::Cancelled,
            "cancelled by owner",
            None,
            db,
        )
        .await?;
        Ok(())
    }

    /// One-shot sweep run at worker startup: any job stuck `running` past
    /// its lease is requeued so a crashed worker doesn't strand it.
    pub async fn recover_stale(db: &SurrealDbClient, now: DateTime<Utc>) -> Result<usize, AppError> {
        let stale: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE status = 'running' AND lease_expires_at < $now",
            )
            .bind(("table", Self::table_name()))
            .bind(("now", now))
            .await?
            .take(0)?;

        let count = stale.len();
        for job in stale {
            let _updated: Option<Self> = db
                .update((Self::table_name(), job.id.clone()))
                .patch(PatchOp::replace("/status", JobStatus::Queued))
                .patch(PatchOp::replace("/worker_id", Option::<String>::None))
                .await?;
            AuditEntry::append(
                &job.id,
                Some(JobStatus::Running),
                JobStatus::Queued,
                "restart recovery sweep",
                None,
                db,
            )
            .await?;
        }
        Ok(count)
    }
}

stored_object!(AuditEntry, "ingest_job_audit", {
    job_id: String,
    from_status: Option<JobStatus>,
    to_status: JobStatus,
    actor: String,
    detail: Option<String>
});

impl AuditEntry {
    pub async fn append(
        job_id: &str,
        from_status: Option<JobStatus>,
        to_status: JobStatus,
        actor: &str,
        detail: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let entry = Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            job_id: job_id.to_string(),
            from_status,
            to_status,
            actor: actor.to_string(),
            detail,
        };
        db.store_item(entry).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized().await.unwrap();
        db
    }

    #[tokio::test]
    async fn enqueue_writes_audit_entry() {
        let db = test_db().await;
        let job = IngestJob::enqueue("upload-1".into(), "owner-1".into(), "owner-1".into(), &db)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.upload_id(), "upload-1");
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn claim_next_ready_returns_oldest_queued_and_bumps_attempts() {
        let db = test_db().await;
        let job = IngestJob::enqueue("upload-1".into(), "owner-1".into(), "owner-1".into(), &db)
            .await
            .unwrap();

        let claimed = IngestJob::claim_next_ready(&db, "worker-a", Utc::now(), Duration::seconds(60))
            .await
            .unwrap()
            .expect("job claimed");

        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-a"));
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn claim_next_ready_is_empty_when_nothing_queued() {
        let db = test_db().await;
        let claimed = IngestJob::claim_next_ready(&db, "worker-a", Utc::now(), Duration::seconds(60))
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn mark_succeeded_stamps_completed_at() {
        let db = test_db().await;
        let job = IngestJob::enqueue("upload-1".into(), "owner-1".into(), "owner-1".into(), &db)
            .await
            .unwrap();
        IngestJob::mark_succeeded(&job.id, &db).await.unwrap();

        let fetched: IngestJob = db.get_item(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Succeeded);
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn mark_failed_requeues_until_max_attempts_then_fails() {
        let db = test_db().await;
        let job = IngestJob::enqueue("upload-1".into(), "owner-1".into(), "owner-1".into(), &db)
            .await
            .unwrap();

        for _ in 0..MAX_ATTEMPTS {
            IngestJob::claim_next_ready(&db, "worker-a", Utc::now(), Duration::seconds(60))
                .await
                .unwrap();
            let status = IngestJob::mark_failed(&job.id, "boom".into(), &db)
                .await
                .unwrap();
            if status == JobStatus::Failed {
                break;
            }
        }

        let final_job: IngestJob = db.get_item(&job.id).await.unwrap().unwrap();
        assert_eq!(final_job.status, JobStatus::Failed);
        assert!(final_job.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_moves_queued_job_to_cancelled() {
        let db = test_db().await;
        let job = IngestJob::enqueue("upload-1".into(), "owner-1".into(), "owner-1".into(), &db)
            .await
            .unwrap();

        IngestJob::cancel(&job.id, "owner-1", &db).await.unwrap();

        let fetched: IngestJob = db.get_item(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Cancelled);
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_rejects_a_job_already_terminal() {
        let db = test_db().await;
        let job = IngestJob::enqueue("upload-1".into(), "owner-1".into(), "owner-1".into(), &db)
            .await
            .unwrap();
        IngestJob::mark_succeeded(&job.id, &db).await.unwrap();

        let result = IngestJob::cancel(&job.id, "owner-1", &db).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_rejects_a_non_owner() {
        let db = test_db().await;
        let job = IngestJob::enqueue("upload-1".into(), "owner-1".into(), "owner-1".into(), &db)
            .await
            .unwrap();

        let result = IngestJob::cancel(&job.id, "intruder", &db).await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn recover_stale_requeues_expired_leases() {
        let db = test_db().await;
        let job = IngestJob::enqueue("upload-1".into(), "owner-1".into(), "owner-1".into(), &db)
            .await
            .unwrap();
        IngestJob::claim_next_ready(
            &db,
            "worker-a",
            Utc::now() - Duration::seconds(600),
            Duration::seconds(1),
        )
        .await
        .unwrap();

        let recovered = IngestJob::recover_stale(&db, Utc::now()).await.unwrap();
        assert_eq!(recovered, 1);

        let after: IngestJob = db.get_item(&job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Queued);
    }
}
