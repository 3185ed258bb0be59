//! The job manager (C3): durable job records with cache-first reads and a
//! durable-store fallback, per §4.3.
//!
//! `SqliteJobStore` is the system of record; `JobManager` dual-writes every
//! transition to both the store and the `JobActive`/`JobTerminal` cache tier
//! (per `cache_keys::CacheKind`), and reads cache-first, falling back to the
//! store on a miss — the same cache-aside shape `SqliteItemStore` and
//! `SqliteGraphStore` use for their own reads, generalized here to a single
//! record instead of a filtered set.

use pirex_core::jobs::{estimated_seconds_remaining, progress_percent};
use pirex_types::{CacheConfig, Job, JobId, JobKind, JobStatus, PirexError, Result};
use sqlx::{Row, SqlitePool};

use crate::cache_keys::{self, CacheKind};
use crate::stores::kv::{get_json, set_json, TieredCache};

#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;
    async fn update(&self, job: &Job) -> Result<()>;
    async fn get(&self, id: JobId) -> Result<Job>;
}

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                total INTEGER NOT NULL,
                processed INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                error TEXT,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PirexError::transient(format!("schema init failed: {e}")))?;
        Ok(())
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
        let kind_str: String = row.try_get("kind").map_err(|e| PirexError::fatal(e.to_string()))?;
        let status_str: String = row.try_get("status").map_err(|e| PirexError::fatal(e.to_string()))?;
        let kind: JobKind = serde_json::from_str(&format!("\"{kind_str}\"")).map_err(|e| PirexError::fatal(e.to_string()))?;
        let status: JobStatus = serde_json::from_str(&format!("\"{status_str}\"")).map_err(|e| PirexError::fatal(e.to_string()))?;
        let detail_str: String = row.try_get("detail").unwrap_or_default();

        Ok(Job {
            id: row.try_get("id").map_err(|e| PirexError::fatal(e.to_string()))?,
            kind,
            status,
            total: row.try_get::<i64, _>("total").map_err(|e| PirexError::fatal(e.to_string()))? as u64,
            processed: row.try_get::<i64, _>("processed").map_err(|e| PirexError::fatal(e.to_string()))? as u64,
            failed: row.try_get::<i64, _>("failed").map_err(|e| PirexError::fatal(e.to_string()))? as u64,
            error: row.try_get("error").ok(),
            created_at: row.try_get("created_at").map_err(|e| PirexError::fatal(e.to_string()))?,
            updated_at: row.try_get("updated_at").map_err(|e| PirexError::fatal(e.to_string()))?,
            detail: serde_json::from_str(&detail_str).unwrap_or_default(),
        })
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.update(job).await
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let kind_str = serde_json::to_string(&job.kind).map_err(|e| PirexError::fatal(e.to_string()))?.trim_matches('"').to_string();
        let status_str = serde_json::to_string(&job.status).map_err(|e| PirexError::fatal(e.to_string()))?.trim_matches('"').to_string();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, status, total, processed, failed, error, detail, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                total = excluded.total,
                processed = excluded.processed,
                failed = excluded.failed,
                error = excluded.error,
                detail = excluded.detail,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(job.id)
        .bind(kind_str)
        .bind(status_str)
        .bind(job.total as i64)
        .bind(job.processed as i64)
        .bind(job.failed as i64)
        .bind(&job.error)
        .bind(serde_json::to_string(&job.detail).unwrap_or_default())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PirexError::transient(format!("job upsert failed: {e}")))?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PirexError::transient(format!("job lookup failed: {e}")))?
            .ok_or_else(|| PirexError::not_found(format!("job {id} not found")))?;
        Self::row_to_job(&row)
    }
}

/// A job's progress rendered for the external `GetJob` view, per §4.3.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobProgress {
    pub job: Job,
    pub progress_percent: u64,
    pub estimated_seconds_remaining: Option<f64>,
}

pub struct JobManager<S: JobStore> {
    store: S,
    cache: crate::stores::kv::SharedCache,
    cache_config: CacheConfig,
}

impl<S: JobStore> JobManager<S> {
    pub fn new(store: S, cache: crate::stores::kv::SharedCache, cache_config: CacheConfig) -> Self {
        Self { store, cache, cache_config }
    }

    fn cache_kind(job: &Job) -> CacheKind {
        if job.status.is_terminal() {
            CacheKind::JobTerminal
        } else {
            CacheKind::JobActive
        }
    }

    async fn write_through(&self, job: &Job) -> Result<()> {
        self.store.update(job).await?;
        let kind = Self::cache_kind(job);
        set_json(self.cache.as_ref(), kind.tier(), &cache_keys::job_key(job.id), job, kind.ttl(&self.cache_config)).await;
        Ok(())
    }

    pub async fn create(&self, kind: JobKind, total: u64) -> Result<Job> {
        let now = pirex_types::now();
        let job = Job {
            id: pirex_types::new_id(),
            kind,
            status: JobStatus::Queued,
            total,
            processed: 0,
            failed: 0,
            error: None,
            created_at: now,
            updated_at: now,
            detail: Default::default(),
        };
        self.write_through(&job).await?;
        Ok(job)
    }

    /// Cache-first read with a durable-store fallback, per §4.1's stores
    /// abstraction and §4.3's job-view contract.
    pub async fn get(&self, id: JobId) -> Result<JobProgress> {
        let job = if let Some(job) = get_json::<Job>(self.cache.as_ref(), CacheKind::JobActive.tier(), &cache_keys::job_key(id)).await {
            job
        } else {
            self.store.get(id).await?
        };

        let elapsed = (job.updated_at - job.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        Ok(JobProgress {
            progress_percent: progress_percent(job.processed, job.failed, job.total),
            estimated_seconds_remaining: estimated_seconds_remaining(elapsed, job.processed, job.failed, job.total),
            job,
        })
    }

    /// Attempt `status -> next`, rejecting illegal transitions per
    /// `JobStatus::can_transition_to`.
    pub async fn transition(&self, id: JobId, next: JobStatus) -> Result<Job> {
        let mut job = self.store.get(id).await?;
        if !job.status.can_transition_to(next) {
            return Err(PirexError::validation(format!("illegal job transition {:?} -> {:?}", job.status, next)));
        }
        job.status = next;
        job.updated_at = pirex_types::now();
        self.write_through(&job).await?;
        Ok(job)
    }

    pub async fn record_progress(&self, id: JobId, processed_delta: u64, failed_delta: u64) -> Result<Job> {
        let mut job = self.store.get(id).await?;
        job.processed += processed_delta;
        job.failed += failed_delta;
        job.updated_at = pirex_types::now();
        self.write_through(&job).await?;
        Ok(job)
    }

    pub async fn fail(&self, id: JobId, error: String) -> Result<Job> {
        let mut job = self.store.get(id).await?;
        if !job.status.can_transition_to(JobStatus::Failed) {
            return Err(PirexError::validation(format!("job {id} cannot fail from {:?}", job.status)));
        }
        job.status = JobStatus::Failed;
        job.error = Some(error);
        job.updated_at = pirex_types::now();
        self.write_through(&job).await?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::kv::InMemoryTieredCache;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn manager() -> JobManager<SqliteJobStore> {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let store = SqliteJobStore::new(pool).await.unwrap();
        let cache: crate::stores::kv::SharedCache = Arc::new(InMemoryTieredCache::new());
        JobManager::new(store, cache, CacheConfig::default())
    }

    #[tokio::test]
    async fn create_then_get_round_trips_via_cache() {
        let mgr = manager().await;
        let job = mgr.create(JobKind::Batch, 10).await.unwrap();
        let progress = mgr.get(job.id).await.unwrap();
        assert_eq!(progress.job.status, JobStatus::Queued);
        assert_eq!(progress.progress_percent, 0);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let mgr = manager().await;
        let job = mgr.create(JobKind::Single, 1).await.unwrap();
        let result = mgr.transition(job.id, JobStatus::Completed).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn legal_transition_chain_reaches_completed() {
        let mgr = manager().await;
        let job = mgr.create(JobKind::Single, 1).await.unwrap();
        mgr.transition(job.id, JobStatus::Processing).await.unwrap();
        mgr.record_progress(job.id, 1, 0).await.unwrap();
        let done = mgr.transition(job.id, JobStatus::Completed).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let progress = mgr.get(job.id).await.unwrap();
        assert_eq!(progress.progress_percent, 100);
    }
}
