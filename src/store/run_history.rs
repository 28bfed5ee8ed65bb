use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::batch_run_queries;
use crate::models::{BatchRun, EngineKind, ProgressStatus, RunScope, RunSource, RunStatus};
use crate::store::StoreError;

/// Durable record of runs and per-(portfolio, date, engine) progress.
/// Status transitions are single-writer: only the owning orchestrator
/// invocation moves its run to a terminal state.
#[async_trait]
pub trait RunHistoryStore: Send + Sync {
    async fn insert_run(
        &self,
        id: Uuid,
        source: RunSource,
        scope: &RunScope,
        backfill: bool,
    ) -> Result<(), StoreError>;

    async fn mark_terminal(
        &self,
        id: Uuid,
        status: RunStatus,
        notes: Option<&str>,
        progress: Option<&serde_json::Value>,
    ) -> Result<(), StoreError>;

    async fn record_progress(
        &self,
        run_id: Uuid,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
        engine: EngineKind,
        status: ProgressStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Startup self-healing: runs stuck in `running` past the timeout become
    /// `auto_expired`. Returns the number of rows flipped.
    async fn expire_stale_runs(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Rolling retention window for history rows.
    async fn prune_history(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn recent_runs(&self, limit: i64) -> Result<Vec<BatchRun>, StoreError>;
}

#[derive(Clone)]
pub struct PgRunHistory {
    pool: PgPool,
}

impl PgRunHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunHistoryStore for PgRunHistory {
    async fn insert_run(
        &self,
        id: Uuid,
        source: RunSource,
        scope: &RunScope,
        backfill: bool,
    ) -> Result<(), StoreError> {
        Ok(batch_run_queries::insert_run(
            &self.pool,
            id,
            source,
            scope.as_str(),
            scope.portfolio_id(),
            backfill,
        )
        .await?)
    }

    async fn mark_terminal(
        &self,
        id: Uuid,
        status: RunStatus,
        notes: Option<&str>,
        progress: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        Ok(batch_run_queries::mark_terminal(&self.pool, id, status, notes, progress).await?)
    }

    async fn record_progress(
        &self,
        run_id: Uuid,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
        engine: EngineKind,
        status: ProgressStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(batch_run_queries::insert_progress(
            &self.pool,
            run_id,
            portfolio_id,
            as_of_date,
            engine,
            status,
            error,
        )
        .await?)
    }

    async fn expire_stale_runs(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(batch_run_queries::expire_stale_runs(&self.pool, older_than).await?)
    }

    async fn prune_history(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(batch_run_queries::prune_history(&self.pool, cutoff).await?)
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<BatchRun>, StoreError> {
        Ok(batch_run_queries::fetch_recent_runs(&self.pool, limit).await?)
    }
}
