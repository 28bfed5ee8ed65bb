use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{BatchRun, EngineKind, ProgressStatus, RunSource, RunStatus};

pub async fn insert_run(
    pool: &PgPool,
    id: Uuid,
    source: RunSource,
    scope: &str,
    portfolio_id: Option<Uuid>,
    backfill: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO batch_runs (id, source, scope, portfolio_id, backfill, started_at, status)
        VALUES ($1, $2, $3, $4, $5, NOW(), 'running')
        "#,
    )
    .bind(id)
    .bind(source)
    .bind(scope)
    .bind(portfolio_id)
    .bind(backfill)
    .execute(pool)
    .await?;
    Ok(())
}

/// Move a run to a terminal status. `completed_at` is set iff terminal, which
/// keeps the terminal-status-iff-completed invariant in one place.
pub async fn mark_terminal(
    pool: &PgPool,
    id: Uuid,
    status: RunStatus,
    notes: Option<&str>,
    progress: Option<&serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE batch_runs
        SET status = $2,
            completed_at = NOW(),
            notes = $3,
            progress = COALESCE($4, progress)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(notes)
    .bind(progress)
    .execute(pool)
    .await?;
    Ok(())
}

/// Flip runs stuck in `running` past the tracker timeout to `auto_expired`.
/// Called at process startup so durable history matches in-memory state.
pub async fn expire_stale_runs(
    pool: &PgPool,
    older_than: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batch_runs
        SET status = 'auto_expired',
            completed_at = NOW(),
            notes = 'expired at startup: run exceeded the tracker timeout'
        WHERE status = 'running' AND started_at < $1
        "#,
    )
    .bind(older_than)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Rolling retention for run history.
pub async fn prune_history(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    sqlx::query(
        r#"
        DELETE FROM batch_run_progress
        WHERE run_id IN (SELECT id FROM batch_runs WHERE started_at < $1)
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    let result = sqlx::query("DELETE FROM batch_runs WHERE started_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// One row per attempted (portfolio, date, engine).
pub async fn insert_progress(
    pool: &PgPool,
    run_id: Uuid,
    portfolio_id: Uuid,
    as_of_date: NaiveDate,
    engine: EngineKind,
    status: ProgressStatus,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO batch_run_progress (run_id, portfolio_id, as_of_date, engine, status, error, committed_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        "#,
    )
    .bind(run_id)
    .bind(portfolio_id)
    .bind(as_of_date)
    .bind(engine.as_str())
    .bind(status)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<BatchRun>, sqlx::Error> {
    sqlx::query_as::<_, BatchRun>(
        r#"
        SELECT id, source, scope, portfolio_id, backfill, started_at,
               completed_at, status, notes, progress
        FROM batch_runs
        ORDER BY started_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
