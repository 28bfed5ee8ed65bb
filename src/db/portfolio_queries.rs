use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Portfolio, PortfolioSnapshotRow, Position};

/// Active portfolio ids, ordered for reproducible planning.
pub async fn fetch_active_ids(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id
        FROM portfolios
        WHERE active = TRUE AND deleted_at IS NULL
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn fetch_one(pool: &PgPool, id: Uuid) -> Result<Option<Portfolio>, sqlx::Error> {
    sqlx::query_as::<_, Portfolio>(
        r#"
        SELECT id, owner_id, display_name, active, created_at, deleted_at
        FROM portfolios
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Positions open at `as_of_date` per the entry/exit/expiry window.
pub async fn fetch_open_positions(
    pool: &PgPool,
    portfolio_id: Uuid,
    as_of_date: NaiveDate,
) -> Result<Vec<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>(
        r#"
        SELECT id, portfolio_id, symbol, asset_kind, quantity, entry_price,
               entry_date, exit_date, option_strike, option_expiry,
               investment_class, deleted_at
        FROM positions
        WHERE portfolio_id = $1
          AND deleted_at IS NULL
          AND entry_date <= $2
          AND (exit_date IS NULL OR exit_date > $2)
          AND (asset_kind NOT IN ('option_call', 'option_put')
               OR option_expiry IS NULL OR option_expiry > $2)
        ORDER BY symbol, id
        "#,
    )
    .bind(portfolio_id)
    .bind(as_of_date)
    .fetch_all(pool)
    .await
}

/// Distinct listed symbols across the given portfolios' open positions.
/// Private holdings carry no market symbol and are excluded.
pub async fn fetch_distinct_open_symbols(
    pool: &PgPool,
    portfolio_ids: &[Uuid],
    as_of_date: NaiveDate,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT symbol
        FROM positions
        WHERE portfolio_id = ANY($1)
          AND deleted_at IS NULL
          AND asset_kind <> 'private'
          AND entry_date <= $2
          AND (exit_date IS NULL OR exit_date > $2)
          AND (asset_kind NOT IN ('option_call', 'option_put')
               OR option_expiry IS NULL OR option_expiry > $2)
        ORDER BY symbol
        "#,
    )
    .bind(portfolio_ids)
    .bind(as_of_date)
    .fetch_all(pool)
    .await
}

/// Max snapshot date for a portfolio; drives the per-portfolio watermark.
pub async fn fetch_last_snapshot_date(
    pool: &PgPool,
    portfolio_id: Uuid,
) -> Result<Option<NaiveDate>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<NaiveDate>>(
        r#"
        SELECT MAX(as_of_date)
        FROM portfolio_snapshots
        WHERE portfolio_id = $1
        "#,
    )
    .bind(portfolio_id)
    .fetch_one(pool)
    .await
}

/// Portfolios that already have a snapshot for the date; the per-date filter
/// subtracts these so re-running a completed date is a no-op.
pub async fn fetch_portfolios_with_snapshot_on(
    pool: &PgPool,
    date: NaiveDate,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT DISTINCT portfolio_id
        FROM portfolio_snapshots
        WHERE as_of_date = $1
        "#,
    )
    .bind(date)
    .fetch_all(pool)
    .await
}

pub async fn fetch_snapshot(
    pool: &PgPool,
    portfolio_id: Uuid,
    as_of_date: NaiveDate,
) -> Result<Option<PortfolioSnapshotRow>, sqlx::Error> {
    sqlx::query_as::<_, PortfolioSnapshotRow>(
        r#"
        SELECT portfolio_id, as_of_date, total_value, long_value, short_value,
               gross_exposure, net_exposure, position_count
        FROM portfolio_snapshots
        WHERE portfolio_id = $1 AND as_of_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(as_of_date)
    .fetch_optional(pool)
    .await
}
