use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{
    CorrelationMatrixRow, DiversificationRow, PortfolioSnapshotRow, PositionFactorExposureRow,
    PositionGreeksRow, PositionMarketBetaRow, PositionVolatilityRow, ResultBatch, StressTestRow,
};

/// Upsert one engine's output in a single transaction. All-or-nothing: a
/// failure on any row rolls the whole batch back.
pub async fn upsert_batch(pool: &PgPool, batch: &ResultBatch) -> Result<u64, sqlx::Error> {
    if batch.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let written = match batch {
        ResultBatch::Greeks(rows) => upsert_greeks(&mut tx, rows).await?,
        ResultBatch::Volatility(rows) => upsert_volatility(&mut tx, rows).await?,
        ResultBatch::MarketBeta(rows) => upsert_market_beta(&mut tx, rows).await?,
        ResultBatch::FactorExposure(rows) => upsert_factor_exposures(&mut tx, rows).await?,
        ResultBatch::Correlations(rows) => upsert_correlations(&mut tx, rows).await?,
        ResultBatch::Snapshot(rows) => upsert_snapshots(&mut tx, rows).await?,
        ResultBatch::StressTest(rows) => upsert_stress_tests(&mut tx, rows).await?,
        ResultBatch::Diversification(rows) => upsert_diversification(&mut tx, rows).await?,
    };
    tx.commit().await?;
    Ok(written)
}

async fn upsert_greeks(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[PositionGreeksRow],
) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO position_greeks (
                position_id, as_of_date, delta, gamma, theta, vega, rho,
                underlying_price, implied_vol, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (position_id, as_of_date)
            DO UPDATE SET
                delta = EXCLUDED.delta,
                gamma = EXCLUDED.gamma,
                theta = EXCLUDED.theta,
                vega = EXCLUDED.vega,
                rho = EXCLUDED.rho,
                underlying_price = EXCLUDED.underlying_price,
                implied_vol = EXCLUDED.implied_vol,
                computed_at = NOW()
            "#,
        )
        .bind(row.position_id)
        .bind(row.as_of_date)
        .bind(row.delta)
        .bind(row.gamma)
        .bind(row.theta)
        .bind(row.vega)
        .bind(row.rho)
        .bind(row.underlying_price)
        .bind(row.implied_vol)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

async fn upsert_volatility(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[PositionVolatilityRow],
) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO position_volatility (
                position_id, as_of_date, realized_vol, max_drawdown,
                lookback_days, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (position_id, as_of_date)
            DO UPDATE SET
                realized_vol = EXCLUDED.realized_vol,
                max_drawdown = EXCLUDED.max_drawdown,
                lookback_days = EXCLUDED.lookback_days,
                computed_at = NOW()
            "#,
        )
        .bind(row.position_id)
        .bind(row.as_of_date)
        .bind(row.realized_vol)
        .bind(row.max_drawdown)
        .bind(row.lookback_days)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

async fn upsert_market_beta(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[PositionMarketBetaRow],
) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO position_market_beta (
                position_id, as_of_date, benchmark, beta, r_squared,
                observations, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (position_id, as_of_date)
            DO UPDATE SET
                benchmark = EXCLUDED.benchmark,
                beta = EXCLUDED.beta,
                r_squared = EXCLUDED.r_squared,
                observations = EXCLUDED.observations,
                computed_at = NOW()
            "#,
        )
        .bind(row.position_id)
        .bind(row.as_of_date)
        .bind(&row.benchmark)
        .bind(row.beta)
        .bind(row.r_squared)
        .bind(row.observations)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

async fn upsert_factor_exposures(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[PositionFactorExposureRow],
) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO position_factor_exposures (
                position_id, as_of_date, factor, exposure, r_squared, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (position_id, as_of_date, factor)
            DO UPDATE SET
                exposure = EXCLUDED.exposure,
                r_squared = EXCLUDED.r_squared,
                computed_at = NOW()
            "#,
        )
        .bind(row.position_id)
        .bind(row.as_of_date)
        .bind(&row.factor)
        .bind(row.exposure)
        .bind(row.r_squared)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

async fn upsert_correlations(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[CorrelationMatrixRow],
) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO correlation_matrices (
                portfolio_id, as_of_date, symbols, matrix, observations, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (portfolio_id, as_of_date)
            DO UPDATE SET
                symbols = EXCLUDED.symbols,
                matrix = EXCLUDED.matrix,
                observations = EXCLUDED.observations,
                computed_at = NOW()
            "#,
        )
        .bind(row.portfolio_id)
        .bind(row.as_of_date)
        .bind(&row.symbols)
        .bind(&row.matrix)
        .bind(row.observations)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

async fn upsert_snapshots(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[PortfolioSnapshotRow],
) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots (
                portfolio_id, as_of_date, total_value, long_value, short_value,
                gross_exposure, net_exposure, position_count, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (portfolio_id, as_of_date)
            DO UPDATE SET
                total_value = EXCLUDED.total_value,
                long_value = EXCLUDED.long_value,
                short_value = EXCLUDED.short_value,
                gross_exposure = EXCLUDED.gross_exposure,
                net_exposure = EXCLUDED.net_exposure,
                position_count = EXCLUDED.position_count,
                computed_at = NOW()
            "#,
        )
        .bind(row.portfolio_id)
        .bind(row.as_of_date)
        .bind(&row.total_value)
        .bind(&row.long_value)
        .bind(&row.short_value)
        .bind(&row.gross_exposure)
        .bind(&row.net_exposure)
        .bind(row.position_count)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

async fn upsert_stress_tests(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[StressTestRow],
) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO stress_test_results (
                portfolio_id, as_of_date, scenario, shocked_value, pnl,
                pnl_pct, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (portfolio_id, as_of_date, scenario)
            DO UPDATE SET
                shocked_value = EXCLUDED.shocked_value,
                pnl = EXCLUDED.pnl,
                pnl_pct = EXCLUDED.pnl_pct,
                computed_at = NOW()
            "#,
        )
        .bind(row.portfolio_id)
        .bind(row.as_of_date)
        .bind(&row.scenario)
        .bind(row.shocked_value)
        .bind(row.pnl)
        .bind(row.pnl_pct)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

async fn upsert_diversification(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[DiversificationRow],
) -> Result<u64, sqlx::Error> {
    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO diversification_scores (
                portfolio_id, as_of_date, score, effective_positions,
                avg_correlation, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (portfolio_id, as_of_date)
            DO UPDATE SET
                score = EXCLUDED.score,
                effective_positions = EXCLUDED.effective_positions,
                avg_correlation = EXCLUDED.avg_correlation,
                computed_at = NOW()
            "#,
        )
        .bind(row.portfolio_id)
        .bind(row.as_of_date)
        .bind(row.score)
        .bind(row.effective_positions)
        .bind(row.avg_correlation)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

/// Committed factor exposures for a portfolio's open positions on a date.
/// The aggregation engines read these back rather than trusting in-memory
/// state, so they only ever see committed rows.
pub async fn fetch_factor_exposures(
    pool: &PgPool,
    portfolio_id: Uuid,
    as_of_date: NaiveDate,
) -> Result<Vec<PositionFactorExposureRow>, sqlx::Error> {
    sqlx::query_as::<_, PositionFactorExposureRow>(
        r#"
        SELECT fe.position_id, fe.as_of_date, fe.factor, fe.exposure, fe.r_squared
        FROM position_factor_exposures fe
        INNER JOIN positions p ON p.id = fe.position_id
        WHERE p.portfolio_id = $1 AND fe.as_of_date = $2
        ORDER BY fe.position_id, fe.factor
        "#,
    )
    .bind(portfolio_id)
    .bind(as_of_date)
    .fetch_all(pool)
    .await
}

pub async fn fetch_correlation_matrix(
    pool: &PgPool,
    portfolio_id: Uuid,
    as_of_date: NaiveDate,
) -> Result<Option<CorrelationMatrixRow>, sqlx::Error> {
    sqlx::query_as::<_, CorrelationMatrixRow>(
        r#"
        SELECT portfolio_id, as_of_date, symbols, matrix, observations
        FROM correlation_matrices
        WHERE portfolio_id = $1 AND as_of_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(as_of_date)
    .fetch_optional(pool)
    .await
}
