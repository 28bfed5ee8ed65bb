use chrono::NaiveDate;
use sqlx::PgPool;

use crate::models::MarketBar;

pub async fn fetch_bar(
    pool: &PgPool,
    symbol: &str,
    date: NaiveDate,
) -> Result<Option<MarketBar>, sqlx::Error> {
    sqlx::query_as::<_, MarketBar>(
        r#"
        SELECT symbol, date, open, high, low, close, volume
        FROM market_data
        WHERE symbol = $1 AND date = $2
        "#,
    )
    .bind(symbol)
    .bind(date)
    .fetch_optional(pool)
    .await
}

/// Bars for `[from, to]`, ascending by date.
pub async fn fetch_range(
    pool: &PgPool,
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<MarketBar>, sqlx::Error> {
    sqlx::query_as::<_, MarketBar>(
        r#"
        SELECT symbol, date, open, high, low, close, volume
        FROM market_data
        WHERE symbol = $1 AND date BETWEEN $2 AND $3
        ORDER BY date ASC
        "#,
    )
    .bind(symbol)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await
}

/// Idempotent upsert by (symbol, date); one transaction for the whole batch.
pub async fn upsert_bars(pool: &PgPool, bars: &[MarketBar]) -> Result<u64, sqlx::Error> {
    if bars.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut written = 0u64;

    for bar in bars {
        let result = sqlx::query(
            r#"
            INSERT INTO market_data (symbol, date, open, high, low, close, volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (symbol, date)
            DO UPDATE SET
                open = EXCLUDED.open,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                close = EXCLUDED.close,
                volume = EXCLUDED.volume
            "#,
        )
        .bind(&bar.symbol)
        .bind(bar.date)
        .bind(&bar.open)
        .bind(&bar.high)
        .bind(&bar.low)
        .bind(&bar.close)
        .bind(bar.volume)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}

/// Valid-bar count in `[from, to]`; drives engine coverage checks.
pub async fn count_bars_in_range(
    pool: &PgPool,
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM market_data
        WHERE symbol = $1 AND date BETWEEN $2 AND $3 AND close > 0
        "#,
    )
    .bind(symbol)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await
}
