use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::db::market_data_queries;
use crate::models::MarketBar;
use crate::store::StoreError;

/// Date-keyed OHLCV cache. Read paths never touch the network; the
/// orchestrator's market data preparation phase is the only writer.
#[async_trait]
pub trait MarketDataCache: Send + Sync {
    async fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<MarketBar>, StoreError>;

    /// Idempotent upsert by (symbol, date).
    async fn put_many(&self, bars: &[MarketBar]) -> Result<u64, StoreError>;

    /// Bars in `[from, to]`, ascending by date.
    async fn range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketBar>, StoreError>;

    /// Count of valid bars in `[from, to]`.
    async fn coverage(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64, StoreError>;
}

#[derive(Clone)]
pub struct PgMarketDataCache {
    pool: PgPool,
}

impl PgMarketDataCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketDataCache for PgMarketDataCache {
    async fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<MarketBar>, StoreError> {
        Ok(market_data_queries::fetch_bar(&self.pool, symbol, date).await?)
    }

    async fn put_many(&self, bars: &[MarketBar]) -> Result<u64, StoreError> {
        Ok(market_data_queries::upsert_bars(&self.pool, bars).await?)
    }

    async fn range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketBar>, StoreError> {
        Ok(market_data_queries::fetch_range(&self.pool, symbol, from, to).await?)
    }

    async fn coverage(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64, StoreError> {
        Ok(market_data_queries::count_bars_in_range(&self.pool, symbol, from, to).await?)
    }
}
