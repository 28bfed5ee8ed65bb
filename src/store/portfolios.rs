use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{portfolio_queries, result_queries};
use crate::models::{
    CorrelationMatrixRow, Portfolio, PortfolioSnapshotRow, Position, PositionFactorExposureRow,
    ResultBatch,
};
use crate::store::StoreError;

#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    /// Active portfolio ids in a stable order.
    async fn list_active_portfolios(&self) -> Result<Vec<Uuid>, StoreError>;

    async fn fetch_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>, StoreError>;

    async fn open_positions(
        &self,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
    ) -> Result<Vec<Position>, StoreError>;

    /// Distinct listed symbols of open positions across the given portfolios.
    /// The factor-proxy ETF set is unioned in by the planner.
    async fn distinct_open_symbols(
        &self,
        portfolio_ids: &[Uuid],
        as_of_date: NaiveDate,
    ) -> Result<Vec<String>, StoreError>;

    async fn last_snapshot_date(
        &self,
        portfolio_id: Uuid,
    ) -> Result<Option<NaiveDate>, StoreError>;

    async fn portfolios_with_snapshot_on(
        &self,
        date: NaiveDate,
    ) -> Result<HashSet<Uuid>, StoreError>;

    async fn snapshot(
        &self,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
    ) -> Result<Option<PortfolioSnapshotRow>, StoreError>;

    /// Idempotent, all-or-nothing upsert of one engine's output.
    async fn upsert_results(&self, batch: &ResultBatch) -> Result<u64, StoreError>;

    async fn factor_exposures(
        &self,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
    ) -> Result<Vec<PositionFactorExposureRow>, StoreError>;

    async fn correlation_matrix(
        &self,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
    ) -> Result<Option<CorrelationMatrixRow>, StoreError>;
}

#[derive(Clone)]
pub struct PgPortfolioRepository {
    pool: PgPool,
}

impl PgPortfolioRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PortfolioRepository for PgPortfolioRepository {
    async fn list_active_portfolios(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(portfolio_queries::fetch_active_ids(&self.pool).await?)
    }

    async fn fetch_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>, StoreError> {
        Ok(portfolio_queries::fetch_one(&self.pool, id).await?)
    }

    async fn open_positions(
        &self,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
    ) -> Result<Vec<Position>, StoreError> {
        Ok(portfolio_queries::fetch_open_positions(&self.pool, portfolio_id, as_of_date).await?)
    }

    async fn distinct_open_symbols(
        &self,
        portfolio_ids: &[Uuid],
        as_of_date: NaiveDate,
    ) -> Result<Vec<String>, StoreError> {
        Ok(
            portfolio_queries::fetch_distinct_open_symbols(&self.pool, portfolio_ids, as_of_date)
                .await?,
        )
    }

    async fn last_snapshot_date(
        &self,
        portfolio_id: Uuid,
    ) -> Result<Option<NaiveDate>, StoreError> {
        Ok(portfolio_queries::fetch_last_snapshot_date(&self.pool, portfolio_id).await?)
    }

    async fn portfolios_with_snapshot_on(
        &self,
        date: NaiveDate,
    ) -> Result<HashSet<Uuid>, StoreError> {
        let ids = portfolio_queries::fetch_portfolios_with_snapshot_on(&self.pool, date).await?;
        Ok(ids.into_iter().collect())
    }

    async fn snapshot(
        &self,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
    ) -> Result<Option<PortfolioSnapshotRow>, StoreError> {
        Ok(portfolio_queries::fetch_snapshot(&self.pool, portfolio_id, as_of_date).await?)
    }

    async fn upsert_results(&self, batch: &ResultBatch) -> Result<u64, StoreError> {
        Ok(result_queries::upsert_batch(&self.pool, batch).await?)
    }

    async fn factor_exposures(
        &self,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
    ) -> Result<Vec<PositionFactorExposureRow>, StoreError> {
        Ok(result_queries::fetch_factor_exposures(&self.pool, portfolio_id, as_of_date).await?)
    }

    async fn correlation_matrix(
        &self,
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
    ) -> Result<Option<CorrelationMatrixRow>, StoreError> {
        Ok(result_queries::fetch_correlation_matrix(&self.pool, portfolio_id, as_of_date).await?)
    }
}
