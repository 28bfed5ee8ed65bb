//! Capability traits the orchestrator depends on, plus their Postgres
//! implementations. The orchestrator never touches `sqlx` directly; tests
//! substitute in-memory implementations.

mod market_data;
mod portfolios;
mod run_history;

pub use market_data::{MarketDataCache, PgMarketDataCache};
pub use portfolios::{PgPortfolioRepository, PortfolioRepository};
pub use run_history::{PgRunHistory, RunHistoryStore};

use thiserror::Error;

/// Storage failure classified for the retry policy: transient errors are
/// retried up to 3 times with backoff, permanent errors fail the work item.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("storage error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
            _ => StoreError::Permanent(err.to_string()),
        }
    }
}
