use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::MarketBar;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("symbol not found")]
    NotFound,
}

impl ProviderError {
    /// Rate limits and network blips are worth retrying; a missing symbol or
    /// a malformed payload will not get better on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited | ProviderError::Network(_))
    }
}

/// External OHLCV source. Fetches are per-symbol; the preparation phase in
/// front of this trait owns retries, backoff, and the failure cache.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketBar>, ProviderError>;
}
