use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One daily OHLCV bar, keyed by (symbol, date).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: BigDecimal,
    pub high: BigDecimal,
    pub low: BigDecimal,
    pub close: BigDecimal,
    pub volume: i64,
}

impl MarketBar {
    /// A bar is usable by the engines only with a positive close.
    pub fn is_valid(&self) -> bool {
        self.close_f64().map(|c| c > 0.0).unwrap_or(false)
    }

    pub fn close_f64(&self) -> Option<f64> {
        self.close.to_f64()
    }
}
