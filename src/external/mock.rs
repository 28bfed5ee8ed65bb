use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::str::FromStr;

use crate::external::market_data_provider::{MarketDataProvider, ProviderError};
use crate::models::MarketBar;

/// Deterministic offline provider for development and tests.
///
/// Produces a smooth per-symbol pseudo-random walk seeded from the symbol
/// name, so repeated fetches return identical bars and different symbols get
/// distinct, non-constant series.
pub struct MockProvider;

impl MockProvider {
    fn seed(symbol: &str) -> u64 {
        symbol
            .bytes()
            .fold(0xcbf29ce484222325u64, |acc, b| {
                (acc ^ b as u64).wrapping_mul(0x100000001b3)
            })
    }

    fn close_for(symbol: &str, date: NaiveDate) -> f64 {
        let seed = Self::seed(symbol);
        let base = 50.0 + (seed % 200) as f64;
        let t = date.num_days_from_ce() as f64;
        let phase = (seed % 628) as f64 / 100.0;
        // Two incommensurate waves plus a slow drift keep the series
        // non-constant without being noisy enough to break the engines.
        base * (1.0 + 0.02 * (t / 7.0 + phase).sin() + 0.01 * (t / 23.0 + phase).cos())
            + t * 0.001
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketBar>, ProviderError> {
        let mut bars = Vec::new();
        let mut date = from;
        while date <= to {
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                let close = Self::close_for(symbol, date);
                let open = close * 0.995;
                let decimal = |v: f64| {
                    BigDecimal::from_str(&format!("{:.4}", v))
                        .map_err(|e| ProviderError::Parse(e.to_string()))
                };
                bars.push(MarketBar {
                    symbol: symbol.to_string(),
                    date,
                    open: decimal(open)?,
                    high: decimal(close * 1.01)?,
                    low: decimal(open * 0.99)?,
                    close: decimal(close)?,
                    volume: 1_000_000 + (Self::seed(symbol) % 500_000) as i64,
                });
            }
            date += Duration::days(1);
        }
        Ok(bars)
    }
}
