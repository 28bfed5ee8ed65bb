//! The eight calculation engines.
//!
//! Each engine is a pure function from (positions, market view, parameters)
//! to a deterministic list of result rows. Engines never perform I/O: the
//! orchestrator assembles a `MarketView` from the market data cache, invokes
//! the engine, and persists the output in a single transaction.

pub mod correlations;
pub mod diversification;
pub mod factor_exposure;
pub mod greeks;
pub mod market_beta;
pub mod snapshot;
pub mod stress_test;
pub mod volatility;

use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{MarketBar, Position};

/// Benchmark for single-factor market beta.
pub const DEFAULT_BENCHMARK: &str = "SPY";

/// Factor-proxy ETFs pre-populated for every processed date regardless of
/// holdings, so factor regressions and stress scenarios always have their
/// reference series.
pub const FACTOR_PROXY_ETFS: [&str; 17] = [
    "SPY", // US large cap
    "QQQ", // Nasdaq 100
    "IWM", // US small cap
    "VTV", // value
    "VUG", // growth
    "MTUM", // momentum
    "QUAL", // quality
    "USMV", // min volatility
    "SIZE", // size
    "VLUE", // rel. value
    "EFA", // developed ex-US
    "EEM", // emerging markets
    "AGG", // aggregate bond
    "TLT", // long treasuries
    "HYG", // high yield
    "GLD", // gold
    "XLE", // energy
];

#[derive(Debug, Error)]
pub enum EngineError {
    /// Cache coverage below the engine's minimum lookback. Counted as
    /// skipped; the next run re-attempts once data is available.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// All inputs zero or constant. Counted as skipped.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Numerical failure. Counted as failed.
    #[error("computation error: {0}")]
    Computation(String),
}

/// Everything a per-position engine sees for one (portfolio, date).
pub struct EngineInput {
    pub portfolio_id: Uuid,
    pub as_of_date: NaiveDate,
    pub positions: Vec<Position>,
    pub view: MarketView,
    pub risk_free_rate: f64,
}

impl EngineInput {
    /// Open listed positions, i.e. those with a price series to look at.
    pub fn listed_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.asset_kind.is_listed())
    }
}

/// In-memory close-price window per symbol, ascending by date, valid bars
/// only. One view is assembled per (portfolio, date) and shared by all
/// engines of that unit of work, so they observe a consistent cache snapshot.
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    as_of_date: NaiveDate,
    series: HashMap<String, Vec<(NaiveDate, f64)>>,
}

impl MarketView {
    pub fn new(as_of_date: NaiveDate) -> Self {
        Self {
            as_of_date,
            series: HashMap::new(),
        }
    }

    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of_date
    }

    /// Ingest bars for one symbol; invalid bars and bars after the as-of date
    /// are dropped, the rest sorted ascending.
    pub fn insert_bars(&mut self, symbol: &str, bars: &[MarketBar]) {
        let mut points: Vec<(NaiveDate, f64)> = bars
            .iter()
            .filter(|b| b.date <= self.as_of_date && b.is_valid())
            .filter_map(|b| b.close_f64().map(|c| (b.date, c)))
            .collect();
        points.sort_by_key(|(d, _)| *d);
        points.dedup_by_key(|(d, _)| *d);
        self.series.insert(symbol.to_string(), points);
    }

    pub fn closes(&self, symbol: &str) -> &[(NaiveDate, f64)] {
        self.series.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest_close(&self, symbol: &str) -> Option<f64> {
        self.closes(symbol).last().map(|(_, c)| *c)
    }

    pub fn observations(&self, symbol: &str) -> usize {
        self.closes(symbol).len()
    }

    /// Daily simple returns keyed by the later date of each pair.
    pub fn daily_returns(&self, symbol: &str) -> Vec<(NaiveDate, f64)> {
        let closes = self.closes(symbol);
        closes
            .windows(2)
            .filter(|w| w[0].1 > 0.0)
            .map(|w| (w[1].0, (w[1].1 - w[0].1) / w[0].1))
            .collect()
    }
}

/// Date-aligned return pairs for two symbols.
pub fn aligned_returns(view: &MarketView, a: &str, b: &str) -> Vec<(f64, f64)> {
    let b_returns: HashMap<NaiveDate, f64> = view.daily_returns(b).into_iter().collect();
    view.daily_returns(a)
        .into_iter()
        .filter_map(|(date, ra)| b_returns.get(&date).map(|rb| (ra, *rb)))
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n-1 denominator).
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0)
}

/// Pearson correlation; `None` when either side is constant.
pub fn correlation(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs);
    let my = mean(ys);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mx) * (y - my);
        var_x += (x - mx).powi(2);
        var_y += (y - my).powi(2);
    }
    if var_x.abs() < f64::EPSILON || var_y.abs() < f64::EPSILON {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// OLS slope of `ys` on `xs` plus r²; `None` when `xs` is constant.
pub fn regression_beta(ys: &[f64], xs: &[f64]) -> Option<(f64, f64)> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs);
    let my = mean(ys);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mx) * (y - my);
        var_x += (x - mx).powi(2);
    }
    if var_x.abs() < f64::EPSILON {
        return None;
    }
    let beta = cov / var_x;
    let r = correlation(xs, ys)?;
    Some((beta, r * r))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::{Datelike, Duration, Weekday};
    use std::str::FromStr;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Weekday bars ending at `as_of`, closes supplied newest-last.
    pub fn bars(symbol: &str, as_of: NaiveDate, closes: &[f64]) -> Vec<MarketBar> {
        let mut dates = Vec::new();
        let mut d = as_of;
        while dates.len() < closes.len() {
            if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
                dates.push(d);
            }
            d -= Duration::days(1);
        }
        dates.reverse();
        dates
            .into_iter()
            .zip(closes.iter())
            .map(|(date, close)| {
                let dec = BigDecimal::from_str(&format!("{:.4}", close)).unwrap();
                MarketBar {
                    symbol: symbol.to_string(),
                    date,
                    open: dec.clone(),
                    high: dec.clone(),
                    low: dec.clone(),
                    close: dec,
                    volume: 1000,
                }
            })
            .collect()
    }

    /// Geometric walk with alternating drift, long enough for any lookback.
    pub fn trending_closes(start: f64, n: usize) -> Vec<f64> {
        let mut closes = Vec::with_capacity(n);
        let mut price = start;
        for i in 0..n {
            let step = if i % 2 == 0 { 1.004 } else { 0.998 };
            price *= step + (i % 7) as f64 * 0.0005;
            closes.push(price);
        }
        closes
    }

    pub fn position(portfolio_id: Uuid, symbol: &str, quantity: &str) -> Position {
        use crate::models::AssetKind;
        Position {
            id: Uuid::new_v4(),
            portfolio_id,
            symbol: symbol.to_string(),
            asset_kind: AssetKind::EquityLong,
            quantity: BigDecimal::from_str(quantity).unwrap(),
            entry_price: BigDecimal::from_str("100").unwrap(),
            entry_date: date(2025, 1, 2),
            exit_date: None,
            option_strike: None,
            option_expiry: None,
            investment_class: None,
            deleted_at: None,
        }
    }
}
