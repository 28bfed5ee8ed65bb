use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The eight calculation engines, in display/persistence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Greeks,
    Volatility,
    MarketBeta,
    FactorExposure,
    Correlations,
    Snapshot,
    StressTest,
    Diversification,
}

impl EngineKind {
    pub const PER_POSITION: [EngineKind; 5] = [
        EngineKind::Greeks,
        EngineKind::Volatility,
        EngineKind::MarketBeta,
        EngineKind::FactorExposure,
        EngineKind::Correlations,
    ];

    pub const AGGREGATION: [EngineKind; 3] = [
        EngineKind::Snapshot,
        EngineKind::StressTest,
        EngineKind::Diversification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Greeks => "greeks",
            EngineKind::Volatility => "volatility",
            EngineKind::MarketBeta => "market_beta",
            EngineKind::FactorExposure => "factor_exposure",
            EngineKind::Correlations => "correlations",
            EngineKind::Snapshot => "snapshot",
            EngineKind::StressTest => "stress_test",
            EngineKind::Diversification => "diversification",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Black-Scholes greeks for one option position.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionGreeksRow {
    pub position_id: Uuid,
    pub as_of_date: NaiveDate,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    pub underlying_price: f64,
    pub implied_vol: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionVolatilityRow {
    pub position_id: Uuid,
    pub as_of_date: NaiveDate,
    pub realized_vol: f64,
    pub max_drawdown: f64,
    pub lookback_days: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionMarketBetaRow {
    pub position_id: Uuid,
    pub as_of_date: NaiveDate,
    pub benchmark: String,
    pub beta: f64,
    pub r_squared: f64,
    pub observations: i32,
}

/// One regression exposure per (position, factor proxy).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionFactorExposureRow {
    pub position_id: Uuid,
    pub as_of_date: NaiveDate,
    pub factor: String,
    pub exposure: f64,
    pub r_squared: f64,
}

/// Pairwise correlation matrix over the portfolio's listed symbols,
/// stored as JSONB alongside the symbol ordering.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrelationMatrixRow {
    pub portfolio_id: Uuid,
    pub as_of_date: NaiveDate,
    pub symbols: serde_json::Value,
    pub matrix: serde_json::Value,
    pub observations: i32,
}

impl CorrelationMatrixRow {
    pub fn symbol_list(&self) -> Vec<String> {
        serde_json::from_value(self.symbols.clone()).unwrap_or_default()
    }

    pub fn matrix_values(&self) -> Vec<Vec<f64>> {
        serde_json::from_value(self.matrix.clone()).unwrap_or_default()
    }
}

/// The landmark result: advances the portfolio watermark when committed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioSnapshotRow {
    pub portfolio_id: Uuid,
    pub as_of_date: NaiveDate,
    pub total_value: BigDecimal,
    pub long_value: BigDecimal,
    pub short_value: BigDecimal,
    pub gross_exposure: BigDecimal,
    pub net_exposure: BigDecimal,
    pub position_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StressTestRow {
    pub portfolio_id: Uuid,
    pub as_of_date: NaiveDate,
    pub scenario: String,
    pub shocked_value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiversificationRow {
    pub portfolio_id: Uuid,
    pub as_of_date: NaiveDate,
    pub score: f64,
    pub effective_positions: f64,
    pub avg_correlation: Option<f64>,
}

/// Engine output destined for one upsert transaction.
///
/// Each variant is written all-or-nothing on its natural key, so re-running a
/// (portfolio, date, engine) triple is idempotent.
#[derive(Debug, Clone)]
pub enum ResultBatch {
    Greeks(Vec<PositionGreeksRow>),
    Volatility(Vec<PositionVolatilityRow>),
    MarketBeta(Vec<PositionMarketBetaRow>),
    FactorExposure(Vec<PositionFactorExposureRow>),
    Correlations(Vec<CorrelationMatrixRow>),
    Snapshot(Vec<PortfolioSnapshotRow>),
    StressTest(Vec<StressTestRow>),
    Diversification(Vec<DiversificationRow>),
}

impl ResultBatch {
    pub fn engine(&self) -> EngineKind {
        match self {
            ResultBatch::Greeks(_) => EngineKind::Greeks,
            ResultBatch::Volatility(_) => EngineKind::Volatility,
            ResultBatch::MarketBeta(_) => EngineKind::MarketBeta,
            ResultBatch::FactorExposure(_) => EngineKind::FactorExposure,
            ResultBatch::Correlations(_) => EngineKind::Correlations,
            ResultBatch::Snapshot(_) => EngineKind::Snapshot,
            ResultBatch::StressTest(_) => EngineKind::StressTest,
            ResultBatch::Diversification(_) => EngineKind::Diversification,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ResultBatch::Greeks(rows) => rows.len(),
            ResultBatch::Volatility(rows) => rows.len(),
            ResultBatch::MarketBeta(rows) => rows.len(),
            ResultBatch::FactorExposure(rows) => rows.len(),
            ResultBatch::Correlations(rows) => rows.len(),
            ResultBatch::Snapshot(rows) => rows.len(),
            ResultBatch::StressTest(rows) => rows.len(),
            ResultBatch::Diversification(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
