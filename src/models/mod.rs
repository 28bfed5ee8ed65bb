mod batch_run;
mod market_data;
mod portfolio;
mod results;

pub use batch_run::{
    BatchRun, PhaseCounters, ProgressStatus, RunScope, RunSource, RunStatus, RunSummary,
};
pub use market_data::MarketBar;
pub use portfolio::{AssetKind, Portfolio, Position};
pub use results::{
    CorrelationMatrixRow, DiversificationRow, EngineKind, PortfolioSnapshotRow,
    PositionFactorExposureRow, PositionGreeksRow, PositionMarketBetaRow, PositionVolatilityRow,
    ResultBatch, StressTestRow,
};
