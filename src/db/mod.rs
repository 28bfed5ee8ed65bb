//! Raw SQL, one free-function module per table group.
//!
//! Schema migrations live with the deployment repo, not here. The tables
//! these queries assume:
//!
//! - `portfolios(id, owner_id, display_name, active, created_at, deleted_at)`
//! - `positions(id, portfolio_id, symbol, asset_kind, quantity, entry_price,
//!   entry_date, exit_date, option_strike, option_expiry, investment_class,
//!   deleted_at)`
//! - `market_data(symbol, date, open, high, low, close, volume)` —
//!   pk `(symbol, date)`
//! - one table per calculation result variant, upserted on its natural key:
//!   `portfolio_snapshots`, `position_greeks`, `position_volatility`,
//!   `position_market_beta`, `position_factor_exposures`,
//!   `correlation_matrices`, `stress_test_results`, `diversification_scores`
//! - `batch_runs(id, source, scope, portfolio_id, backfill, started_at,
//!   completed_at, status, notes, progress)`
//! - `batch_run_progress(run_id, portfolio_id, as_of_date, engine, status,
//!   error, committed_at)`

pub mod batch_run_queries;
pub mod market_data_queries;
pub mod portfolio_queries;
pub mod result_queries;
