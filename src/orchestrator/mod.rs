//! The batch orchestration core.
//!
//! `run_batch` turns a trigger into a bounded, resumable, idempotent pass
//! over (dates × portfolios × engines):
//!
//! 1. claim the run tracker slot (at most one run per process),
//! 2. plan dates from the watermark and the trading calendar,
//! 3. per date: prepare market data, then per portfolio run the five
//!    per-position engines in a bounded fan-out followed by the three
//!    aggregation engines serially.
//!
//! Engine and per-symbol provider failures are folded into counters and the
//! durable run record; only the tracker gate and planning errors surface to
//! the caller.

pub mod planner;
pub mod progress;
pub mod tracker;

pub use progress::{ProgressEvent, ProgressSender};
pub use tracker::{RunGuard, RunTracker};

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::calendar::TradingCalendar;
use crate::config::BatchConfig;
use crate::engines::{
    self, EngineError, EngineInput, FACTOR_PROXY_ETFS,
};
use crate::errors::AppError;
use crate::models::{
    EngineKind, PhaseCounters, ProgressStatus, ResultBatch, RunScope, RunSource, RunStatus,
    RunSummary,
};
use crate::services::market_data_service::MarketDataService;
use crate::store::{PortfolioRepository, RunHistoryStore, StoreError};

const STORE_RETRY_ATTEMPTS: u32 = 3;

pub struct Orchestrator {
    repo: Arc<dyn PortfolioRepository>,
    market_data: Arc<MarketDataService>,
    history: Arc<dyn RunHistoryStore>,
    tracker: Arc<RunTracker>,
    calendar: TradingCalendar,
    config: BatchConfig,
}

#[derive(Debug, Default)]
struct ExecOutcome {
    dates_processed: Vec<NaiveDate>,
    market_data: PhaseCounters,
    per_position: PhaseCounters,
    aggregation: PhaseCounters,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn PortfolioRepository>,
        market_data: Arc<MarketDataService>,
        history: Arc<dyn RunHistoryStore>,
        tracker: Arc<RunTracker>,
        calendar: TradingCalendar,
        config: BatchConfig,
    ) -> Self {
        Self {
            repo,
            market_data,
            history,
            tracker,
            calendar,
            config,
        }
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    /// Signal the in-flight run, if any, to stop after its current engine
    /// transactions commit.
    pub fn cancel_active_run(&self) -> bool {
        self.tracker.cancel_active()
    }

    /// Startup self-healing: expire durable runs stuck in `running` past the
    /// tracker timeout, and prune history beyond the retention window.
    pub async fn startup_cleanup(&self) -> Result<(), AppError> {
        let timeout = chrono::Duration::from_std(self.config.run_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let expired = self.history.expire_stale_runs(Utc::now() - timeout).await?;
        if expired > 0 {
            warn!("🧹 Auto-expired {} stale batch run(s) from a previous process", expired);
        }

        let retention = chrono::Duration::days(self.config.run_retention_days);
        let pruned = self.history.prune_history(Utc::now() - retention).await?;
        if pruned > 0 {
            info!(
                "🧹 Pruned {} batch run record(s) older than {} days",
                pruned, self.config.run_retention_days
            );
        }
        Ok(())
    }

    /// Single entry point for every trigger (scheduler, admin, onboarding,
    /// manual). Idempotent by (date, portfolio); concurrent callers get
    /// `AlreadyRunning`.
    pub async fn run_batch(
        &self,
        scope: RunScope,
        backfill: bool,
        source: RunSource,
    ) -> Result<RunSummary, AppError> {
        let guard = Arc::clone(&self.tracker).try_acquire()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "🚀 Starting batch run {} (scope={}, backfill={}, source={})",
            run_id,
            scope.as_str(),
            backfill,
            source.as_str()
        );

        self.history
            .insert_run(run_id, source, &scope, backfill)
            .await?;

        let plan = match planner::plan(
            self.repo.as_ref(),
            &self.calendar,
            &self.config,
            &scope,
            backfill,
            started_at,
        )
        .await
        {
            Ok(plan) => plan,
            Err(e) => {
                // NoActivePortfolios completes with zero work; anything else
                // at planning time is a failed run.
                let status = match &e {
                    AppError::NoActivePortfolios => RunStatus::Completed,
                    _ => RunStatus::Failed,
                };
                self.history
                    .mark_terminal(run_id, status, Some(&e.to_string()), None)
                    .await
                    .ok();
                return Err(e);
            }
        };

        let (events, rx) = mpsc::unbounded_channel();
        let recorder = progress::spawn_recorder(run_id, Arc::clone(&self.history), rx);

        let outcome = self.execute(&plan, run_id, &guard, &events).await;

        let status = match &outcome {
            Ok(_) if guard.cancel.is_cancelled() => RunStatus::Cancelled,
            Ok(_) => RunStatus::Completed,
            Err(_) => RunStatus::Failed,
        };

        let _ = events.send(ProgressEvent::RunCompleted { run_id, status });
        drop(events);
        let _ = recorder.await;

        match outcome {
            Ok(exec) => {
                let summary = RunSummary {
                    run_id,
                    status,
                    dates_processed: exec.dates_processed,
                    market_data: exec.market_data,
                    per_position: exec.per_position,
                    aggregation: exec.aggregation,
                    started_at,
                    completed_at: Utc::now(),
                };
                let progress_json = serde_json::to_value(&summary).ok();
                self.history
                    .mark_terminal(run_id, status, None, progress_json.as_ref())
                    .await
                    .ok();
                info!(
                    "✅ Batch run {} {}: {} date(s), engines {}/{} succeeded, {} skipped, {} failed",
                    run_id,
                    status.as_str(),
                    summary.dates_processed.len(),
                    summary.per_position.succeeded + summary.aggregation.succeeded,
                    summary.per_position.attempted + summary.aggregation.attempted,
                    summary.per_position.skipped + summary.aggregation.skipped,
                    summary.total_failed()
                );
                Ok(summary)
            }
            Err(e) => {
                error!("❌ Batch run {} failed: {}", run_id, e);
                self.history
                    .mark_terminal(run_id, RunStatus::Failed, Some(&e.to_string()), None)
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        plan: &planner::RunPlan,
        run_id: Uuid,
        guard: &RunGuard,
        events: &ProgressSender,
    ) -> Result<ExecOutcome, AppError> {
        let mut outcome = ExecOutcome::default();

        for date in &plan.dates {
            if guard.cancel.is_cancelled() {
                info!("🛑 Run {} cancelled before date {}", run_id, date);
                break;
            }

            // Per-date filter: portfolios already snapshotted for this date
            // were completed by an earlier run.
            let done = retry_store(|| self.repo.portfolios_with_snapshot_on(*date)).await?;
            let todo: Vec<Uuid> = plan
                .portfolio_ids
                .iter()
                .filter(|id| !done.contains(id))
                .copied()
                .collect();

            if todo.is_empty() {
                debug!("Date {} already complete for every portfolio in scope", date);
                continue;
            }

            // Scoped symbol set: open-position symbols of the portfolios
            // still needing this date, plus the factor proxies. Never the
            // whole market universe.
            let mut symbols =
                retry_store(|| self.repo.distinct_open_symbols(&todo, *date)).await?;
            for etf in FACTOR_PROXY_ETFS {
                if !symbols.iter().any(|s| s == etf) {
                    symbols.push(etf.to_string());
                }
            }
            symbols.sort();

            info!(
                "📆 Processing {} for {} portfolio(s), {} symbol(s)",
                date,
                todo.len(),
                symbols.len()
            );

            // Phase 1
            let prep = self
                .market_data
                .prepare_date(*date, &symbols, &guard.cancel)
                .await;
            outcome.market_data.absorb(prep.counters);

            // Phases 2 and 3, bounded fan-out across portfolios
            let semaphore = Arc::new(Semaphore::new(self.config.outer_concurrency.max(1)));
            let mut tasks = JoinSet::new();
            for portfolio_id in todo.iter().copied() {
                let unit = UnitOfWork {
                    repo: Arc::clone(&self.repo),
                    market_data: Arc::clone(&self.market_data),
                    events: events.clone(),
                    portfolio_id,
                    as_of_date: *date,
                    inner_concurrency: self.config.inner_concurrency.max(1),
                    engine_timeout: self.config.engine_timeout,
                    risk_free_rate: self.config.risk_free_rate,
                    cancel: guard.cancel.clone(),
                };
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("portfolio semaphore never closes");
                    unit.process().await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((per_position, aggregation)) => {
                        outcome.per_position.absorb(per_position);
                        outcome.aggregation.absorb(aggregation);
                    }
                    Err(e) => {
                        // A panicked unit of work loses its counters but must
                        // not take the run down.
                        error!("Portfolio task aborted for {}: {}", date, e);
                        outcome.aggregation.record(ProgressStatus::Failed);
                    }
                }
            }

            outcome.dates_processed.push(*date);
            let _ = events.send(ProgressEvent::DateCompleted {
                as_of_date: *date,
                portfolios: todo.len(),
            });
        }

        Ok(outcome)
    }
}

/// One (portfolio, date) unit: the five per-position engines in a bounded
/// fan-out, then the aggregation engines serially.
struct UnitOfWork {
    repo: Arc<dyn PortfolioRepository>,
    market_data: Arc<MarketDataService>,
    events: ProgressSender,
    portfolio_id: Uuid,
    as_of_date: NaiveDate,
    inner_concurrency: usize,
    engine_timeout: Duration,
    risk_free_rate: f64,
    cancel: CancellationToken,
}

impl UnitOfWork {
    async fn process(self) -> (PhaseCounters, PhaseCounters) {
        let mut per_position = PhaseCounters::default();
        let mut aggregation = PhaseCounters::default();

        let input = match self.assemble_input().await {
            Ok(input) => Arc::new(input),
            Err(e) => {
                // Without positions and prices there is nothing any engine
                // can do; record the whole unit as failed.
                for engine in EngineKind::PER_POSITION {
                    per_position.record(ProgressStatus::Failed);
                    self.emit_failed(engine, &e);
                }
                for engine in EngineKind::AGGREGATION {
                    aggregation.record(ProgressStatus::Failed);
                    self.emit_failed(engine, &e);
                }
                return (per_position, aggregation);
            }
        };

        // Phase 2
        let semaphore = Arc::new(Semaphore::new(self.inner_concurrency));
        let mut tasks = JoinSet::new();
        for engine in EngineKind::PER_POSITION {
            if self.cancel.is_cancelled() {
                per_position.record(ProgressStatus::Skipped);
                self.emit_skipped(engine, "run cancelled");
                continue;
            }
            let semaphore = Arc::clone(&semaphore);
            let input = Arc::clone(&input);
            let repo = Arc::clone(&self.repo);
            let events = self.events.clone();
            let timeout = self.engine_timeout;
            let portfolio_id = self.portfolio_id;
            let as_of_date = self.as_of_date;
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("engine semaphore never closes");
                run_per_position_engine(
                    engine,
                    input,
                    repo,
                    events,
                    portfolio_id,
                    as_of_date,
                    timeout,
                )
                .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(status) => per_position.record(status),
                Err(e) => {
                    error!(
                        "Engine task aborted for portfolio {}: {}",
                        self.portfolio_id, e
                    );
                    per_position.record(ProgressStatus::Failed);
                }
            }
        }

        // Phase 3 runs even after partial phase-2 failures; the snapshot is
        // the landmark that advances the watermark.
        self.aggregate(&input, &mut aggregation).await;

        (per_position, aggregation)
    }

    async fn assemble_input(&self) -> Result<EngineInput, String> {
        let positions = retry_store(|| {
            self.repo.open_positions(self.portfolio_id, self.as_of_date)
        })
        .await
        .map_err(|e| format!("loading open positions: {}", e))?;

        let mut symbols: BTreeSet<&str> = positions
            .iter()
            .filter(|p| p.asset_kind.is_listed())
            .map(|p| p.symbol.as_str())
            .collect();
        symbols.extend(FACTOR_PROXY_ETFS);

        let view = self
            .market_data
            .load_view(self.as_of_date, symbols.into_iter())
            .await
            .map_err(|e| format!("loading market view: {}", e))?;

        Ok(EngineInput {
            portfolio_id: self.portfolio_id,
            as_of_date: self.as_of_date,
            positions,
            view,
            risk_free_rate: self.risk_free_rate,
        })
    }

    async fn aggregate(&self, input: &Arc<EngineInput>, counters: &mut PhaseCounters) {
        if self.cancel.is_cancelled() {
            for engine in EngineKind::AGGREGATION {
                counters.record(ProgressStatus::Skipped);
                self.emit_skipped(engine, "run cancelled");
            }
            return;
        }

        // Snapshot first; if it cannot be written, the date stays the next
        // target for this portfolio and the dependents are skipped.
        self.emit_started(EngineKind::Snapshot);
        let snapshot_row = match engines::snapshot::compute(input) {
            Ok(row) => {
                let batch = ResultBatch::Snapshot(vec![row.clone()]);
                match retry_store(|| self.repo.upsert_results(&batch)).await {
                    Ok(rows) => {
                        counters.record(ProgressStatus::Succeeded);
                        self.emit_committed(EngineKind::Snapshot, rows);
                        Some(row)
                    }
                    Err(e) => {
                        counters.record(ProgressStatus::Failed);
                        self.emit_failed(EngineKind::Snapshot, &e.to_string());
                        None
                    }
                }
            }
            Err(e) => {
                counters.record(engine_error_status(&e));
                self.emit_engine_error(EngineKind::Snapshot, &e);
                None
            }
        };

        let snapshot_row = match snapshot_row {
            Some(row) => row,
            None => {
                for engine in [EngineKind::StressTest, EngineKind::Diversification] {
                    counters.record(ProgressStatus::Skipped);
                    self.emit_skipped(engine, "snapshot unavailable for this date");
                }
                return;
            }
        };

        // Dependents read committed phase-2 rows back from the repository,
        // so they only ever observe what actually landed.
        let exposures = retry_store(|| {
            self.repo.factor_exposures(self.portfolio_id, self.as_of_date)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(
                "Could not load factor exposures for {}: {}",
                self.portfolio_id, e
            );
            Vec::new()
        });
        let correlation = retry_store(|| {
            self.repo
                .correlation_matrix(self.portfolio_id, self.as_of_date)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(
                "Could not load correlation matrix for {}: {}",
                self.portfolio_id, e
            );
            None
        });

        self.emit_started(EngineKind::StressTest);
        match engines::stress_test::compute(input, &exposures, correlation.as_ref(), &snapshot_row)
        {
            Ok(rows) => {
                let batch = ResultBatch::StressTest(rows);
                match retry_store(|| self.repo.upsert_results(&batch)).await {
                    Ok(written) => {
                        counters.record(ProgressStatus::Succeeded);
                        self.emit_committed(EngineKind::StressTest, written);
                    }
                    Err(e) => {
                        counters.record(ProgressStatus::Failed);
                        self.emit_failed(EngineKind::StressTest, &e.to_string());
                    }
                }
            }
            Err(e) => {
                counters.record(engine_error_status(&e));
                self.emit_engine_error(EngineKind::StressTest, &e);
            }
        }

        self.emit_started(EngineKind::Diversification);
        match engines::diversification::compute(input, correlation.as_ref(), &snapshot_row) {
            Ok(row) => {
                let batch = ResultBatch::Diversification(vec![row]);
                match retry_store(|| self.repo.upsert_results(&batch)).await {
                    Ok(written) => {
                        counters.record(ProgressStatus::Succeeded);
                        self.emit_committed(EngineKind::Diversification, written);
                    }
                    Err(e) => {
                        counters.record(ProgressStatus::Failed);
                        self.emit_failed(EngineKind::Diversification, &e.to_string());
                    }
                }
            }
            Err(e) => {
                counters.record(engine_error_status(&e));
                self.emit_engine_error(EngineKind::Diversification, &e);
            }
        }
    }

    fn emit_started(&self, engine: EngineKind) {
        let _ = self.events.send(ProgressEvent::EngineStarted {
            portfolio_id: self.portfolio_id,
            as_of_date: self.as_of_date,
            engine,
        });
    }

    fn emit_committed(&self, engine: EngineKind, rows: u64) {
        let _ = self.events.send(ProgressEvent::EngineCommitted {
            portfolio_id: self.portfolio_id,
            as_of_date: self.as_of_date,
            engine,
            rows,
        });
    }

    fn emit_skipped(&self, engine: EngineKind, reason: &str) {
        let _ = self.events.send(ProgressEvent::EngineSkipped {
            portfolio_id: self.portfolio_id,
            as_of_date: self.as_of_date,
            engine,
            reason: reason.to_string(),
        });
    }

    fn emit_failed(&self, engine: EngineKind, error: &str) {
        let _ = self.events.send(ProgressEvent::EngineFailed {
            portfolio_id: self.portfolio_id,
            as_of_date: self.as_of_date,
            engine,
            error: error.to_string(),
        });
    }

    fn emit_engine_error(&self, engine: EngineKind, error: &EngineError) {
        match engine_error_status(error) {
            ProgressStatus::Skipped => self.emit_skipped(engine, &error.to_string()),
            _ => self.emit_failed(engine, &error.to_string()),
        }
    }
}

/// Compute one per-position engine and persist its output. The returned
/// status is recorded only after the write transaction committed (or
/// conclusively failed), so counters always reflect persisted state.
async fn run_per_position_engine(
    engine: EngineKind,
    input: Arc<EngineInput>,
    repo: Arc<dyn PortfolioRepository>,
    events: ProgressSender,
    portfolio_id: Uuid,
    as_of_date: NaiveDate,
    timeout: Duration,
) -> ProgressStatus {
    let _ = events.send(ProgressEvent::EngineStarted {
        portfolio_id,
        as_of_date,
        engine,
    });

    let work = async {
        let batch = compute_per_position(engine, &input)?;
        if batch.is_empty() {
            return Ok::<_, EngineError>(None);
        }
        let written = retry_store(|| repo.upsert_results(&batch))
            .await
            .map_err(|e| EngineError::Computation(format!("persisting results: {}", e)))?;
        Ok(Some(written))
    };

    let status = match tokio::time::timeout(timeout, work).await {
        Ok(Ok(Some(written))) => {
            let _ = events.send(ProgressEvent::EngineCommitted {
                portfolio_id,
                as_of_date,
                engine,
                rows: written,
            });
            ProgressStatus::Succeeded
        }
        Ok(Ok(None)) => {
            let _ = events.send(ProgressEvent::EngineSkipped {
                portfolio_id,
                as_of_date,
                engine,
                reason: "no applicable positions".to_string(),
            });
            ProgressStatus::Skipped
        }
        Ok(Err(e)) => {
            let status = engine_error_status(&e);
            let event = match status {
                ProgressStatus::Skipped => ProgressEvent::EngineSkipped {
                    portfolio_id,
                    as_of_date,
                    engine,
                    reason: e.to_string(),
                },
                _ => ProgressEvent::EngineFailed {
                    portfolio_id,
                    as_of_date,
                    engine,
                    error: e.to_string(),
                },
            };
            let _ = events.send(event);
            status
        }
        Err(_) => {
            let _ = events.send(ProgressEvent::EngineFailed {
                portfolio_id,
                as_of_date,
                engine,
                error: format!("engine timed out after {:?}", timeout),
            });
            ProgressStatus::Failed
        }
    };

    status
}

fn compute_per_position(
    engine: EngineKind,
    input: &EngineInput,
) -> Result<ResultBatch, EngineError> {
    match engine {
        EngineKind::Greeks => engines::greeks::compute(input).map(ResultBatch::Greeks),
        EngineKind::Volatility => {
            engines::volatility::compute(input).map(ResultBatch::Volatility)
        }
        EngineKind::MarketBeta => {
            engines::market_beta::compute(input).map(ResultBatch::MarketBeta)
        }
        EngineKind::FactorExposure => {
            engines::factor_exposure::compute(input).map(ResultBatch::FactorExposure)
        }
        EngineKind::Correlations => {
            engines::correlations::compute(input).map(ResultBatch::Correlations)
        }
        other => Err(EngineError::Computation(format!(
            "{} is not a per-position engine",
            other
        ))),
    }
}

fn engine_error_status(error: &EngineError) -> ProgressStatus {
    match error {
        EngineError::InsufficientData(_) | EngineError::DegenerateInput(_) => {
            ProgressStatus::Skipped
        }
        EngineError::Computation(_) => ProgressStatus::Failed,
    }
}

/// Retry transient storage errors with 1s/2s/4s backoff; permanent errors
/// and exhausted retries propagate.
async fn retry_store<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < STORE_RETRY_ATTEMPTS => {
                attempt += 1;
                let backoff = Duration::from_secs(1 << (attempt - 1));
                warn!("Transient storage error (attempt {}): {}", attempt, e);
                sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
