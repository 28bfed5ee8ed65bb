use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::models::{EngineKind, ProgressStatus, RunStatus};
use crate::store::RunHistoryStore;

/// Progress emitted by the orchestrator at commit boundaries. The durable
/// history writer is the first consumer; the admin surface can subscribe to
/// the same stream.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    EngineStarted {
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
        engine: EngineKind,
    },
    EngineCommitted {
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
        engine: EngineKind,
        rows: u64,
    },
    EngineSkipped {
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
        engine: EngineKind,
        reason: String,
    },
    EngineFailed {
        portfolio_id: Uuid,
        as_of_date: NaiveDate,
        engine: EngineKind,
        error: String,
    },
    DateCompleted {
        as_of_date: NaiveDate,
        portfolios: usize,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Consume the event stream and persist one `batch_run_progress` row per
/// terminal engine event. Runs until the orchestrator drops its sender, so
/// awaiting the handle guarantees history is flushed before the run returns.
pub fn spawn_recorder(
    run_id: Uuid,
    history: Arc<dyn RunHistoryStore>,
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let outcome = match &event {
                ProgressEvent::EngineCommitted {
                    portfolio_id,
                    as_of_date,
                    engine,
                    ..
                } => Some((*portfolio_id, *as_of_date, *engine, ProgressStatus::Succeeded, None)),
                ProgressEvent::EngineSkipped {
                    portfolio_id,
                    as_of_date,
                    engine,
                    reason,
                } => Some((
                    *portfolio_id,
                    *as_of_date,
                    *engine,
                    ProgressStatus::Skipped,
                    Some(reason.clone()),
                )),
                ProgressEvent::EngineFailed {
                    portfolio_id,
                    as_of_date,
                    engine,
                    error,
                } => Some((
                    *portfolio_id,
                    *as_of_date,
                    *engine,
                    ProgressStatus::Failed,
                    Some(error.clone()),
                )),
                ProgressEvent::EngineStarted { .. } => None,
                ProgressEvent::DateCompleted {
                    as_of_date,
                    portfolios,
                } => {
                    debug!("📅 Date {} completed ({} portfolios)", as_of_date, portfolios);
                    None
                }
                ProgressEvent::RunCompleted { run_id, status } => {
                    debug!("🏁 Run {} completed with status {}", run_id, status.as_str());
                    None
                }
            };

            if let Some((portfolio_id, as_of_date, engine, status, detail)) = outcome {
                if let Err(e) = history
                    .record_progress(
                        run_id,
                        portfolio_id,
                        as_of_date,
                        engine,
                        status,
                        detail.as_deref(),
                    )
                    .await
                {
                    // History is diagnostics; a write failure must not take
                    // the run down with it.
                    error!("Failed to record run progress: {}", e);
                }
            }
        }
    })
}
