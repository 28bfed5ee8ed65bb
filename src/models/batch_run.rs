use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    Scheduler,
    Admin,
    Onboarding,
    Manual,
}

impl RunSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RunSource::Scheduler => "scheduler",
            RunSource::Admin => "admin",
            RunSource::Onboarding => "onboarding",
            RunSource::Manual => "manual",
        }
    }
}

/// Which portfolios a single orchestrator invocation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunScope {
    Universe,
    SinglePortfolio { portfolio_id: Uuid },
}

impl RunScope {
    pub fn portfolio_id(&self) -> Option<Uuid> {
        match self {
            RunScope::Universe => None,
            RunScope::SinglePortfolio { portfolio_id } => Some(*portfolio_id),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunScope::Universe => "universe",
            RunScope::SinglePortfolio { .. } => "single_portfolio",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    AutoExpired,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::AutoExpired => "auto_expired",
        }
    }
}

/// Durable record of one orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchRun {
    pub id: Uuid,
    pub source: RunSource,
    pub scope: String,
    pub portfolio_id: Option<Uuid>,
    pub backfill: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub notes: Option<String>,
    pub progress: Option<serde_json::Value>,
}

/// Outcome of one (portfolio, date, engine) attempt, recorded after the
/// engine's write transaction commits (or conclusively fails).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "progress_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Succeeded,
    Skipped,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::Succeeded => "succeeded",
            ProgressStatus::Skipped => "skipped",
            ProgressStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounters {
    pub attempted: u32,
    pub succeeded: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl PhaseCounters {
    pub fn record(&mut self, status: ProgressStatus) {
        self.attempted += 1;
        match status {
            ProgressStatus::Succeeded => self.succeeded += 1,
            ProgressStatus::Skipped => self.skipped += 1,
            ProgressStatus::Failed => self.failed += 1,
        }
    }

    pub fn absorb(&mut self, other: PhaseCounters) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Terminal report returned by `run_batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub dates_processed: Vec<NaiveDate>,
    pub market_data: PhaseCounters,
    pub per_position: PhaseCounters,
    pub aggregation: PhaseCounters,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn total_failed(&self) -> u32 {
        self.per_position.failed + self.aggregation.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_tally_by_status() {
        let mut counters = PhaseCounters::default();
        counters.record(ProgressStatus::Succeeded);
        counters.record(ProgressStatus::Skipped);
        counters.record(ProgressStatus::Skipped);
        counters.record(ProgressStatus::Failed);
        assert_eq!(counters.attempted, 4);
        assert_eq!(counters.succeeded, 1);
        assert_eq!(counters.skipped, 2);
        assert_eq!(counters.failed, 1);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::AutoExpired.is_terminal());
    }
}
