use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{RunScope, RunSource, RunSummary};
use crate::orchestrator::Orchestrator;

/// Kick off the historical backfill for a freshly created portfolio.
///
/// Contends with the nightly scheduler only through the tracker gate: on
/// `AlreadyRunning` it retries with capped exponential backoff and then
/// surfaces the failure to the caller, who can re-trigger later.
pub struct OnboardingDriver {
    orchestrator: Arc<Orchestrator>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl OnboardingDriver {
    pub fn new(orchestrator: Arc<Orchestrator>, max_attempts: u32) -> Self {
        Self {
            orchestrator,
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::from_secs(5),
        }
    }

    pub async fn backfill_new_portfolio(
        &self,
        portfolio_id: Uuid,
    ) -> Result<RunSummary, AppError> {
        info!("🧳 Onboarding backfill requested for portfolio {}", portfolio_id);

        let scope = RunScope::SinglePortfolio { portfolio_id };
        let mut attempt = 0u32;

        loop {
            match self
                .orchestrator
                .run_batch(scope, true, RunSource::Onboarding)
                .await
            {
                Ok(summary) => {
                    info!(
                        "✅ Onboarding backfill for {} finished: {} date(s), status {}",
                        portfolio_id,
                        summary.dates_processed.len(),
                        summary.status.as_str()
                    );
                    return Ok(summary);
                }
                Err(AppError::AlreadyRunning) if attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let backoff = self.backoff_base * 2u32.pow(attempt - 1);
                    let jitter = Duration::from_millis(rand::random::<u64>() % 1000);
                    warn!(
                        "Onboarding backfill for {} blocked by an active run; retry {}/{} in {:?}",
                        portfolio_id,
                        attempt,
                        self.max_attempts - 1,
                        backoff + jitter
                    );
                    sleep(backoff + jitter).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
