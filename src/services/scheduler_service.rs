use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::models::{RunScope, RunSource};
use crate::orchestrator::Orchestrator;

/// Daily trigger for the universe backfill run. One job, one schedule; the
/// tracker gate makes stacking impossible, so an `AlreadyRunning` tick is
/// logged and skipped rather than queued.
pub struct BatchScheduler {
    scheduler: JobScheduler,
    orchestrator: Arc<Orchestrator>,
    cron: String,
}

impl BatchScheduler {
    pub async fn new(orchestrator: Arc<Orchestrator>, cron: &str) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            orchestrator,
            cron: normalize_cron(cron),
        })
    }

    pub async fn start(&mut self) -> Result<(), AppError> {
        info!("🚀 Starting batch scheduler...");

        let orchestrator = Arc::clone(&self.orchestrator);
        let job = Job::new_async(self.cron.as_str(), move |_uuid, _lock| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                info!("🏃 Scheduler tick: starting nightly universe backfill");
                match orchestrator
                    .run_batch(RunScope::Universe, true, RunSource::Scheduler)
                    .await
                {
                    Ok(summary) => {
                        info!(
                            "✅ Nightly run {} finished with status {}",
                            summary.run_id,
                            summary.status.as_str()
                        );
                    }
                    Err(AppError::AlreadyRunning) => {
                        warn!("⏭️ Nightly run skipped: another run is in flight");
                    }
                    Err(e) => {
                        error!("❌ Nightly run failed to start: {}", e);
                    }
                }
            })
        })
        .map_err(|e| AppError::External(format!("Failed to create nightly job: {}", e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add nightly job: {}", e)))?;

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;

        info!("📅 Scheduled nightly universe backfill [cron: {}]", self.cron);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), AppError> {
        info!("🛑 Stopping batch scheduler...");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;
        Ok(())
    }
}

/// The configuration surface documents 5-field cron; the scheduler runtime
/// wants a seconds field in front. Accept both.
fn normalize_cron(cron: &str) -> String {
    let fields = cron.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", cron)
    } else {
        cron.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_gets_a_seconds_column() {
        assert_eq!(normalize_cron("0 21 * * 1-5"), "0 0 21 * * 1-5");
    }

    #[test]
    fn six_field_cron_passes_through() {
        assert_eq!(normalize_cron("0 0 21 * * 1-5"), "0 0 21 * * 1-5");
    }
}
