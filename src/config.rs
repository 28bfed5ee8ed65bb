use std::time::Duration;

use chrono::NaiveDate;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// All tunables for the batch orchestration core, read once at bootstrap.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Tracker self-expiry; a run older than this is considered dead.
    pub run_timeout: Duration,
    /// Portfolios processed in parallel within a date.
    pub outer_concurrency: usize,
    /// Per-position engines in parallel within a portfolio.
    pub inner_concurrency: usize,
    /// Soft wall-clock cap per engine invocation.
    pub engine_timeout: Duration,
    /// Hard wall-clock cap for market data preparation per date.
    pub market_data_deadline: Duration,
    /// Calendar days of history to pre-populate before each processed date.
    pub lookback_days: i64,
    /// Backfill floor when a portfolio has no snapshot history; unset means
    /// one year before the run.
    pub backfill_earliest_date: Option<NaiveDate>,
    /// Per-symbol provider fetch retries.
    pub provider_max_retries: u32,
    /// Exponential backoff base for provider retries.
    pub provider_backoff_base: Duration,
    /// Concurrent provider requests.
    pub provider_max_concurrency: usize,
    /// Provider requests per minute.
    pub provider_requests_per_minute: u32,
    /// Rolling retention window for run history rows.
    pub run_retention_days: i64,
    /// Onboarding driver retries when the tracker gate is held.
    pub onboarding_max_attempts: u32,
    /// Annual risk-free rate for greeks and ratio metrics.
    pub risk_free_rate: f64,
    /// Daily trigger, 5-field or 6-field cron.
    pub scheduler_cron: String,
}

impl BatchConfig {
    pub fn from_env() -> Self {
        Self {
            run_timeout: Duration::from_secs(
                env_parse("BATCH_RUN_TIMEOUT_MINUTES", 30u64) * 60,
            ),
            outer_concurrency: env_parse(
                "BATCH_OUTER_CONCURRENCY",
                std::thread::available_parallelism()
                    .map(|n| n.get().min(4))
                    .unwrap_or(4),
            ),
            inner_concurrency: env_parse("BATCH_INNER_CONCURRENCY", 4),
            engine_timeout: Duration::from_secs(
                env_parse("BATCH_ENGINE_TIMEOUT_SECONDS", 300u64),
            ),
            market_data_deadline: Duration::from_secs(
                env_parse("BATCH_MARKET_DATA_DEADLINE_MINUTES", 15u64) * 60,
            ),
            lookback_days: env_parse("BATCH_LOOKBACK_DAYS", 150),
            backfill_earliest_date: std::env::var("BATCH_BACKFILL_EARLIEST_DATE")
                .ok()
                .and_then(|v| v.parse::<NaiveDate>().ok()),
            provider_max_retries: env_parse("PROVIDER_MAX_RETRIES", 3),
            provider_backoff_base: Duration::from_millis(
                env_parse("PROVIDER_BACKOFF_BASE_MS", 1000u64),
            ),
            provider_max_concurrency: env_parse("PROVIDER_MAX_CONCURRENCY", 3),
            provider_requests_per_minute: env_parse("PROVIDER_REQUESTS_PER_MINUTE", 60),
            run_retention_days: env_parse("BATCH_RUN_RETENTION_DAYS", 90),
            onboarding_max_attempts: env_parse("ONBOARDING_MAX_ATTEMPTS", 5),
            risk_free_rate: env_parse("RISK_FREE_RATE", 0.045),
            scheduler_cron: std::env::var("SCHEDULER_CRON")
                .unwrap_or_else(|_| "0 21 * * 1-5".to_string()),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(30 * 60),
            outer_concurrency: 4,
            inner_concurrency: 4,
            engine_timeout: Duration::from_secs(300),
            market_data_deadline: Duration::from_secs(15 * 60),
            lookback_days: 150,
            backfill_earliest_date: None,
            provider_max_retries: 3,
            provider_backoff_base: Duration::from_millis(1000),
            provider_max_concurrency: 3,
            provider_requests_per_minute: 60,
            run_retention_days: 90,
            onboarding_max_attempts: 5,
            risk_free_rate: 0.045,
            scheduler_cron: "0 21 * * 1-5".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BatchConfig::default();
        assert_eq!(config.run_timeout, Duration::from_secs(1800));
        assert_eq!(config.inner_concurrency, 4);
        assert_eq!(config.provider_max_retries, 3);
        assert_eq!(config.run_retention_days, 90);
        assert_eq!(config.scheduler_cron, "0 21 * * 1-5");
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("TEST_ENV_PARSE_GARBAGE", "not-a-number");
        assert_eq!(env_parse("TEST_ENV_PARSE_GARBAGE", 7u32), 7);
        std::env::remove_var("TEST_ENV_PARSE_GARBAGE");
    }
}
