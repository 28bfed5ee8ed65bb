use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate};
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::engines::MarketView;
use crate::external::market_data_provider::{MarketDataProvider, ProviderError};
use crate::models::{PhaseCounters, ProgressStatus};
use crate::services::failure_cache::{FailureCache, FailureKind};
use crate::services::rate_limiter::RateLimiter;
use crate::store::{MarketDataCache, StoreError};

/// Phase 1: pre-populate the market data cache for a date's scoped symbol
/// set. Engines never talk to the provider; whatever this phase could not
/// fetch surfaces downstream as `InsufficientData`.
pub struct MarketDataService {
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<dyn MarketDataCache>,
    failure_cache: FailureCache,
    rate_limiter: Arc<RateLimiter>,
    max_retries: u32,
    backoff_base: Duration,
    lookback_days: i64,
    deadline: Duration,
}

/// Per-symbol outcome counters for one date's preparation.
#[derive(Debug, Default)]
pub struct PrepOutcome {
    pub counters: PhaseCounters,
    pub failed_symbols: Vec<(String, String)>,
}

impl MarketDataService {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        cache: Arc<dyn MarketDataCache>,
        rate_limiter: Arc<RateLimiter>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            failure_cache: FailureCache::new(),
            rate_limiter,
            max_retries: config.provider_max_retries,
            backoff_base: config.provider_backoff_base,
            lookback_days: config.lookback_days,
            deadline: config.market_data_deadline,
        }
    }

    pub fn failure_cache(&self) -> &FailureCache {
        &self.failure_cache
    }

    /// Fetch-and-cache every symbol's lookback window ending at `date`.
    /// Symbols already cached for the date are skipped; per-symbol failures
    /// are recorded and the rest of the set continues. Wall-clock is capped
    /// by the configured deadline.
    pub async fn prepare_date(
        &self,
        date: NaiveDate,
        symbols: &[String],
        cancel: &CancellationToken,
    ) -> PrepOutcome {
        let mut outcome = PrepOutcome::default();
        let deadline = Instant::now() + self.deadline;
        let from = date - ChronoDuration::days(self.lookback_days);

        info!(
            "📦 Preparing market data for {} ({} symbols, window {} → {})",
            date,
            symbols.len(),
            from,
            date
        );

        for (index, symbol) in symbols.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Market data preparation cancelled at symbol {}", symbol);
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "⏱️ Market data deadline reached for {}; {} symbol(s) left unfetched",
                    date,
                    symbols.len() - index
                );
                for remaining in &symbols[index..] {
                    outcome.counters.record(ProgressStatus::Failed);
                    outcome
                        .failed_symbols
                        .push((remaining.clone(), "preparation deadline exceeded".to_string()));
                }
                break;
            }

            if !is_valid_symbol(symbol) {
                debug!("⊘ Skipping malformed symbol '{}'", symbol);
                outcome.counters.record(ProgressStatus::Skipped);
                continue;
            }

            if let Some(failure) = self.failure_cache.active_failure(symbol) {
                debug!(
                    "⊘ Skipping {} - in failure cache ({:?}) until TTL expires",
                    symbol, failure.kind
                );
                outcome.counters.record(ProgressStatus::Skipped);
                continue;
            }

            // Already cached for this date means the whole window was
            // fetched by an earlier run or an earlier date of this run.
            match self.cache.get(symbol, date).await {
                Ok(Some(_)) => {
                    outcome.counters.record(ProgressStatus::Skipped);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Cache probe failed for {}: {}", symbol, e);
                }
            }

            match self.fetch_with_retries(symbol, from, date).await {
                Ok(written) => {
                    debug!("✓ Cached {} bars for {}", written, symbol);
                    outcome.counters.record(ProgressStatus::Succeeded);
                }
                Err(reason) => {
                    warn!("✗ Could not prepare {}: {}", symbol, reason);
                    outcome.counters.record(ProgressStatus::Failed);
                    outcome.failed_symbols.push((symbol.clone(), reason));
                }
            }
        }

        info!(
            "📦 Market data for {}: {} fetched, {} skipped, {} failed",
            date,
            outcome.counters.succeeded,
            outcome.counters.skipped,
            outcome.counters.failed
        );
        outcome
    }

    async fn fetch_with_retries(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u64, String> {
        let mut attempt = 0u32;

        loop {
            let _guard = self.rate_limiter.acquire().await;

            match self.provider.fetch_daily_bars(symbol, from, to).await {
                Ok(bars) => {
                    let valid: Vec<_> = bars.into_iter().filter(|b| b.is_valid()).collect();
                    let written = self
                        .cache
                        .put_many(&valid)
                        .await
                        .map_err(|e| format!("cache write failed: {}", e))?;
                    self.failure_cache.clear(symbol);
                    return Ok(written);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.backoff_base * 2u32.pow(attempt - 1);
                    let jitter = Duration::from_millis(rand::random::<u64>() % 250);
                    warn!(
                        "Retrying {} after {:?} (attempt {}/{}): {}",
                        symbol,
                        backoff + jitter,
                        attempt,
                        self.max_retries,
                        e
                    );
                    sleep(backoff + jitter).await;
                }
                Err(e) => {
                    let kind = match &e {
                        ProviderError::NotFound => FailureKind::NotFound,
                        ProviderError::RateLimited => FailureKind::RateLimited,
                        _ => FailureKind::ProviderError,
                    };
                    self.failure_cache.record_failure(symbol, kind);
                    return Err(e.to_string());
                }
            }
        }
    }

    /// Assemble the in-memory view a unit of work computes against, from
    /// cache only.
    pub async fn load_view<'a>(
        &self,
        as_of: NaiveDate,
        symbols: impl Iterator<Item = &'a str>,
    ) -> Result<MarketView, StoreError> {
        let from = as_of - ChronoDuration::days(self.lookback_days);
        let mut view = MarketView::new(as_of);
        for symbol in symbols {
            let bars = self.cache.range(symbol, from, as_of).await?;
            view.insert_bars(symbol, &bars);
        }
        Ok(view)
    }
}

/// Symbols worth sending to a provider: non-empty, with at least one letter.
fn is_valid_symbol(symbol: &str) -> bool {
    let symbol = symbol.trim();
    !symbol.is_empty() && symbol.chars().any(|c| c.is_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_validation() {
        assert!(is_valid_symbol("AAPL"));
        assert!(is_valid_symbol("BRK.B"));
        assert!(!is_valid_symbol(""));
        assert!(!is_valid_symbol("   "));
        assert!(!is_valid_symbol("123"));
    }
}
