use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// A remembered provider failure for a symbol.
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub failed_at: DateTime<Utc>,
    pub kind: FailureKind,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Symbol does not exist at the provider
    NotFound,
    /// Temporary quota exhaustion
    RateLimited,
    /// Anything else the provider returned
    ProviderError,
}

/// Thread-safe TTL cache of symbols that recently failed to fetch.
///
/// A multi-day backfill touches the same symbol set once per planned date;
/// without this, a dead ticker would burn a provider call on every one of
/// them.
#[derive(Clone, Default)]
pub struct FailureCache {
    cache: Arc<DashMap<String, FailureInfo>>,
}

impl FailureCache {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Active (unexpired) failure for a symbol, if any. Expired entries are
    /// evicted on the way out.
    pub fn active_failure(&self, symbol: &str) -> Option<FailureInfo> {
        if let Some(entry) = self.cache.get(symbol) {
            let info = entry.value().clone();
            let expiry = info.failed_at + Duration::hours(info.ttl_hours);
            if Utc::now() < expiry {
                return Some(info);
            }
            drop(entry); // release the read guard before removing
            self.cache.remove(symbol);
        }
        None
    }

    pub fn record_failure(&self, symbol: &str, kind: FailureKind) {
        let ttl_hours = match kind {
            FailureKind::NotFound => 24,
            FailureKind::RateLimited => 1,
            FailureKind::ProviderError => 6,
        };

        self.cache.insert(
            symbol.to_string(),
            FailureInfo {
                failed_at: Utc::now(),
                kind,
                ttl_hours,
            },
        );
    }

    /// Forget a symbol after a successful fetch.
    pub fn clear(&self, symbol: &str) {
        self.cache.remove(symbol);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
