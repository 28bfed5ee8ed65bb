use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};

/// Rate limiter in front of the market data provider.
///
/// Every provider fetch in a batch run goes through one shared instance, so
/// the pre-population phase is the single choke point for external quota.
pub struct RateLimiter {
    /// Limits concurrent in-flight requests
    semaphore: Arc<Semaphore>,
    /// Last request timestamp, for the minimum inter-request delay
    last_request: Arc<Mutex<Instant>>,
    min_delay: Duration,
}

impl RateLimiter {
    /// `max_concurrent` in-flight requests, `requests_per_minute` sustained.
    pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let min_delay_ms = 60_000 / requests_per_minute.max(1) as u64;
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            last_request: Arc::new(Mutex::new(Instant::now() - Duration::from_secs(60))),
            min_delay: Duration::from_millis(min_delay_ms),
        }
    }

    /// Wait for a permit and for the inter-request delay to elapse. The
    /// returned guard releases the permit when dropped.
    pub async fn acquire(&self) -> RateLimitGuard {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore never closes");

        let wait_time = {
            let last = self.last_request.lock();
            let elapsed = last.elapsed();
            (elapsed < self.min_delay).then(|| self.min_delay - elapsed)
        }; // lock released before sleeping

        if let Some(delay) = wait_time {
            sleep(delay).await;
        }

        *self.last_request.lock() = Instant::now();

        RateLimitGuard { _permit: permit }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Holds a rate limit permit; released on drop.
pub struct RateLimitGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn enforces_minimum_delay_between_requests() {
        // 60 per minute = one per second
        let limiter = RateLimiter::new(2, 60);

        let start = StdInstant::now();
        let guard1 = limiter.acquire().await;
        assert!(start.elapsed().as_millis() < 100, "first request should be immediate");
        drop(guard1);

        let _guard2 = limiter.acquire().await;
        assert!(start.elapsed().as_millis() >= 900, "second request should wait ~1s");
    }

    #[tokio::test]
    async fn bounds_concurrent_requests() {
        let limiter = Arc::new(RateLimiter::new(2, 120));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    let _guard = limiter.acquire().await;
                    sleep(Duration::from_millis(100)).await;
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
