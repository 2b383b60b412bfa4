//! Shared requests-per-minute limiter for HTTP-backed `LlmClient` adapters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};

/// Bounds concurrent in-flight requests to `requests_per_minute` permits and
/// additionally spaces consecutive requests by `60_000 / requests_per_minute`
/// milliseconds, so a burst of queued callers still trickles out at the
/// configured rate rather than firing all at once when permits free up.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    last_request_started: Arc<AtomicU64>,
    min_interval: Duration,
    epoch: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let permits = (requests_per_minute as usize).max(1);
        let min_interval_ms = (60_000 / requests_per_minute.max(1) as u64).max(10);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            last_request_started: Arc::new(AtomicU64::new(0)),
            min_interval: Duration::from_millis(min_interval_ms),
            epoch: Instant::now(),
        }
    }

    /// Acquire a permit, sleeping first if the minimum inter-request
    /// interval hasn't elapsed since the last acquisition.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("rate limiter semaphore is never closed");

        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let last_ms = self.last_request_started.load(Ordering::Relaxed);
        let elapsed = Duration::from_millis(now_ms.saturating_sub(last_ms));
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        self.last_request_started
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spaces_consecutive_acquisitions() {
        let limiter = RateLimiter::new(600); // 100ms interval
        let start = Instant::now();
        {
            let _p = limiter.acquire().await;
        }
        {
            let _p = limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
