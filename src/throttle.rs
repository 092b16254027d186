//! Global request pacing shared by every scraping task

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// A single cooldown shared across all sources.
///
/// Holds the instant at which the next request may start. Callers wait for it
/// and push it forward while holding the lock, so two tasks never compute
/// overlapping waits.
pub struct GlobalRateLimiter {
    interval: Duration,
    next_allowed: Mutex<Instant>,
}

impl GlobalRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_allowed: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a request may be issued
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            debug!("Global rate limit: waiting {:?}", *next - now);
            tokio::time::sleep_until(*next).await;
        }
        *next = Instant::now().max(*next) + self.interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_requests() {
        let limiter = GlobalRateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_shared_across_tasks() {
        let limiter = Arc::new(GlobalRateLimiter::new(Duration::from_millis(500)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
        assert_eq!(times[3] - start, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let limiter = GlobalRateLimiter::new(Duration::ZERO);
        tokio_test::assert_ready!(tokio_test::task::spawn(limiter.acquire()).poll());
    }
}
