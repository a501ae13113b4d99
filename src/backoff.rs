//! Retry and cooldown schedules, kept independent of the transport so they can
//! be exercised without real delays.

use async_trait::async_trait;
use std::time::Duration;

/// Suspends the crawl. Production code sleeps on the tokio timer; tests record.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed-delay retry schedule: at most `max_attempts` tries, `delay` between two tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Delay to wait after the failed `attempt` (1-based), or `None` once the
    /// budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt < self.max_attempts {
            Some(self.delay)
        } else {
            None
        }
    }
}

/// Periodic politeness pause during a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    /// Pause after every page number divisible by this.
    pub every: u32,
    /// Only pause while at least this many pages are left.
    pub min_remaining: u32,
    pub pause: Duration,
}

impl CooldownPolicy {
    pub fn pause_after(&self, page: u32, last_page: u32) -> Option<Duration> {
        if self.every == 0 || page % self.every != 0 {
            return None;
        }
        let remaining = last_page.saturating_sub(page);
        if remaining >= self.min_remaining {
            Some(self.pause)
        } else {
            None
        }
    }
}
