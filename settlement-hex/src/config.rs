//! Tunables for the application services.

use std::time::Duration;

use rand::Rng;

/// Retry policy for PSP calls that return a transient error.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total calls per operation, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the call following `attempt` (1-based).
    ///
    /// Exponential in the attempt number, with up to 25% random jitter,
    /// never above `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let exp = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = (exp.as_millis() / 4) as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        (exp + jitter).min(self.max_delay)
    }
}

/// Settings shared by the coordinator, aggregator and matcher.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Permits in the worker pool shared by batches and aggregations
    pub worker_pool_size: usize,
    pub retry: RetryPolicy,
    /// None disables the batch deadline
    pub batch_timeout: Option<Duration>,
    pub source_timeout: Duration,
    /// Heuristic reconciliation window in seconds
    pub reconcile_window_secs: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            retry: RetryPolicy::default(),
            batch_timeout: Some(Duration::from_secs(30)),
            source_timeout: Duration::from_secs(2),
            reconcile_window_secs: 300,
        }
    }
}
