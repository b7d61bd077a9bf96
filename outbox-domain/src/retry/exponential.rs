use super::RetryPolicy;
use crate::clock::Clock;
use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// 指数退避：`now + min(base_delay * multiplier^(n-1), max_delay)`
#[derive(Clone)]
pub struct ExponentialBackoffPolicy {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl ExponentialBackoffPolicy {
    pub fn new(
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
            clock,
        }
    }

    pub fn from_config(config: &RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.base_delay, config.multiplier, config.max_delay, clock)
    }

    /// 第 n 次重试前的等待时长
    pub fn delay(&self, next_retry_times: u32) -> Duration {
        let exponent = next_retry_times.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, retry_times: u32, max_retry_times: u32) -> bool {
        retry_times < max_retry_times
    }

    fn next_retry_time(&self, next_retry_times: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(next_retry_times))
            .unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl std::fmt::Debug for ExponentialBackoffPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExponentialBackoffPolicy")
            .field("base_delay", &self.base_delay)
            .field("multiplier", &self.multiplier)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}
