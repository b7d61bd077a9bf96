//! 重试策略（retry）
//!
//! 分发器在处理失败时只询问两件事：还能否重试、下一次何时重试。
//! - `ExponentialBackoffPolicy`：指数退避，带上限；
//! - `ExternalRetryPolicy`：把决策委托给外部调度器。
//!
//! 每个部署只启用一种，由 `RetryConfig::strategy` 选择（见 `build_retry_policy`）。
//!
mod exponential;
mod external;

pub use exponential::ExponentialBackoffPolicy;
pub use external::{ExternalRetryPolicy, ExternalRetrySchedule};

use crate::clock::Clock;
use crate::config::{RetryConfig, RetryStrategy};
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait RetryPolicy: Send + Sync {
    /// `retry_times` 为已发生的重试次数
    fn should_retry(&self, retry_times: u32, max_retry_times: u32) -> bool;

    /// 第 `next_retry_times` 次重试（从 1 开始）的计划时间
    fn next_retry_time(&self, next_retry_times: u32) -> DateTime<Utc>;
}

/// 按配置构造唯一生效的重试策略
pub fn build_retry_policy(
    config: &RetryConfig,
    clock: Arc<dyn Clock>,
    external: Option<Arc<dyn ExternalRetrySchedule>>,
) -> DomainResult<Arc<dyn RetryPolicy>> {
    match config.strategy {
        RetryStrategy::ExponentialBackoff => {
            config.validate()?;
            Ok(Arc::new(ExponentialBackoffPolicy::from_config(config, clock)))
        }
        RetryStrategy::External => {
            let schedule = external.ok_or_else(|| {
                DomainError::invalid_config(
                    "retry.strategy = external requires an external retry schedule",
                )
            })?;
            Ok(Arc::new(ExternalRetryPolicy::new(schedule)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    struct Never;
    impl ExternalRetrySchedule for Never {
        fn allows_retry(&self, _retry_times: u32, _max_retry_times: u32) -> bool {
            false
        }
        fn scheduled_at(&self, _next_retry_times: u32) -> DateTime<Utc> {
            Utc::now()
        }
    }

    #[test]
    fn external_strategy_requires_schedule() {
        let cfg = RetryConfig {
            strategy: RetryStrategy::External,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::default());
        assert!(build_retry_policy(&cfg, clock.clone(), None).is_err());

        let policy = build_retry_policy(&cfg, clock, Some(Arc::new(Never))).unwrap();
        assert!(!policy.should_retry(0, 3));
    }

    #[test]
    fn default_strategy_is_exponential() {
        let clock = Arc::new(ManualClock::default());
        let policy = build_retry_policy(&RetryConfig::default(), clock, None).unwrap();
        assert!(policy.should_retry(2, 3));
        assert!(!policy.should_retry(3, 3));
    }
}
