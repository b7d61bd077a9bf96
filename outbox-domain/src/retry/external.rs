use super::RetryPolicy;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 外部调度器：由部署方提供重试判定与计划时间
pub trait ExternalRetrySchedule: Send + Sync {
    fn allows_retry(&self, retry_times: u32, max_retry_times: u32) -> bool;
    fn scheduled_at(&self, next_retry_times: u32) -> DateTime<Utc>;
}

/// 透传到 `ExternalRetrySchedule` 的策略
#[derive(Clone)]
pub struct ExternalRetryPolicy {
    schedule: Arc<dyn ExternalRetrySchedule>,
}

impl ExternalRetryPolicy {
    pub fn new(schedule: Arc<dyn ExternalRetrySchedule>) -> Self {
        Self { schedule }
    }
}

impl RetryPolicy for ExternalRetryPolicy {
    fn should_retry(&self, retry_times: u32, max_retry_times: u32) -> bool {
        self.schedule.allows_retry(retry_times, max_retry_times)
    }

    fn next_retry_time(&self, next_retry_times: u32) -> DateTime<Utc> {
        self.schedule.scheduled_at(next_retry_times)
    }
}
