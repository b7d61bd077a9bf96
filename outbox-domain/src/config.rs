//! 管线配置（RelayConfig）
//!
//! 所有字段都有默认值，可由任意 serde 数据源（文件、环境变量）反序列化，
//! 时间间隔使用 humantime 格式（如 `"500ms"`、`"10s"`）。
//!
use crate::error::{DomainError, DomainResult};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 发布节点 ID / 消费组名，参与幂等键
    pub owner_group: String,
    /// 当前实例名，仅用于审计
    pub owner_name: String,
    /// 事件未指定覆盖值时的最大重试次数
    pub default_max_retries: u32,
    /// 订阅循环同时分发的事件数
    pub handler_concurrency: usize,
    /// 单次处理的租约时长；超时未写回结果的记录由重试扫描接管
    #[serde(with = "humantime_serde")]
    pub processing_timeout: Duration,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            owner_group: "default".to_string(),
            owner_name: "local".to_string(),
            default_max_retries: 3,
            handler_concurrency: 8,
            processing_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> DomainResult<()> {
        if self.owner_group.trim().is_empty() {
            return Err(DomainError::invalid_config("owner_group must not be empty"));
        }
        if self.handler_concurrency == 0 {
            return Err(DomainError::invalid_config("handler_concurrency must be > 0"));
        }
        if self.processing_timeout.is_zero() {
            return Err(DomainError::invalid_config("processing_timeout must be > 0"));
        }
        self.retry.validate()?;
        self.scheduler.validate()
    }
}

/// 重试策略选择，每个部署只启用其中一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    ExponentialBackoff,
    /// 由外部调度器决定是否重试及重试时间
    External,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::ExponentialBackoff,
            base_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> DomainResult<()> {
        if self.base_delay.is_zero() {
            return Err(DomainError::invalid_config("retry.base_delay must be > 0"));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(DomainError::invalid_config("retry.multiplier must be > 1"));
        }
        if self.max_delay < self.base_delay {
            return Err(DomainError::invalid_config(
                "retry.max_delay must be >= retry.base_delay",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 到期扫描的间隔
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// 单次扫描最多取出的记录数
    pub batch_size: usize,
    /// 单批次内并发重投的记录数
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(30),
            batch_size: 100,
            concurrency: 4,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> DomainResult<()> {
        if self.batch_size == 0 {
            return Err(DomainError::invalid_config("scheduler.batch_size must be > 0"));
        }
        if self.concurrency == 0 {
            return Err(DomainError::invalid_config("scheduler.concurrency must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(DomainError::invalid_config(
                "scheduler.poll_interval must be > 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RelayConfig::default().validate().unwrap();
    }

    #[test]
    fn deserialize_partial_json_with_humantime() {
        let cfg: RelayConfig = serde_json::from_value(serde_json::json!({
            "owner_group": "billing",
            "processing_timeout": "90s",
            "retry": { "base_delay": "500ms", "max_delay": "1m" },
            "scheduler": { "poll_interval": "2s", "batch_size": 10 }
        }))
        .unwrap();

        assert_eq!(cfg.owner_group, "billing");
        assert_eq!(cfg.default_max_retries, 3);
        assert_eq!(cfg.processing_timeout, Duration::from_secs(90));
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(500));
        assert_eq!(cfg.retry.max_delay, Duration::from_secs(60));
        assert_eq!(cfg.retry.strategy, RetryStrategy::ExponentialBackoff);
        assert_eq!(cfg.scheduler.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.scheduler.batch_size, 10);
        assert_eq!(cfg.scheduler.concurrency, 4);
        cfg.validate().unwrap();
    }

    #[test]
    fn external_strategy_is_selectable() {
        let cfg: RetryConfig =
            serde_json::from_value(serde_json::json!({ "strategy": "external" })).unwrap();
        assert_eq!(cfg.strategy, RetryStrategy::External);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = RelayConfig::default();
        cfg.scheduler.batch_size = 0;
        assert!(matches!(
            cfg.validate(),
            Err(DomainError::InvalidConfig { .. })
        ));

        let mut cfg = RelayConfig::default();
        cfg.processing_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.retry.multiplier = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.retry.max_delay = Duration::from_secs(1);
        assert!(cfg.validate().is_err());
    }
}
