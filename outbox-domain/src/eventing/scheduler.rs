//! 重试调度器（RetryScheduler）
//!
//! 定期扫描到期的 `Retrying` 消费记录，从台账载荷重建事件并以 `is_retry = true`
//! 交回分发器。每条记录独立处理，单条失败只计数与记日志，不影响同批其它记录；
//! 载荷缺失或无法反序列化的记录直接记为 `Failed` 并升级。
//!
//! 首轮处理中途崩溃或挂起的记录，在处理租约到期后同样会被扫描接管。
//!
//! 多个节点可能同时扫描到同一条记录，分发器的版本号条件写入保证只有一次状态流转落盘。
//!
use super::dispatcher::{DispatchOutcome, Dispatcher};
use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::{DomainError, DomainResult as Result};
use crate::event::Event;
use crate::ledger::{LedgerRecord, LedgerRepository};
use crate::serializer::{EventSerializer, JsonEventSerializer};
use bon::Builder;
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 一次扫描的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub selected: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ScanReport {
    fn record(&mut self, outcome: &Result<DispatchOutcome>) {
        match outcome {
            Ok(DispatchOutcome::Succeeded) => self.succeeded += 1,
            Ok(DispatchOutcome::RetryScheduled { .. }) => self.rescheduled += 1,
            Ok(DispatchOutcome::Failed | DispatchOutcome::NoHandler) => self.failed += 1,
            Ok(
                DispatchOutcome::Skipped(_)
                | DispatchOutcome::MissingRecord
                | DispatchOutcome::Conflict,
            ) => self.skipped += 1,
            Err(_) => self.errors += 1,
        }
    }
}

#[derive(Builder)]
pub struct RetryScheduler {
    ledger: Arc<dyn LedgerRepository>,
    dispatcher: Arc<Dispatcher>,
    #[builder(default = Arc::new(JsonEventSerializer) as Arc<dyn EventSerializer>)]
    serializer: Arc<dyn EventSerializer>,
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
    #[builder(default)]
    config: SchedulerConfig,
}

impl RetryScheduler {
    /// 按配置的批量大小扫描一次
    pub async fn run_once(&self) -> Result<ScanReport> {
        self.scan(self.config.batch_size).await
    }

    pub async fn scan(&self, batch_size: usize) -> Result<ScanReport> {
        let due = self
            .ledger
            .find_due_retries(self.clock.now(), batch_size)
            .await?;

        let mut report = ScanReport {
            selected: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let concurrency = self.config.concurrency.max(1);
        let outcomes: Vec<Result<DispatchOutcome>> = stream::iter(due)
            .map(|record| async move { self.redispatch(record).await })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }

        info!(
            selected = report.selected,
            succeeded = report.succeeded,
            rescheduled = report.rescheduled,
            failed = report.failed,
            skipped = report.skipped,
            errors = report.errors,
            "retry scan finished"
        );
        Ok(report)
    }

    async fn redispatch(&self, record: LedgerRecord) -> Result<DispatchOutcome> {
        // 无法重放的记录若原样保留，会在每次扫描中排在最前并占满批次
        let result = match self.rebuild(&record) {
            Ok(event) => self.dispatcher.dispatch(&event, true).await,
            Err(e) => self.dispatcher.abandon(&record, &e.to_string()).await,
        };

        match &result {
            Ok(outcome) => debug!(
                event_id = record.event_id(),
                retry_times = record.retry_times(),
                ?outcome,
                "retry dispatched"
            ),
            Err(e) => warn!(
                event_id = record.event_id(),
                event_type = record.event_type(),
                error = %e,
                "retry dispatch failed"
            ),
        }
        result
    }

    /// 由台账记录重建事件；`occurred_on` 取记录创建时间
    fn rebuild(&self, record: &LedgerRecord) -> Result<Event> {
        let bytes = record.payload().ok_or_else(|| DomainError::InvalidState {
            reason: format!("ledger record {} has no payload to replay", record.id()),
        })?;
        let payload = self.serializer.deserialize(bytes, record.event_type())?;

        Ok(Event::builder()
            .id(record.event_id())
            .event_type(record.event_type())
            .payload(payload)
            .occurred_on(record.create_time())
            .max_retry_override(record.max_retry_times())
            .build())
    }
}
