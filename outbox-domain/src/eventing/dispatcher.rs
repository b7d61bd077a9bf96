//! 事件分发器（Dispatcher）
//!
//! 消费端的核心状态机：
//! 1. 以 `(event_id, CONSUME, owner_group, 0)` 为幂等键取得（或原子创建）台账记录；
//! 2. 按类型标签选出处理器并同步执行；
//! 3. 根据结果以版本号为条件写入 `Success` / `Retrying` / `Failed`；
//! 4. 重试耗尽时调用失败升级链。
//!
//! 处理器的错误与 panic 都在这里被吸收，只有台账本身的故障会返回给调用方。
//!
use super::failure::FailureHandlerChain;
use super::handler::{EventHandler, HandlerRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::error::DomainResult as Result;
use crate::event::Event;
use crate::ledger::{
    CreateOutcome, LedgerAction, LedgerKey, LedgerRecord, LedgerRepository, LedgerStatus,
    Transition, truncate_message,
};
use crate::retry::RetryPolicy;
use crate::serializer::{EventSerializer, JsonEventSerializer};
use bon::Builder;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::dispatcher_builder::{
    IsUnset, SetFailureChain, SetRegistry, State as BuilderState,
};

/// 单次分发的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 处理成功并记为 `Success`
    Succeeded,
    /// 已处理或正在处理，未做任何事
    Skipped(LedgerStatus),
    /// 处理失败，已安排第 `retry_times` 次重试
    RetryScheduled {
        retry_times: u32,
        next_retry_time: DateTime<Utc>,
    },
    /// 重试耗尽，记为 `Failed` 并已升级
    Failed,
    /// 没有匹配的处理器，记为 `Failed`
    NoHandler,
    /// 重试请求找不到首轮创建的记录
    MissingRecord,
    /// 状态写入被并发写者抢先，本次结果被丢弃
    Conflict,
}

#[derive(Builder)]
pub struct Dispatcher {
    ledger: Arc<dyn LedgerRepository>,
    #[builder(setters(vis = "pub(crate)"))]
    registry: HandlerRegistry,
    retry_policy: Arc<dyn RetryPolicy>,
    #[builder(default, setters(vis = "pub(crate)"))]
    failure_chain: FailureHandlerChain,
    #[builder(default = Arc::new(JsonEventSerializer) as Arc<dyn EventSerializer>)]
    serializer: Arc<dyn EventSerializer>,
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
    #[builder(default)]
    config: RelayConfig,
}

impl<S: BuilderState> DispatcherBuilder<S> {
    pub fn event_handlers(
        self,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) -> DispatcherBuilder<SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        self.registry(HandlerRegistry::new(handlers))
    }

    pub fn failure_handlers(
        self,
        handlers: Vec<Arc<dyn super::FailureHandler>>,
    ) -> DispatcherBuilder<SetFailureChain<S>>
    where
        <S as BuilderState>::FailureChain: IsUnset,
    {
        self.failure_chain(FailureHandlerChain::new(handlers))
    }
}

/// 首轮分发对幂等键的争用结果
enum Acquired {
    Owned(LedgerRecord),
    Busy(LedgerStatus),
}

impl Dispatcher {
    pub fn owner_group(&self) -> &str {
        &self.config.owner_group
    }

    pub async fn dispatch(&self, event: &Event, is_retry: bool) -> Result<DispatchOutcome> {
        let key = LedgerKey::active(event.id(), LedgerAction::Consume, self.owner_group());

        let record = if is_retry {
            let Some(record) = self.ledger.find(&key).await? else {
                warn!(
                    event_id = event.id(),
                    event_type = event.event_type(),
                    "retry references no ledger record, aborting"
                );
                return Ok(DispatchOutcome::MissingRecord);
            };
            match record.status() {
                LedgerStatus::Retrying => record,
                LedgerStatus::Created => match self.write(&record, self.claim()).await? {
                    Some(claimed) => claimed,
                    None => return Ok(DispatchOutcome::Skipped(LedgerStatus::Created)),
                },
                status @ (LedgerStatus::Success | LedgerStatus::Failed) => {
                    debug!(event_id = event.id(), %status, "record is terminal, retry ignored");
                    return Ok(DispatchOutcome::Skipped(status));
                }
            }
        } else {
            match self.acquire(event, &key).await? {
                Acquired::Owned(record) => record,
                Acquired::Busy(status) => {
                    debug!(event_id = event.id(), %status, "event already handled or in flight");
                    return Ok(DispatchOutcome::Skipped(status));
                }
            }
        };

        let Some(handler) = self.registry.select(event) else {
            warn!(
                event_id = event.id(),
                event_type = event.event_type(),
                "no handler matched event"
            );
            let message = format!("no handler matched event type {}", event.event_type());
            return Ok(match self.write(&record, Transition::Failed { message }).await? {
                Some(_) => DispatchOutcome::NoHandler,
                None => DispatchOutcome::Conflict,
            });
        };

        let result = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
        match result {
            Ok(Ok(())) => self.on_success(event, &record).await,
            Ok(Err(e)) => self.on_failure(event, &record, format!("{e:#}")).await,
            Err(panic) => {
                let reason = format!("handler panicked: {}", panic_message(panic.as_ref()));
                self.on_failure(event, &record, reason).await
            }
        }
    }

    /// 首轮分发：查询或原子创建记录；落败的创建者以胜出者记录为准
    async fn acquire(&self, event: &Event, key: &LedgerKey) -> Result<Acquired> {
        let mut current = self.ledger.find(key).await?;
        let mut may_reopen = true;

        loop {
            let Some(record) = current.take() else {
                match self.ledger.create(self.new_record(event)?).await? {
                    CreateOutcome::Created(record) => return Ok(Acquired::Owned(record)),
                    CreateOutcome::Existing(winner) => {
                        debug!(event_id = event.id(), "lost creation race, using winner's record");
                        current = Some(winner);
                        may_reopen = false;
                        continue;
                    }
                }
            };

            match record.status() {
                LedgerStatus::Success | LedgerStatus::Retrying => {
                    return Ok(Acquired::Busy(record.status()));
                }
                LedgerStatus::Created => {
                    return Ok(match self.write(&record, self.claim()).await? {
                        Some(claimed) => Acquired::Owned(claimed),
                        None => Acquired::Busy(LedgerStatus::Created),
                    });
                }
                LedgerStatus::Failed if may_reopen => {
                    // 人工重新投递：逻辑删除失败记录，腾出幂等键
                    if !self.ledger.tombstone(&record, self.clock.now()).await? {
                        return Ok(Acquired::Busy(LedgerStatus::Failed));
                    }
                    info!(
                        event_id = event.id(),
                        retry_times = record.retry_times(),
                        "reopening failed event"
                    );
                    may_reopen = false;
                }
                LedgerStatus::Failed => return Ok(Acquired::Busy(LedgerStatus::Failed)),
            }
        }
    }

    fn new_record(&self, event: &Event) -> Result<LedgerRecord> {
        let now = self.clock.now();
        Ok(LedgerRecord::builder()
            .event_id(event.id())
            .action(LedgerAction::Consume)
            .owner_group(self.config.owner_group.as_str())
            .owner_name(self.config.owner_name.as_str())
            .event_type(event.event_type())
            .status(LedgerStatus::Retrying)
            .payload(self.serializer.serialize(event.payload())?)
            .retry_times(0)
            .next_retry_time(self.lease_until(now))
            .max_retry_times(
                event
                    .max_retry_override()
                    .unwrap_or(self.config.default_max_retries),
            )
            .create_time(now)
            .update_time(now)
            .build())
    }

    /// 处理租约的截止时间：届时仍未写回结果的记录视为遗弃，由重试扫描接管
    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.processing_timeout)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn claim(&self) -> Transition {
        Transition::Claimed {
            lease_until: self.lease_until(self.clock.now()),
        }
    }

    /// 放弃一条无法重放的记录：以版本号为条件记为 `Failed` 并升级
    pub(crate) async fn abandon(
        &self,
        record: &LedgerRecord,
        reason: &str,
    ) -> Result<DispatchOutcome> {
        let message = format!("replay aborted: {}", truncate_message(reason));
        let Some(failed) = self.write(record, Transition::Failed { message }).await? else {
            return Ok(DispatchOutcome::Conflict);
        };
        error!(
            event_id = record.event_id(),
            event_type = record.event_type(),
            retry_times = record.retry_times(),
            error = reason,
            "ledger record cannot be replayed, marked failed"
        );
        let event = Event::builder()
            .id(record.event_id())
            .event_type(record.event_type())
            .payload(serde_json::Value::Null)
            .occurred_on(record.create_time())
            .max_retry_override(record.max_retry_times())
            .build();
        self.failure_chain.escalate(&event, &failed, reason).await;
        Ok(DispatchOutcome::Failed)
    }

    async fn on_success(&self, event: &Event, record: &LedgerRecord) -> Result<DispatchOutcome> {
        Ok(match self.write(record, Transition::Succeeded).await? {
            Some(_) => {
                debug!(event_id = event.id(), "event handled");
                DispatchOutcome::Succeeded
            }
            None => DispatchOutcome::Conflict,
        })
    }

    async fn on_failure(
        &self,
        event: &Event,
        record: &LedgerRecord,
        reason: String,
    ) -> Result<DispatchOutcome> {
        let retry_times = record.retry_times();

        if self
            .retry_policy
            .should_retry(retry_times, record.max_retry_times())
        {
            let next_retry_times = retry_times + 1;
            let next_retry_time = self.retry_policy.next_retry_time(next_retry_times);
            let transition = Transition::RetryScheduled {
                retry_times: next_retry_times,
                next_retry_time,
                message: truncate_message(&reason),
            };
            return Ok(match self.write(record, transition).await? {
                Some(_) => {
                    info!(
                        event_id = event.id(),
                        event_type = event.event_type(),
                        retry_times = next_retry_times,
                        %next_retry_time,
                        error = %reason,
                        "event handling failed, retry scheduled"
                    );
                    DispatchOutcome::RetryScheduled {
                        retry_times: next_retry_times,
                        next_retry_time,
                    }
                }
                None => DispatchOutcome::Conflict,
            });
        }

        let message = format!("max retries exceeded: {}", truncate_message(&reason));
        let Some(failed) = self.write(record, Transition::Failed { message }).await? else {
            return Ok(DispatchOutcome::Conflict);
        };
        error!(
            event_id = event.id(),
            event_type = event.event_type(),
            retry_times,
            error = %reason,
            "event handling failed permanently"
        );
        // 只有成功写入 Failed 的一方负责升级
        self.failure_chain.escalate(event, &failed, &reason).await;
        Ok(DispatchOutcome::Failed)
    }

    /// 以版本号为条件写入；被并发写者抢先时返回 `None` 且不重试
    async fn write(
        &self,
        record: &LedgerRecord,
        transition: Transition,
    ) -> Result<Option<LedgerRecord>> {
        let mut next = record.transition(transition, self.clock.now())?;
        if !self.ledger.update(&next).await? {
            warn!(
                event_id = record.event_id(),
                expected_version = record.version(),
                to = %next.status(),
                "ledger record changed concurrently, write dropped"
            );
            return Ok(None);
        }
        next.bump_version();
        Ok(Some(next))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
