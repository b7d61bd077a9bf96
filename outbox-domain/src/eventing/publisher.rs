//! 事件发布器（Publisher）
//!
//! 先在台账中登记 `PUBLISH` 记录，再交给传输层发送，最后按结果更新状态。
//! 发布失败只记录在台账中，不向调用方抛出：此时业务事务已经提交。
//!
use super::EventTransport;
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::event::Event;
use crate::ledger::{
    CreateOutcome, LedgerAction, LedgerRecord, LedgerRepository, LedgerStatus, Transition,
    truncate_message,
};
use crate::serializer::{EventSerializer, JsonEventSerializer};
use bon::Builder;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 单次发布的结果，仅用于观测
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 已发送并记为 `Success`
    Delivered,
    /// 发送失败，记录为 `Retrying`
    Deferred { reason: String },
    /// 该事件已成功发布过，本次未发送
    Duplicate,
    /// 台账不可用，仅尝试了发送
    Unrecorded { delivered: bool },
}

#[derive(Builder)]
pub struct Publisher {
    ledger: Arc<dyn LedgerRepository>,
    transport: Arc<dyn EventTransport>,
    #[builder(default = Arc::new(JsonEventSerializer) as Arc<dyn EventSerializer>)]
    serializer: Arc<dyn EventSerializer>,
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
    #[builder(default)]
    config: RelayConfig,
}

impl Publisher {
    pub async fn publish(&self, event: &Event) -> PublishOutcome {
        let record = match self.ledger.create(self.new_record(event)).await {
            Ok(CreateOutcome::Created(record)) => Some(record),
            Ok(CreateOutcome::Existing(record)) if record.status() == LedgerStatus::Success => {
                debug!(event_id = event.id(), "event already published, skipping");
                return PublishOutcome::Duplicate;
            }
            Ok(CreateOutcome::Existing(record)) => Some(record),
            Err(e) => {
                error!(
                    event_id = event.id(),
                    event_type = event.event_type(),
                    error = %e,
                    "failed to record outbound event"
                );
                None
            }
        };

        let sent = self.transport.send(event).await;

        let Some(record) = record else {
            return PublishOutcome::Unrecorded {
                delivered: sent.is_ok(),
            };
        };

        let (transition, outcome) = match sent {
            Ok(()) => (Transition::Succeeded, PublishOutcome::Delivered),
            Err(e) => {
                let reason = truncate_message(&e.to_string());
                warn!(
                    event_id = event.id(),
                    event_type = event.event_type(),
                    error = %e,
                    "event delivery failed"
                );
                (
                    Transition::DeliveryDeferred {
                        message: reason.clone(),
                    },
                    PublishOutcome::Deferred { reason },
                )
            }
        };

        self.write(&record, transition).await;
        outcome
    }

    fn new_record(&self, event: &Event) -> LedgerRecord {
        let now = self.clock.now();
        let payload = match self.serializer.serialize(event.payload()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(event_id = event.id(), error = %e, "payload not serializable, storing none");
                None
            }
        };

        LedgerRecord::builder()
            .event_id(event.id())
            .action(LedgerAction::Publish)
            .owner_group(self.config.owner_group.as_str())
            .owner_name(self.config.owner_name.as_str())
            .event_type(event.event_type())
            .status(LedgerStatus::Created)
            .maybe_payload(payload)
            .max_retry_times(
                event
                    .max_retry_override()
                    .unwrap_or(self.config.default_max_retries),
            )
            .create_time(now)
            .update_time(now)
            .build()
    }

    async fn write(&self, record: &LedgerRecord, transition: Transition) {
        let next = match record.transition(transition, self.clock.now()) {
            Ok(next) => next,
            Err(e) => {
                warn!(event_id = record.event_id(), error = %e, "publish record not updated");
                return;
            }
        };

        match self.ledger.update(&next).await {
            Ok(true) => {}
            Ok(false) => warn!(
                event_id = record.event_id(),
                version = record.version(),
                "publish record changed concurrently, update dropped"
            ),
            Err(e) => error!(
                event_id = record.event_id(),
                error = %e,
                "failed to update publish record"
            ),
        }
    }
}
