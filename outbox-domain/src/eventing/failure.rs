//! 失败升级链（FailureHandlerChain）
//!
//! 重试耗尽、记录已落为 `Failed` 之后，由分发器调用链上第一个支持该事件类型的
//! 处理器。升级过程中的任何错误（含 panic）只记录日志，不会影响已落盘的 `Failed`。
//!
use super::handler::HandledEventType;
use crate::event::Event;
use crate::ledger::LedgerRecord;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

#[async_trait]
pub trait FailureHandler: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, event_type: &str) -> bool;

    /// `record` 为已落盘的 `Failed` 记录的只读视图
    async fn handle_failure(
        &self,
        event: &Event,
        record: &LedgerRecord,
        error: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct FailureHandlerChain {
    handlers: Vec<Arc<dyn FailureHandler>>,
}

impl FailureHandlerChain {
    pub fn new(handlers: Vec<Arc<dyn FailureHandler>>) -> Self {
        Self { handlers }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 调用第一个支持该类型的处理器，返回是否有处理器被调用
    pub async fn escalate(&self, event: &Event, record: &LedgerRecord, error: &str) -> bool {
        let Some(handler) = self
            .handlers
            .iter()
            .find(|h| h.supports(event.event_type()))
        else {
            debug!(
                event_id = event.id(),
                event_type = event.event_type(),
                "no failure handler supports event type"
            );
            return false;
        };

        let outcome = AssertUnwindSafe(handler.handle_failure(event, record, error))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {
                info!(
                    event_id = event.id(),
                    failure_handler = handler.name(),
                    "failure escalated"
                );
            }
            Ok(Err(e)) => {
                error!(
                    event_id = event.id(),
                    failure_handler = handler.name(),
                    error = %e,
                    "failure handler returned an error"
                );
            }
            Err(_) => {
                error!(
                    event_id = event.id(),
                    failure_handler = handler.name(),
                    "failure handler panicked"
                );
            }
        }
        true
    }
}

/// 通知通道（如邮件、IM 机器人）
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// 参考实现：由事件与台账视图组装通知并发送
pub struct NotifyingFailureHandler {
    name: String,
    types: HandledEventType,
    notifier: Arc<dyn Notifier>,
}

impl NotifyingFailureHandler {
    pub fn new(
        name: impl Into<String>,
        types: HandledEventType,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            name: name.into(),
            types,
            notifier,
        }
    }

    fn compose(event: &Event, record: &LedgerRecord, error: &str) -> (String, String) {
        let subject = format!(
            "[event failed] {} ({})",
            event.event_type(),
            event.id()
        );
        let body = format!(
            "event_id: {}\nevent_type: {}\nowner: {}/{}\nretries: {}/{}\noccurred_on: {}\n\
             failed_at: {}\nmessage: {}\nerror: {}\npayload: {}",
            event.id(),
            event.event_type(),
            record.owner_group(),
            record.owner_name(),
            record.retry_times(),
            record.max_retry_times(),
            event.occurred_on().to_rfc3339(),
            record.update_time().to_rfc3339(),
            record.message().unwrap_or_default(),
            error,
            event.payload(),
        );
        (subject, body)
    }
}

#[async_trait]
impl FailureHandler for NotifyingFailureHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, event_type: &str) -> bool {
        self.types.matches(event_type)
    }

    async fn handle_failure(
        &self,
        event: &Event,
        record: &LedgerRecord,
        error: &str,
    ) -> anyhow::Result<()> {
        let (subject, body) = Self::compose(event, record, error);
        self.notifier.notify(&subject, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerAction, LedgerStatus};
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct SpyNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for SpyNotifier {
        async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct Exploding {
        calls: AtomicUsize,
        panic: bool,
    }

    #[async_trait]
    impl FailureHandler for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }
        fn supports(&self, event_type: &str) -> bool {
            event_type == "order.paid"
        }
        async fn handle_failure(
            &self,
            _event: &Event,
            _record: &LedgerRecord,
            _error: &str,
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("escalation blew up");
            }
            anyhow::bail!("smtp down")
        }
    }

    fn failed_record(event: &Event) -> LedgerRecord {
        let now = Utc::now();
        LedgerRecord::builder()
            .event_id(event.id())
            .action(LedgerAction::Consume)
            .owner_group("billing")
            .owner_name("worker-1")
            .event_type(event.event_type())
            .status(LedgerStatus::Failed)
            .message("max retries exceeded: boom")
            .retry_times(3)
            .max_retry_times(3)
            .create_time(now)
            .update_time(now)
            .build()
    }

    #[tokio::test]
    async fn only_first_supporting_handler_runs() {
        let notifier = Arc::new(SpyNotifier::default());
        let first: Arc<dyn FailureHandler> = Arc::new(NotifyingFailureHandler::new(
            "ops",
            HandledEventType::One("order.paid".into()),
            notifier.clone(),
        ));
        let second: Arc<dyn FailureHandler> = Arc::new(NotifyingFailureHandler::new(
            "catch-all",
            HandledEventType::All,
            notifier.clone(),
        ));
        let chain = FailureHandlerChain::new(vec![first, second]);

        let ev = Event::new("order.paid", serde_json::json!({"order": 42}));
        assert!(chain.escalate(&ev, &failed_record(&ev), "boom").await);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("order.paid"));
        assert!(sent[0].1.contains("retries: 3/3"));
        assert!(sent[0].1.contains("owner: billing/worker-1"));
    }

    #[tokio::test]
    async fn errors_and_panics_are_contained() {
        for panic in [false, true] {
            let handler = Arc::new(Exploding {
                calls: AtomicUsize::new(0),
                panic,
            });
            let chain = FailureHandlerChain::new(vec![handler.clone() as Arc<dyn FailureHandler>]);
            let ev = Event::new("order.paid", serde_json::json!({}));
            assert!(chain.escalate(&ev, &failed_record(&ev), "boom").await);
            assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn unsupported_type_is_not_escalated() {
        let handler: Arc<dyn FailureHandler> = Arc::new(Exploding {
            calls: AtomicUsize::new(0),
            panic: false,
        });
        let chain = FailureHandlerChain::new(vec![handler]);
        let ev = Event::new("order.shipped", serde_json::json!({}));
        assert!(!chain.escalate(&ev, &failed_record(&ev), "boom").await);
    }
}
