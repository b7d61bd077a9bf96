use anyhow::Result as AnyResult;
use async_trait::async_trait;
use outbox_domain::clock::SystemClock;
use outbox_domain::config::RelayConfig;
use outbox_domain::event::Event;
use outbox_domain::eventing::{
    Dispatcher, EventEngine, EventEngineConfig, EventHandler, FailureHandler, HandledEventType,
    InMemoryTransport, Notifier, NotifyingFailureHandler, PublishOutcome, Publisher,
    RetryScheduler,
};
use outbox_domain::ledger::{
    InMemoryLedger, LedgerAction, LedgerKey, LedgerRepository, LedgerStatus,
};
use outbox_domain::retry::ExponentialBackoffPolicy;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// `order.paid` 首次失败；`order.poisoned` 始终失败；其余直接成功
#[derive(Default)]
struct FlakyHandler {
    seen: Mutex<HashSet<String>>,
    succeeded: AtomicUsize,
}

#[async_trait]
impl EventHandler for FlakyHandler {
    fn handler_name(&self) -> &str {
        "flaky"
    }
    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::Many(vec![
            "order.paid".into(),
            "order.shipped".into(),
            "order.poisoned".into(),
        ])
    }
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        match event.event_type() {
            "order.poisoned" => anyhow::bail!("payload rejected by downstream"),
            "order.paid" => {
                let first = self.seen.lock().unwrap().insert(event.id().to_string());
                if first {
                    anyhow::bail!("first time fails");
                }
            }
            _ => {}
        }
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for Inbox {
    async fn notify(&self, subject: &str, _body: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(subject.to_string());
        Ok(())
    }
}

fn event(ty: &str) -> Event {
    Event::builder()
        .id(ulid::Ulid::new().to_string())
        .event_type(ty)
        .payload(serde_json::json!({ "type": ty }))
        .build()
}

#[tokio::test(flavor = "multi_thread")]
async fn publish_dispatch_retry_and_escalate() -> AnyResult<()> {
    let config = RelayConfig {
        owner_group: "order-service".into(),
        default_max_retries: 2,
        ..Default::default()
    };

    // 发布端与消费端共用一张内存台账，按 action 区分
    let ledger = Arc::new(InMemoryLedger::new());
    let transport = Arc::new(InMemoryTransport::new(256));
    let handler = Arc::new(FlakyHandler::default());
    let inbox = Arc::new(Inbox::default());
    let escalation: Arc<dyn FailureHandler> = Arc::new(NotifyingFailureHandler::new(
        "ops",
        HandledEventType::All,
        inbox.clone(),
    ));

    let publisher = Publisher::builder()
        .ledger(ledger.clone())
        .transport(transport.clone())
        .config(config.clone())
        .build();
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .ledger(ledger.clone())
            .event_handlers(vec![handler.clone() as Arc<dyn EventHandler>])
            .retry_policy(Arc::new(ExponentialBackoffPolicy::new(
                Duration::from_millis(10),
                2.0,
                Duration::from_millis(40),
                Arc::new(SystemClock),
            )))
            .failure_handlers(vec![escalation])
            .config(config.clone())
            .build(),
    );
    let scheduler = Arc::new(
        RetryScheduler::builder()
            .ledger(ledger.clone())
            .dispatcher(dispatcher.clone())
            .build(),
    );
    let engine = Arc::new(
        EventEngine::builder()
            .subscriber(transport.clone())
            .dispatcher(dispatcher)
            .scheduler(scheduler)
            .config(EventEngineConfig {
                retry_interval: Duration::from_millis(20),
                handler_concurrency: 4,
                retry_enabled: true,
            })
            .build(),
    );

    let handle = engine.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let paid = event("order.paid");
    let shipped = event("order.shipped");
    let poisoned = event("order.poisoned");
    for ev in [&paid, &shipped, &poisoned] {
        assert_eq!(publisher.publish(ev).await, PublishOutcome::Delivered);
    }

    // 使用 timeout + 轮询条件，减少固定 sleep 带来的不确定性
    let _ = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if handler.succeeded.load(Ordering::SeqCst) >= 2
                && !inbox.messages.lock().unwrap().is_empty()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    handle.shutdown();
    handle.join().await;

    let consume = |ev: &Event| LedgerKey::active(ev.id(), LedgerAction::Consume, "order-service");
    let publish = |ev: &Event| LedgerKey::active(ev.id(), LedgerAction::Publish, "order-service");

    for ev in [&paid, &shipped, &poisoned] {
        let row = ledger.find(&publish(ev)).await?.expect("publish row");
        assert_eq!(row.status(), LedgerStatus::Success);
    }

    let paid_row = ledger.find(&consume(&paid)).await?.expect("paid row");
    assert_eq!(paid_row.status(), LedgerStatus::Success);
    assert_eq!(paid_row.retry_times(), 1);

    let shipped_row = ledger.find(&consume(&shipped)).await?.expect("shipped row");
    assert_eq!(shipped_row.status(), LedgerStatus::Success);
    assert_eq!(shipped_row.retry_times(), 0);

    let poisoned_row = ledger.find(&consume(&poisoned)).await?.expect("poisoned row");
    assert_eq!(poisoned_row.status(), LedgerStatus::Failed);
    assert_eq!(poisoned_row.retry_times(), 2);
    assert!(
        poisoned_row
            .message()
            .unwrap_or_default()
            .starts_with("max retries exceeded: ")
    );

    let messages = inbox.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains(poisoned.id()));
    Ok(())
}

#[tokio::test]
async fn publish_without_subscriber_is_recorded_for_later() -> AnyResult<()> {
    let ledger = Arc::new(InMemoryLedger::new());
    let publisher = Publisher::builder()
        .ledger(ledger.clone())
        .transport(Arc::new(InMemoryTransport::new(8)))
        .build();

    let ev = event("order.paid");
    let outcome = publisher.publish(&ev).await;
    assert!(matches!(outcome, PublishOutcome::Deferred { .. }));

    let key = LedgerKey::active(ev.id(), LedgerAction::Publish, "default");
    let row = ledger.find(&key).await?.expect("publish row");
    assert_eq!(row.status(), LedgerStatus::Retrying);
    assert!(row.payload().is_some());
    Ok(())
}
