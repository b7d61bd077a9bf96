use anyhow::Result as AnyResult;
use async_trait::async_trait;
use outbox_application::{AppError, EventCollector, Recorded};
use outbox_domain::clock::SystemClock;
use outbox_domain::event::Event;
use outbox_domain::eventing::{
    Dispatcher, EventEngine, EventEngineConfig, EventHandler, HandledEventType,
    InMemoryTransport, Publisher, RetryScheduler,
};
use outbox_domain::ledger::{InMemoryLedger, LedgerAction, LedgerKey, LedgerRepository, LedgerStatus};
use outbox_domain::retry::ExponentialBackoffPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    handled: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for Recorder {
    fn handler_name(&self) -> &str {
        "recorder"
    }
    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::All
    }
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.handled.lock().unwrap().push(event.id().to_string());
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
async fn only_committed_units_of_work_reach_handlers() -> AnyResult<()> {
    let ledger = Arc::new(InMemoryLedger::new());
    let transport = Arc::new(InMemoryTransport::new(64));
    let recorder = Arc::new(Recorder::default());

    let dispatcher = Arc::new(
        Dispatcher::builder()
            .ledger(ledger.clone())
            .event_handlers(vec![recorder.clone() as Arc<dyn EventHandler>])
            .retry_policy(Arc::new(ExponentialBackoffPolicy::new(
                Duration::from_millis(10),
                2.0,
                Duration::from_millis(40),
                Arc::new(SystemClock),
            )))
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
                handler_concurrency: 2,
                retry_enabled: false,
            })
            .build(),
    );
    let publisher = Publisher::builder()
        .ledger(ledger.clone())
        .transport(transport)
        .build();
    let collector = EventCollector::new(Arc::new(publisher));

    let handle = engine.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let placed = event("order.placed");
    let reserved = event("order.reserved");
    let rejected = event("order.rejected");

    let committed: Result<(), AppError> = collector
        .transactional(|| async {
            assert_eq!(collector.record(placed.clone()).await?, Recorded::Buffered);
            assert_eq!(collector.record(reserved.clone()).await?, Recorded::Buffered);
            Ok(())
        })
        .await;
    assert!(committed.is_ok());

    let rolled_back: Result<(), String> = collector
        .transactional(|| async {
            collector.record(rejected.clone()).await.unwrap();
            Err("credit check failed".to_string())
        })
        .await;
    assert!(rolled_back.is_err());

    let _ = tokio::time::timeout(Duration::from_secs(3), async {
        while recorder.handled.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    handle.shutdown();
    handle.join().await;

    let handled = recorder.handled.lock().unwrap().clone();
    assert_eq!(handled.len(), 2);
    assert!(handled.contains(&placed.id().to_string()));
    assert!(handled.contains(&reserved.id().to_string()));

    for ev in [&placed, &reserved] {
        let key = LedgerKey::active(ev.id(), LedgerAction::Consume, "default");
        let row = ledger.find(&key).await?.expect("consume row");
        assert_eq!(row.status(), LedgerStatus::Success);
    }
    // 回滚的事件从未登记
    let key = LedgerKey::active(rejected.id(), LedgerAction::Publish, "default");
    assert!(ledger.find(&key).await?.is_none());
    Ok(())
}
