/// 事件管道（内存版）示例
/// 展示 Publisher -> Transport -> Dispatcher -> RetryScheduler -> FailureHandler 的闭环，
/// 以及处理失败后的退避重试与重试耗尽后的升级
use anyhow::Result as AnyResult;
use outbox_domain::clock::{Clock, SystemClock};
use outbox_domain::config::RelayConfig;
use outbox_domain::event::Event;
use outbox_domain::eventing::{
    Dispatcher, EventEngine, EventEngineConfig, EventHandler, FailureHandler, HandledEventType,
    InMemoryTransport, Notifier, NotifyingFailureHandler, Publisher, RetryScheduler,
};
use outbox_domain::ledger::InMemoryLedger;
use outbox_domain::retry::build_retry_policy;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

// ============================================================================
// 示例处理器（EventHandler）
// ============================================================================

#[derive(Default)]
struct PrintHandler {
    attempts: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl EventHandler for PrintHandler {
    fn handler_name(&self) -> &str {
        "printer"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::All
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let attempt = {
            let mut g = self.attempts.lock().unwrap();
            g.push(event.id().to_string());
            g.iter().filter(|id| *id == event.id()).count()
        };

        // UserDeleted 始终失败；UserCreated 首次失败
        match event.event_type() {
            "UserDeleted" => anyhow::bail!("directory service rejected {}", event.id()),
            "UserCreated" if attempt == 1 => anyhow::bail!("cache not warmed"),
            _ => {}
        }
        println!(
            "handler=printer type={} id={} attempt={} payload={}",
            event.event_type(),
            event.id(),
            attempt,
            event.payload()
        );
        Ok(())
    }
}

// ============================================================================
// 示例通知通道（Notifier）
// ============================================================================

struct StdoutNotifier;

#[async_trait::async_trait]
impl Notifier for StdoutNotifier {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        println!("\n📣 {subject}\n{body}\n");
        Ok(())
    }
}

fn mk_event(id: &str, ty: &str) -> Event {
    Event::builder()
        .id(id)
        .event_type(ty)
        .payload(serde_json::json!({"id": id, "value": 42}))
        .build()
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    println!("=== 事件管道（内存版）示例 ===\n");

    let mut config = RelayConfig::default();
    config.default_max_retries = 2;
    config.retry.base_delay = Duration::from_millis(100);
    config.retry.max_delay = Duration::from_millis(400);
    config.scheduler.poll_interval = Duration::from_millis(50);
    config.validate()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = Arc::new(InMemoryLedger::new());
    let transport = Arc::new(InMemoryTransport::new(1024));

    let escalation: Arc<dyn FailureHandler> = Arc::new(NotifyingFailureHandler::new(
        "stdout",
        HandledEventType::All,
        Arc::new(StdoutNotifier),
    ));
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .ledger(ledger.clone())
            .event_handlers(vec![Arc::new(PrintHandler::default()) as Arc<dyn EventHandler>])
            .retry_policy(build_retry_policy(&config.retry, clock.clone(), None)?)
            .failure_handlers(vec![escalation])
            .clock(clock.clone())
            .config(config.clone())
            .build(),
    );
    let scheduler = Arc::new(
        RetryScheduler::builder()
            .ledger(ledger.clone())
            .dispatcher(dispatcher.clone())
            .clock(clock.clone())
            .config(config.scheduler.clone())
            .build(),
    );
    let engine = Arc::new(
        EventEngine::builder()
            .subscriber(transport.clone())
            .dispatcher(dispatcher)
            .scheduler(scheduler)
            .config(EventEngineConfig::from(&config))
            .build(),
    );
    let publisher = Publisher::builder()
        .ledger(ledger.clone())
        .transport(transport)
        .clock(clock)
        .config(config)
        .build();

    let handle = engine.start();
    println!("✅ 引擎已启动");
    tokio::time::sleep(Duration::from_millis(100)).await;

    for (id, ty) in [("e1", "UserCreated"), ("e2", "UserRenamed"), ("e3", "UserDeleted")] {
        let outcome = publisher.publish(&mk_event(id, ty)).await;
        println!("✅ 发布 {id}({ty}): {outcome:?}");
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.shutdown();
    handle.join().await;

    println!("\n=== 台账 ===");
    for r in ledger.records() {
        println!(
            "{:<7} {:<3} {:<11} {:<8} retries={}/{} v{} {}",
            r.action(),
            r.event_id(),
            r.event_type(),
            r.status(),
            r.retry_times(),
            r.max_retry_times(),
            r.version(),
            r.message().unwrap_or_default()
        );
    }
    println!("\n✅ 优雅关闭完成");
    Ok(())
}
