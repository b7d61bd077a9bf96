use outbox_application::{AppError, EventCollector, Recorded};
use outbox_domain::event::Event;
use outbox_domain::eventing::{InMemoryTransport, Publisher};
use outbox_domain::ledger::InMemoryLedger;
use std::sync::Arc;

fn order_event(event_type: &str, order_id: u32) -> Event {
    Event::new(event_type, serde_json::json!({ "order_id": order_id }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = Arc::new(InMemoryLedger::new());
    // 无订阅者时发布记为待重试，本示例只关注台账中出现了哪些事件
    let publisher = Publisher::builder()
        .ledger(ledger.clone())
        .transport(Arc::new(InMemoryTransport::new(16)))
        .build();
    let collector = EventCollector::new(Arc::new(publisher));

    // 作用域成功：两条事件在结束时一起发布
    let placed: Result<u32, AppError> = collector
        .transactional(|| async {
            collector.record(order_event("order.placed", 1)).await?;
            collector.record(order_event("order.reserved", 1)).await?;
            Ok(1)
        })
        .await;
    println!("placed order {:?}, ledger rows={}", placed, ledger.len());

    // 作用域失败：记录的事件被丢弃
    let rejected: Result<(), String> = collector
        .transactional(|| async {
            collector
                .record(order_event("order.placed", 2))
                .await
                .map_err(|e| e.to_string())?;
            Err("out of stock".to_string())
        })
        .await;
    println!("rejected order {:?}, ledger rows={}", rejected, ledger.len());

    // 作用域外：立即发布
    let recorded = collector.record(order_event("order.audited", 1)).await?;
    println!("outside scope: {:?}, ledger rows={}", recorded, ledger.len());
    assert!(matches!(recorded, Recorded::Published(_)));

    // 显式单元工作
    let uow = collector.begin();
    uow.record(order_event("order.cancelled", 3))?;
    let discarded = uow.rollback()?;
    println!("explicit rollback discarded {discarded} event(s)");

    for r in ledger.records() {
        println!("{} {} {} {}", r.action(), r.event_type(), r.event_id(), r.status());
    }
    Ok(())
}
