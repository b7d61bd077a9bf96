//! 事件收集器（EventCollector）
//!
//! 业务代码通过 `record` 上报事件，收集器决定何时真正发布：
//! - 处于 `transactional` 作用域内：暂存到当前单元工作，作用域成功结束后统一发布，
//!   失败或被取消（future 被丢弃）则全部丢弃；
//! - 不在任何作用域内（脚本、测试等）：立即发布。
//!
//! 当前单元工作经 tokio task-local 传递，仅对同一任务内的调用可见；
//! 在作用域内 `tokio::spawn` 出的任务不继承它，其中记录的事件会被立即发布。
//!
use crate::error::{AppError, AppResult};
use crate::unit_of_work::UnitOfWork;
use outbox_domain::event::Event;
use outbox_domain::eventing::{PublishOutcome, Publisher};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

tokio::task_local! {
    static CURRENT: Arc<UnitOfWork>;
}

/// `record` 的去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// 已暂存到当前单元工作
    Buffered,
    /// 无活跃单元工作，已立即发布
    Published(PublishOutcome),
}

#[derive(Clone)]
pub struct EventCollector {
    publisher: Arc<Publisher>,
}

impl EventCollector {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self { publisher }
    }

    /// 当前任务所处的单元工作（若有）
    pub fn current() -> Option<Arc<UnitOfWork>> {
        CURRENT.try_with(Arc::clone).ok()
    }

    /// 开启一个显式管理的单元工作，由调用方负责 `commit`/`rollback`
    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::new(self.publisher.clone())
    }

    pub async fn record(&self, event: Event) -> AppResult<Recorded> {
        match Self::current() {
            Some(uow) => {
                uow.record(event)?;
                Ok(Recorded::Buffered)
            }
            None => {
                debug!(
                    event_id = event.id(),
                    event_type = event.event_type(),
                    "no active unit of work, publishing immediately"
                );
                Ok(Recorded::Published(self.publisher.publish(&event).await))
            }
        }
    }

    /// 在单元工作中执行 `f`：`Ok` 时发布期间记录的全部事件，`Err` 时丢弃。
    ///
    /// 可重入：已处于作用域内时直接并入最外层单元工作，只有最外层负责提交或回滚；
    /// 内层返回 `Err` 会把最外层标记为仅回滚，即使外层随后成功也不发布任何事件。
    pub async fn transactional<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(outer) = Self::current() {
            let result = f().await;
            if result.is_err() {
                // 内层失败使整个单元工作只能回滚
                outer.set_rollback_only();
                debug!(
                    pending = outer.pending(),
                    "nested scope failed, unit of work marked rollback-only"
                );
            }
            return result;
        }

        let uow = Arc::new(self.begin());
        let result = CURRENT.scope(uow.clone(), async move { f().await }).await;

        let completion = match &result {
            Ok(_) => uow.commit().await.map(|outcomes| outcomes.len()),
            Err(_) => uow.rollback(),
        };
        match completion {
            Ok(_) => {}
            Err(AppError::RollbackOnly { discarded }) => {
                warn!(discarded, "scope succeeded but a nested scope failed, events discarded");
            }
            // 作用域内已被显式完成
            Err(e) => warn!(error = %e, "unit of work not completed by scope"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use outbox_domain::error::DomainResult;
    use outbox_domain::eventing::EventTransport;
    use outbox_domain::ledger::InMemoryLedger;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct SpyTransport {
        sent: Mutex<Vec<String>>,
    }

    impl SpyTransport {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventTransport for SpyTransport {
        async fn send(&self, event: &Event) -> DomainResult<()> {
            self.sent.lock().unwrap().push(event.id().to_string());
            Ok(())
        }
    }

    fn collector() -> (EventCollector, Arc<SpyTransport>) {
        let transport = Arc::new(SpyTransport::default());
        let publisher = Publisher::builder()
            .ledger(Arc::new(InMemoryLedger::new()))
            .transport(transport.clone())
            .build();
        (EventCollector::new(Arc::new(publisher)), transport)
    }

    fn ev(id: &str) -> Event {
        Event::builder()
            .id(id)
            .event_type("order.paid")
            .payload(serde_json::json!({}))
            .build()
    }

    #[tokio::test]
    async fn publishes_immediately_without_scope() {
        let (collector, transport) = collector();
        let recorded = collector.record(ev("e-1")).await.unwrap();
        assert_eq!(recorded, Recorded::Published(PublishOutcome::Delivered));
        assert_eq!(transport.sent(), vec!["e-1"]);
    }

    #[tokio::test]
    async fn commit_publishes_in_order_after_scope() {
        let (collector, transport) = collector();

        let out: Result<u32, String> = collector
            .transactional(|| async {
                assert_eq!(collector.record(ev("e-1")).await.unwrap(), Recorded::Buffered);
                assert_eq!(collector.record(ev("e-2")).await.unwrap(), Recorded::Buffered);
                // 作用域结束前不发布
                assert!(transport.sent().is_empty());
                Ok(7)
            })
            .await;

        assert_eq!(out, Ok(7));
        assert_eq!(transport.sent(), vec!["e-1", "e-2"]);
        assert!(EventCollector::current().is_none());
    }

    #[tokio::test]
    async fn error_discards_buffered_events() {
        let (collector, transport) = collector();

        let out: Result<(), String> = collector
            .transactional(|| async {
                collector.record(ev("e-1")).await.unwrap();
                Err("insufficient stock".to_string())
            })
            .await;

        assert_eq!(out, Err("insufficient stock".to_string()));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn nested_scopes_flush_once_at_the_outermost() {
        let (collector, transport) = collector();

        let out: Result<(), String> = collector
            .transactional(|| async {
                collector.record(ev("outer")).await.unwrap();
                let inner: Result<(), String> = collector
                    .transactional(|| async {
                        collector.record(ev("inner")).await.unwrap();
                        Ok(())
                    })
                    .await;
                assert!(inner.is_ok());
                // 内层结束不触发发布
                assert!(transport.sent().is_empty());
                assert_eq!(EventCollector::current().unwrap().pending(), 2);
                Ok(())
            })
            .await;

        assert!(out.is_ok());
        assert_eq!(transport.sent(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn outer_failure_discards_inner_events() {
        let (collector, transport) = collector();

        let out: Result<(), String> = collector
            .transactional(|| async {
                let _: Result<(), String> = collector
                    .transactional(|| async {
                        collector.record(ev("inner")).await.unwrap();
                        Ok(())
                    })
                    .await;
                Err("payment declined".to_string())
            })
            .await;

        assert!(out.is_err());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn inner_failure_discards_everything_even_if_outer_recovers() {
        let (collector, transport) = collector();

        let out: Result<&str, String> = collector
            .transactional(|| async {
                collector.record(ev("outer")).await.unwrap();
                let inner: Result<(), String> = collector
                    .transactional(|| async {
                        collector.record(ev("inner-failed")).await.unwrap();
                        Err("reservation expired".to_string())
                    })
                    .await;
                assert!(inner.is_err());
                assert!(EventCollector::current().unwrap().is_rollback_only());
                // 外层吞掉内层错误并继续
                Ok("recovered")
            })
            .await;

        assert_eq!(out, Ok("recovered"));
        assert!(transport.sent().is_empty());

        // 下一个作用域不受影响
        let next: Result<(), String> = collector
            .transactional(|| async {
                collector.record(ev("next")).await.unwrap();
                Ok(())
            })
            .await;
        assert!(next.is_ok());
        assert_eq!(transport.sent(), vec!["next"]);
    }

    #[tokio::test]
    async fn abandoned_scope_publishes_nothing() {
        let (collector, transport) = collector();

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            collector.transactional(|| async {
                collector.record(ev("e-1")).await.unwrap();
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            }),
        )
        .await;

        assert!(timed_out.is_err());
        assert!(transport.sent().is_empty());
        assert!(EventCollector::current().is_none());
    }

    #[tokio::test]
    async fn explicit_completion_inside_scope_is_respected() {
        let (collector, transport) = collector();

        let out: Result<(), String> = collector
            .transactional(|| async {
                collector.record(ev("e-1")).await.unwrap();
                let uow = EventCollector::current().unwrap();
                assert_eq!(uow.rollback().unwrap(), 1);
                assert!(matches!(
                    collector.record(ev("e-2")).await,
                    Err(AppError::UnitOfWorkCompleted)
                ));
                Ok(())
            })
            .await;

        assert!(out.is_ok());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn explicit_unit_of_work() {
        let (collector, transport) = collector();

        let uow = collector.begin();
        uow.record(ev("e-1")).unwrap();
        uow.record(ev("e-2")).unwrap();
        let outcomes = uow.commit().await.unwrap();

        assert_eq!(outcomes, vec![PublishOutcome::Delivered; 2]);
        assert_eq!(transport.sent(), vec!["e-1", "e-2"]);
    }
}
