use crate::error::{AppError, AppResult};
use outbox_domain::event::Event;
use outbox_domain::eventing::{PublishOutcome, Publisher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// 单元工作（Unit of Work）
///
/// 暂存一次业务操作中产生的事件：
/// - `commit`：按记录顺序逐个交给 `Publisher`，并清空暂存；
/// - `rollback` 或直接丢弃：清空暂存，不发布任何事件。
///
/// 两者都只能生效一次；完成后再 `record` 会返回 `AppError::UnitOfWorkCompleted`。
///
/// 被标记为仅回滚（rollback-only）后，`commit` 丢弃全部事件并返回
/// `AppError::RollbackOnly`。
pub struct UnitOfWork {
    publisher: Arc<Publisher>,
    events: Mutex<Vec<Event>>,
    completed: AtomicBool,
    rollback_only: AtomicBool,
}

impl UnitOfWork {
    pub(crate) fn new(publisher: Arc<Publisher>) -> Self {
        Self {
            publisher,
            events: Mutex::new(Vec::new()),
            completed: AtomicBool::new(false),
            rollback_only: AtomicBool::new(false),
        }
    }

    pub fn record(&self, event: Event) -> AppResult<()> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        // 持锁检查：列表被 commit 取走后不再接收事件
        if self.is_completed() {
            return Err(AppError::UnitOfWorkCompleted);
        }
        events.push(event);
        Ok(())
    }

    /// 尚未发布的事件数
    pub fn pending(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// 此后的 `commit` 只会丢弃事件
    pub fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::Release);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::Acquire)
    }

    pub async fn commit(&self) -> AppResult<Vec<PublishOutcome>> {
        let events = self.complete()?;
        if self.is_rollback_only() {
            debug!(events = events.len(), "unit of work is rollback-only, discarding");
            return Err(AppError::RollbackOnly {
                discarded: events.len(),
            });
        }
        debug!(events = events.len(), "unit of work committed, publishing");

        let mut outcomes = Vec::with_capacity(events.len());
        for event in &events {
            outcomes.push(self.publisher.publish(event).await);
        }
        Ok(outcomes)
    }

    /// 返回被丢弃的事件数
    pub fn rollback(&self) -> AppResult<usize> {
        let events = self.complete()?;
        debug!(events = events.len(), "unit of work rolled back");
        Ok(events.len())
    }

    fn complete(&self) -> AppResult<Vec<Event>> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if self.completed.swap(true, Ordering::AcqRel) {
            return Err(AppError::UnitOfWorkCompleted);
        }
        Ok(std::mem::take(&mut *events))
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.is_completed() {
            return;
        }
        let pending = self.pending();
        if pending > 0 {
            warn!(events = pending, "unit of work abandoned, discarding events");
        }
    }
}
