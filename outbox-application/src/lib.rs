//! 应用层事件收集（outbox-application）
//!
//! 把领域事件与业务操作的成败绑定：操作成功才发布，失败或放弃则丢弃。
//!
pub mod collector;
pub mod error;
pub mod unit_of_work;

pub use collector::{EventCollector, Recorded};
pub use error::{AppError, AppResult};
pub use unit_of_work::UnitOfWork;
