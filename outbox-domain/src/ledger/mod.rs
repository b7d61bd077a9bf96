//! 事件台账（ledger）
//!
//! 持久化每一次发布/消费尝试的记录，是整个管线唯一的事实来源：
//! - 记录模型与状态机（`LedgerRecord`、`LedgerStatus`、`Transition`）；
//! - 仓储协议（`LedgerRepository`），要求原子创建与基于版本号的条件更新；
//! - 内存实现（`InMemoryLedger`）与可选的 Postgres 实现（`PgLedgerRepository`）。
//!
mod inmemory;
#[cfg(feature = "infra-sqlx")]
mod postgres;
mod record;
mod repository;

pub use inmemory::InMemoryLedger;
#[cfg(feature = "infra-sqlx")]
pub use postgres::PgLedgerRepository;
pub use record::{
    LedgerAction, LedgerKey, LedgerRecord, LedgerStatus, MESSAGE_LIMIT, TRUNCATION_MARKER,
    Transition, truncate_message,
};
pub use repository::{CreateOutcome, LedgerRepository};
