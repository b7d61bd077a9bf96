//! 可靠领域事件管道（outbox-domain）
//!
//! 保证单元工作中产生的领域事件至少一次送达正确的处理器，并在常规情况下避免重复的逻辑处理：
//! - 台账（`ledger`）：以 `(event_id, action, owner_group, delete_marker)` 为幂等键，
//!   所有状态写入以版本号为条件；
//! - 重试策略（`retry`）：指数退避或外部调度；
//! - 事件系统（`eventing`）：发布器、分发器、重试调度器、失败升级链与引擎；
//! - 配置（`config`）、时钟（`clock`）与载荷序列化（`serializer`）等协作者。
//!
//! 本 crate 尽量保持与存储与传输实现解耦，仅提供内存版与（可选的）Postgres 台账，
//! 以便在不同基础设施（例如 Postgres、消息中间件等）上进行适配实现。
//!
//! 典型用法：
//! 1. 选择 `LedgerRepository` 实现与 `EventTransport`/`EventSubscriber`；
//! 2. 注册 `EventHandler` 与 `FailureHandler`，构建 `Dispatcher`；
//! 3. 用 `Publisher` 发布事件，用 `EventEngine` 启动订阅与重试扫描。
//!
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
#[cfg(feature = "eventing")]
pub mod eventing;
pub mod ledger;
pub mod retry;
pub mod serializer;
