//! 事件子系统（eventing）
//!
//! 可靠事件管道的运行时部分：
//! - `Publisher`：先登记 `PUBLISH` 台账再经 `EventTransport` 发送；
//! - `Dispatcher`：消费端状态机，负责幂等、处理器调用、状态流转与升级；
//! - `RetryScheduler`：扫描到期重试并交回分发器；
//! - `FailureHandlerChain`：重试耗尽后的升级链；
//! - `EventEngine`：编排订阅与周期重试扫描。
//!
//! 该模块仅定义协议与引擎，不绑定具体传输实现，可对接任意消息系统或内存实现。
//!
pub mod dispatcher;
pub mod engine;
pub mod failure;
pub mod handler;
pub mod publisher;
pub mod scheduler;
pub mod transport;
pub mod transport_inmemory;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::{EngineHandle, EventEngine, EventEngineConfig};
pub use failure::{FailureHandler, FailureHandlerChain, Notifier, NotifyingFailureHandler};
pub use handler::{EventHandler, HandledEventType, HandlerRegistry};
pub use publisher::{PublishOutcome, Publisher};
pub use scheduler::{RetryScheduler, ScanReport};
pub use transport::{EventSubscriber, EventTransport};
pub use transport_inmemory::InMemoryTransport;
