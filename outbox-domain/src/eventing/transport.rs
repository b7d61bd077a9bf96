//! 事件传输协议（EventTransport / EventSubscriber）
//!
//! 发布端只需要 `send`；消费端以 'static 生命周期的事件流接收事件，
//! 以便在异步运行时（如 tokio::spawn）中消费。物理投递机制由实现方决定。
//!
use crate::{error::DomainResult as Result, event::Event};
use async_trait::async_trait;
use futures_core::stream::BoxStream;

/// 发布端传输：负责把事件送出进程
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, event: &Event) -> Result<()>;
}

/// 消费端传输：返回一个 'static 生命周期的事件流
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(&self) -> BoxStream<'static, Result<Event>>;
}
