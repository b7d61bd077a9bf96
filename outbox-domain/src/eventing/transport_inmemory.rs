//! 内存版事件传输（InMemoryTransport）
//!
//! 基于 `tokio::sync::broadcast` 实现的轻量传输，同时满足 `EventTransport`
//! 与 `EventSubscriber` 协议：
//! - `send`：克隆并广播事件；
//! - `subscribe`：返回 `'static` 生命周期事件流；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：若无订阅者，`send` 返回传输错误，发布端据此把记录置为 `Retrying`。

use crate::error::{DomainError, DomainResult as Result};
use crate::event::Event;
use crate::eventing::{EventSubscriber, EventTransport};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone)]
pub struct InMemoryTransport {
    tx: broadcast::Sender<Event>,
}

impl InMemoryTransport {
    /// `capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn send(&self, event: &Event) -> Result<()> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| DomainError::transport("no active subscriber"))
    }
}

#[async_trait]
impl EventSubscriber for InMemoryTransport {
    async fn subscribe(&self) -> BoxStream<'static, Result<Event>> {
        let rx = self.tx.subscribe();
        let stream =
            BroadcastStream::new(rx).map(|r| r.map_err(|e| DomainError::transport(e.to_string())));
        Box::pin(stream)
    }
}
