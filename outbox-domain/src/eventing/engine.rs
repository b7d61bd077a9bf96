//! 事件引擎（EventEngine）
//!
//! 统一编排消费端的长驻任务：
//! - 订阅传输层事件流，以 `is_retry = false` 交给分发器，并发处理；
//! - 周期执行重试扫描，把到期记录交回分发器；
//! - 提供关闭与等待的 `EngineHandle`。
//!
use super::dispatcher::Dispatcher;
use super::scheduler::RetryScheduler;
use super::EventSubscriber;
use crate::config::RelayConfig;
use bon::Builder;
use futures_util::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Builder)]
pub struct EventEngine {
    subscriber: Arc<dyn EventSubscriber>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<RetryScheduler>,
    #[builder(default)]
    config: EventEngineConfig,
}

impl EventEngine {
    /// 启动事件引擎，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(2);

        // retry worker（周期任务）
        if self.config.retry_enabled {
            let scheduler = self.scheduler.clone();
            tasks.push(Self::spawn_periodic(
                token.clone(),
                self.config.retry_interval,
                move || {
                    let scheduler = scheduler.clone();
                    async move {
                        if let Err(e) = scheduler.run_once().await {
                            error!(error = %e, "retry scan failed");
                        }
                    }
                },
            ));
        }

        // subscribe worker（长循环）
        tasks.push(tokio::spawn(Self::subscribe_loop(
            self.clone(),
            token.clone(),
        )));

        info!(
            retry_enabled = self.config.retry_enabled,
            retry_interval = ?self.config.retry_interval,
            handler_concurrency = self.config.handler_concurrency,
            "event engine started"
        );
        EngineHandle { token, tasks }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    async fn subscribe_loop(self: Arc<Self>, token: CancellationToken) {
        let stream = self.subscriber.subscribe().await;
        let dispatcher = self.dispatcher.clone();
        let concurrency = self.config.handler_concurrency.max(1);

        stream
            .take_until(async move { token.cancelled().await })
            .for_each_concurrent(Some(concurrency), move |item| {
                let dispatcher = dispatcher.clone();
                async move {
                    let event = match item {
                        Ok(event) => event,
                        Err(e) => {
                            // 如广播滞后丢失消息：由发布端台账兜底，继续处理后续事件
                            warn!(error = %e, "event stream error");
                            return;
                        }
                    };
                    match dispatcher.dispatch(&event, false).await {
                        Ok(outcome) => debug!(event_id = event.id(), ?outcome, "event dispatched"),
                        Err(e) => error!(
                            event_id = event.id(),
                            event_type = event.event_type(),
                            error = %e,
                            "dispatch failed"
                        ),
                    }
                }
            })
            .await;

        debug!("subscribe loop stopped");
    }
}

/// 事件引擎配置
#[derive(Clone, Copy, Debug)]
pub struct EventEngineConfig {
    /// 重试扫描的间隔
    pub retry_interval: Duration,
    /// 订阅流上同时分发的事件数
    pub handler_concurrency: usize,
    /// 是否启动重试扫描
    pub retry_enabled: bool,
}

impl Default for EventEngineConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(30),
            handler_concurrency: 8,
            retry_enabled: true,
        }
    }
}

impl From<&RelayConfig> for EventEngineConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            retry_interval: config.scheduler.poll_interval,
            handler_concurrency: config.handler_concurrency,
            retry_enabled: config.scheduler.enabled,
        }
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
