//! 事件处理器（EventHandler）与注册表（HandlerRegistry）
//!
//! 处理器声明自己订阅的类型标签，注册表按标签路由：
//! 先在该类型的处理器中按注册顺序查找，再回退到订阅全部类型的处理器，
//! 取第一个 `accepts` 通过的处理器。
//!
//! 至少一次投递意味着同一事件可能被处理多次，处理器必须幂等。
//!
use crate::event::Event;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

impl HandledEventType {
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            HandledEventType::One(t) => t == event_type,
            HandledEventType::Many(ts) => ts.iter().any(|t| t == event_type),
            HandledEventType::All => true,
        }
    }
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于日志与审计）
    fn handler_name(&self) -> &str;
    /// 返回该处理器支持的事件类型
    fn handled_event_type(&self) -> HandledEventType;
    /// 基于载荷的进一步筛选，默认全部接受
    fn accepts(&self, _event: &Event) -> bool {
        true
    }
    /// 处理事件
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    by_type: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    all: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let mut by_type: HashMap<String, Vec<Arc<dyn EventHandler>>> = HashMap::new();
        let mut all: Vec<Arc<dyn EventHandler>> = Vec::new();

        for h in handlers {
            match h.handled_event_type() {
                HandledEventType::All => all.push(h),
                HandledEventType::One(t) => {
                    by_type.entry(t).or_default().push(h);
                }
                HandledEventType::Many(ts) => {
                    for t in ts {
                        by_type.entry(t).or_default().push(h.clone());
                    }
                }
            }
        }

        Self { by_type, all }
    }

    /// 选出处理该事件的唯一处理器
    pub fn select(&self, event: &Event) -> Option<Arc<dyn EventHandler>> {
        self.by_type
            .get(event.event_type())
            .into_iter()
            .flatten()
            .chain(self.all.iter())
            .find(|h| h.accepts(event))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.all.is_empty()
    }
}
