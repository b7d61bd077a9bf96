//! 领域事件（Event）
//!
//! 单元工作中产生的瞬时事实：唯一 ID、类型标签、不透明载荷、发生时间，
//! 以及可选的最大重试次数覆盖值。
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct Event {
    /// 全局唯一事件 ID
    #[builder(into, default = Uuid::new_v4().to_string())]
    id: String,
    /// 类型标签，决定载荷形态与处理器路由
    #[builder(into)]
    event_type: String,
    /// 事件载荷
    payload: Value,
    /// 事件发生时间
    #[builder(default = Utc::now())]
    occurred_on: DateTime<Utc>,
    /// 覆盖默认的最大重试次数
    max_retry_override: Option<u32>,
}

impl Event {
    /// 以随机 ID 与当前时间创建事件
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self::builder().event_type(event_type).payload(payload).build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn occurred_on(&self) -> DateTime<Utc> {
        self.occurred_on
    }

    pub fn max_retry_override(&self) -> Option<u32> {
        self.max_retry_override
    }
}
