//! 载荷序列化协议（EventSerializer）
//!
//! 台账以字节形式保存载荷，重试调度器借此把记录还原为事件。
//!
use crate::error::{DomainError, DomainResult};
use serde_json::Value;

pub trait EventSerializer: Send + Sync {
    fn serialize(&self, payload: &Value) -> DomainResult<Vec<u8>>;

    /// `event_type` 供按类型做版本/形态适配的实现使用
    fn deserialize(&self, bytes: &[u8], event_type: &str) -> DomainResult<Value>;
}

/// JSON 序列化实现
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, payload: &Value) -> DomainResult<Vec<u8>> {
        Ok(serde_json::to_vec(payload)?)
    }

    fn deserialize(&self, bytes: &[u8], event_type: &str) -> DomainResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| DomainError::Parse {
            reason: format!("payload of {event_type}: {e}"),
        })
    }
}
