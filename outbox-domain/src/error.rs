//! 领域层统一错误定义
//!
//! 聚焦序列化、台账读写、传输、配置与状态流转校验等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
//! 注意：处理器自身的异常不经由该类型向上传播，而是由分发器记录进台账。
//!
use crate::ledger::LedgerStatus;
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },

    // --- 事件系统 ---
    #[error("event transport error: {reason}")]
    Transport { reason: String },

    // --- 台账/持久化 ---
    #[error("ledger error: {reason}")]
    Ledger { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("illegal status transition: {from:?} -> {to:?}")]
    IllegalTransition { from: LedgerStatus, to: LedgerStatus },

    // --- 配置/状态 ---
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl DomainError {
    pub fn transport(reason: impl Into<String>) -> Self {
        DomainError::Transport {
            reason: reason.into(),
        }
    }

    pub fn ledger(reason: impl Into<String>) -> Self {
        DomainError::Ledger {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        DomainError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在基础设施层直接使用 `?` 将 sqlx 等错误转换为 DomainError

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}
