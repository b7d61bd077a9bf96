//! 台账记录模型（LedgerRecord）
//!
//! 一条记录对应一次“发布”或“消费”尝试，幂等键为
//! `(event_id, action, owner_group, delete_marker)`。
//!
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误信息最多保留的字符数
pub const MESSAGE_LIMIT: usize = 500;
/// 超长错误信息截断后追加的标记
pub const TRUNCATION_MARKER: &str = "...(truncated)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerAction {
    Publish,
    Consume,
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAction::Publish => "PUBLISH",
            LedgerAction::Consume => "CONSUME",
        }
    }
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for LedgerAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLISH" => Ok(LedgerAction::Publish),
            "CONSUME" => Ok(LedgerAction::Consume),
            other => Err(DomainError::Parse {
                reason: format!("unknown ledger action: {other}"),
            }),
        }
    }
}

/// 台账状态：`Created → Retrying* → (Success | Failed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Created,
    Retrying,
    Success,
    Failed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Created => "CREATED",
            LedgerStatus::Retrying => "RETRYING",
            LedgerStatus::Success => "SUCCESS",
            LedgerStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LedgerStatus::Success | LedgerStatus::Failed)
    }

    /// 状态流转是否合法；终态不再接受任何写入
    pub fn can_transition_to(&self, next: LedgerStatus) -> bool {
        use LedgerStatus::*;
        match (self, next) {
            (Created, Retrying | Success | Failed) => true,
            (Retrying, Retrying | Success | Failed) => true,
            (Created, Created) => false,
            (Retrying, Created) => false,
            (Success | Failed, _) => false,
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for LedgerStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(LedgerStatus::Created),
            "RETRYING" => Ok(LedgerStatus::Retrying),
            "SUCCESS" => Ok(LedgerStatus::Success),
            "FAILED" => Ok(LedgerStatus::Failed),
            other => Err(DomainError::Parse {
                reason: format!("unknown ledger status: {other}"),
            }),
        }
    }
}

/// 幂等键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub event_id: String,
    pub action: LedgerAction,
    pub owner_group: String,
    pub delete_marker: i64,
}

impl LedgerKey {
    /// 活跃记录（未逻辑删除）的键
    pub fn active(
        event_id: impl Into<String>,
        action: LedgerAction,
        owner_group: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            action,
            owner_group: owner_group.into(),
            delete_marker: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// 代理主键，由存储层在创建时赋值
    #[builder(default)]
    id: i64,
    #[builder(into)]
    event_id: String,
    action: LedgerAction,
    /// 发布节点 ID 或消费组名
    #[builder(into)]
    owner_group: String,
    /// 实例/工作者 ID
    #[builder(into)]
    owner_name: String,
    #[builder(into)]
    event_type: String,
    status: LedgerStatus,
    /// 序列化后的载荷（发布记录，以及需要重放的消费记录）
    payload: Option<Vec<u8>>,
    /// 最近一次错误信息（已截断）
    #[builder(into)]
    message: Option<String>,
    #[builder(default)]
    retry_times: u32,
    max_retry_times: u32,
    next_retry_time: Option<DateTime<Utc>>,
    /// 乐观锁版本号
    #[builder(default)]
    version: i64,
    /// 0 表示活跃；非 0 表示已逻辑删除
    #[builder(default)]
    delete_marker: i64,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn action(&self) -> LedgerAction {
        self.action
    }

    pub fn owner_group(&self) -> &str {
        &self.owner_group
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn status(&self) -> LedgerStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn retry_times(&self) -> u32 {
        self.retry_times
    }

    pub fn max_retry_times(&self) -> u32 {
        self.max_retry_times
    }

    pub fn next_retry_time(&self) -> Option<DateTime<Utc>> {
        self.next_retry_time
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn delete_marker(&self) -> i64 {
        self.delete_marker
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn update_time(&self) -> DateTime<Utc> {
        self.update_time
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey {
            event_id: self.event_id.clone(),
            action: self.action,
            owner_group: self.owner_group.clone(),
            delete_marker: self.delete_marker,
        }
    }

    /// 是否已到重试时间（仅对 `Retrying` 的消费记录有意义）
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.delete_marker == 0
            && self.action == LedgerAction::Consume
            && self.status == LedgerStatus::Retrying
            && self.next_retry_time.is_some_and(|t| t <= now)
    }

    /// 基于当前记录生成下一状态的副本，`version` 保持为期望值，
    /// 由仓储在条件更新成功后递增。
    pub fn transition(&self, next: Transition, now: DateTime<Utc>) -> DomainResult<LedgerRecord> {
        let to = next.status();
        if !self.status.can_transition_to(to) {
            return Err(DomainError::IllegalTransition {
                from: self.status,
                to,
            });
        }

        let mut updated = self.clone();
        updated.status = to;
        updated.update_time = now;
        match next {
            Transition::Succeeded => {
                updated.message = None;
                updated.next_retry_time = None;
            }
            Transition::Claimed { lease_until } => {
                updated.next_retry_time = Some(lease_until);
            }
            Transition::RetryScheduled {
                retry_times,
                next_retry_time,
                message,
            } => {
                updated.retry_times = retry_times;
                updated.next_retry_time = Some(next_retry_time);
                updated.message = Some(message);
            }
            Transition::DeliveryDeferred { message } => {
                updated.message = Some(message);
            }
            Transition::Failed { message } => {
                updated.next_retry_time = None;
                updated.message = Some(message);
            }
        }
        Ok(updated)
    }

    pub(crate) fn assign_id(&mut self, id: i64) {
        self.id = id;
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.delete_marker = self.id.max(1);
        self.update_time = now;
    }
}

/// 记录状态流转的意图
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// 处理或投递成功
    Succeeded,
    /// 接管一条 `Created` 的消费记录；`lease_until` 之后可被重试扫描接管
    Claimed { lease_until: DateTime<Utc> },
    /// 处理失败且仍可重试
    RetryScheduled {
        retry_times: u32,
        next_retry_time: DateTime<Utc>,
        message: String,
    },
    /// 发布端传输失败，等待外部补偿
    DeliveryDeferred { message: String },
    /// 重试耗尽或无法处理
    Failed { message: String },
}

impl Transition {
    pub fn status(&self) -> LedgerStatus {
        match self {
            Transition::Succeeded => LedgerStatus::Success,
            Transition::Claimed { .. }
            | Transition::RetryScheduled { .. }
            | Transition::DeliveryDeferred { .. } => LedgerStatus::Retrying,
            Transition::Failed { .. } => LedgerStatus::Failed,
        }
    }
}

/// 按字符截断错误信息，超出部分以标记替代
pub fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MESSAGE_LIMIT) {
        None => message.to_string(),
        Some((cut, _)) => format!("{}{}", &message[..cut], TRUNCATION_MARKER),
    }
}
