//! 台账仓储协议（LedgerRepository）
//!
//! 所有实现必须保证：
//! - 同一幂等键最多存在一条活跃记录，且创建对并发创建者是原子的；
//! - 状态写入以 `version` 为条件（比较并交换），成功时版本号加一。
//!
use super::record::{LedgerKey, LedgerRecord};
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 原子创建的结果
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// 本次调用创建了记录（已赋值 `id`）
    Created(LedgerRecord),
    /// 同键记录已存在，返回胜出者的记录
    Existing(LedgerRecord),
}

impl CreateOutcome {
    pub fn into_record(self) -> LedgerRecord {
        match self {
            CreateOutcome::Created(r) | CreateOutcome::Existing(r) => r,
        }
    }
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// 按幂等键查询记录
    async fn find(&self, key: &LedgerKey) -> Result<Option<LedgerRecord>>;

    /// 若键不存在则创建，否则返回已存在的记录
    async fn create(&self, record: LedgerRecord) -> Result<CreateOutcome>;

    /// 条件更新：仅当存储中的版本等于 `record.version()` 时写入，
    /// 成功返回 `true`（存储版本加一），版本不符返回 `false`。
    async fn update(&self, record: &LedgerRecord) -> Result<bool>;

    /// 查询到期待重试的消费记录，
    /// 按 `(retry_times asc, create_time asc)` 排序，至多 `limit` 条。
    async fn find_due_retries(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<LedgerRecord>>;

    /// 逻辑删除（同样以版本为条件），腾出幂等键供新记录使用
    async fn tombstone(&self, record: &LedgerRecord, now: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
impl<T> LedgerRepository for Arc<T>
where
    T: LedgerRepository + ?Sized,
{
    async fn find(&self, key: &LedgerKey) -> Result<Option<LedgerRecord>> {
        (**self).find(key).await
    }

    async fn create(&self, record: LedgerRecord) -> Result<CreateOutcome> {
        (**self).create(record).await
    }

    async fn update(&self, record: &LedgerRecord) -> Result<bool> {
        (**self).update(record).await
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>> {
        (**self).find_due_retries(now, limit).await
    }

    async fn tombstone(&self, record: &LedgerRecord, now: DateTime<Utc>) -> Result<bool> {
        (**self).tombstone(record, now).await
    }
}
