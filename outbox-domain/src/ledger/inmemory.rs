//! 内存版台账（InMemoryLedger）
//!
//! 基于 `DashMap` 的台账实现，满足 `LedgerRepository` 协议：
//! - `create` 借助分片锁下的 entry API 保证同键只有一个创建者成功；
//! - `update`/`tombstone` 以版本号为条件写入；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：进程退出即丢失全部记录，不具备持久性。

use super::record::{LedgerKey, LedgerRecord};
use super::repository::{CreateOutcome, LedgerRepository};
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Default)]
pub struct InMemoryLedger {
    records: DashMap<LedgerKey, LedgerRecord>,
    next_id: AtomicI64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部记录（含逻辑删除），按 `id` 排序
    pub fn records(&self) -> Vec<LedgerRecord> {
        let mut all: Vec<LedgerRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.id());
        all
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    async fn find(&self, key: &LedgerKey) -> Result<Option<LedgerRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn create(&self, mut record: LedgerRecord) -> Result<CreateOutcome> {
        match self.records.entry(record.key()) {
            Entry::Occupied(existing) => Ok(CreateOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                record.assign_id(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                slot.insert(record.clone());
                Ok(CreateOutcome::Created(record))
            }
        }
    }

    async fn update(&self, record: &LedgerRecord) -> Result<bool> {
        let Some(mut stored) = self.records.get_mut(&record.key()) else {
            return Ok(false);
        };
        if stored.version() != record.version() || stored.status().is_terminal() {
            return Ok(false);
        }

        let mut next = record.clone();
        next.bump_version();
        *stored = next;
        Ok(true)
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>> {
        let mut due: Vec<LedgerRecord> = self
            .records
            .iter()
            .filter(|r| r.value().is_due(now))
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|r| (r.retry_times(), r.create_time(), r.id()));
        due.truncate(limit);
        Ok(due)
    }

    async fn tombstone(&self, record: &LedgerRecord, now: DateTime<Utc>) -> Result<bool> {
        let Some((_, mut stored)) = self
            .records
            .remove_if(&record.key(), |_, s| s.version() == record.version())
        else {
            return Ok(false);
        };

        stored.mark_deleted(now);
        stored.bump_version();
        self.records.insert(stored.key(), stored);
        Ok(true)
    }
}
