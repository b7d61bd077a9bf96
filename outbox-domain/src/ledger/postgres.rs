//! Postgres 台账实现（PgLedgerRepository）
//!
//! 幂等键由唯一索引 `(event_id, action, owner_group, delete_marker)` 保证，
//! 创建使用 `ON CONFLICT DO NOTHING`，落败者回读胜出者的记录。
//!
use super::record::{LedgerKey, LedgerRecord};
use super::repository::{CreateOutcome, LedgerRepository};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::PgPool;

const COLUMNS: &str = "id, event_id, action, owner_group, owner_name, event_type, status, payload, \
     message, retry_times, max_retry_times, next_retry_time, version, delete_marker, \
     create_time, update_time";

#[derive(FromRow)]
struct LedgerRow {
    id: i64,
    event_id: String,
    action: String,
    owner_group: String,
    owner_name: String,
    event_type: String,
    status: String,
    payload: Option<Vec<u8>>,
    message: Option<String>,
    retry_times: i32,
    max_retry_times: i32,
    next_retry_time: Option<DateTime<Utc>>,
    version: i64,
    delete_marker: i64,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerRecord {
    type Error = DomainError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        let retry_times = u32::try_from(row.retry_times).map_err(|e| DomainError::Parse {
            reason: format!("retry_times: {e}"),
        })?;
        let max_retry_times = u32::try_from(row.max_retry_times).map_err(|e| DomainError::Parse {
            reason: format!("max_retry_times: {e}"),
        })?;

        Ok(LedgerRecord::builder()
            .id(row.id)
            .event_id(row.event_id)
            .action(row.action.parse()?)
            .owner_group(row.owner_group)
            .owner_name(row.owner_name)
            .event_type(row.event_type)
            .status(row.status.parse()?)
            .maybe_payload(row.payload)
            .maybe_message(row.message)
            .retry_times(retry_times)
            .max_retry_times(max_retry_times)
            .maybe_next_retry_time(row.next_retry_time)
            .version(row.version)
            .delete_marker(row.delete_marker)
            .create_time(row.create_time)
            .update_time(row.update_time)
            .build())
    }
}

/// 计数列为 `INTEGER`，超出范围时报错而不是回绕
fn to_db_count(value: u32, column: &str) -> Result<i32> {
    i32::try_from(value).map_err(|e| DomainError::Parse {
        reason: format!("{column}: {e}"),
    })
}

pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 建表与索引
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_ledger (
                id BIGSERIAL PRIMARY KEY,
                event_id VARCHAR(64) NOT NULL,
                action VARCHAR(16) NOT NULL CHECK (action IN ('PUBLISH', 'CONSUME')),
                owner_group VARCHAR(128) NOT NULL,
                owner_name VARCHAR(128) NOT NULL,
                event_type VARCHAR(128) NOT NULL,
                status VARCHAR(16) NOT NULL CHECK (status IN ('CREATED', 'RETRYING', 'SUCCESS', 'FAILED')),
                payload BYTEA,
                message TEXT,
                retry_times INTEGER NOT NULL DEFAULT 0,
                max_retry_times INTEGER NOT NULL,
                next_retry_time TIMESTAMPTZ,
                version BIGINT NOT NULL DEFAULT 0,
                delete_marker BIGINT NOT NULL DEFAULT 0,
                create_time TIMESTAMPTZ NOT NULL,
                update_time TIMESTAMPTZ NOT NULL,
                UNIQUE (event_id, action, owner_group, delete_marker)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_event_ledger_due
            ON event_ledger(next_retry_time, retry_times, create_time)
            WHERE status = 'RETRYING' AND action = 'CONSUME' AND delete_marker = 0
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_by_key(&self, key: &LedgerKey) -> Result<Option<LedgerRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM event_ledger \
             WHERE event_id = $1 AND action = $2 AND owner_group = $3 AND delete_marker = $4"
        );
        let row: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(&key.event_id)
            .bind(key.action.as_str())
            .bind(&key.owner_group)
            .bind(key.delete_marker)
            .fetch_optional(&self.pool)
            .await?;

        row.map(LedgerRecord::try_from).transpose()
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn find(&self, key: &LedgerKey) -> Result<Option<LedgerRecord>> {
        self.fetch_by_key(key).await
    }

    async fn create(&self, record: LedgerRecord) -> Result<CreateOutcome> {
        let retry_times = to_db_count(record.retry_times(), "retry_times")?;
        let max_retry_times = to_db_count(record.max_retry_times(), "max_retry_times")?;
        let sql = format!(
            "INSERT INTO event_ledger (event_id, action, owner_group, owner_name, event_type, \
             status, payload, message, retry_times, max_retry_times, next_retry_time, version, \
             delete_marker, create_time, update_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (event_id, action, owner_group, delete_marker) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let inserted: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(record.event_id())
            .bind(record.action().as_str())
            .bind(record.owner_group())
            .bind(record.owner_name())
            .bind(record.event_type())
            .bind(record.status().as_str())
            .bind(record.payload())
            .bind(record.message())
            .bind(retry_times)
            .bind(max_retry_times)
            .bind(record.next_retry_time())
            .bind(record.version())
            .bind(record.delete_marker())
            .bind(record.create_time())
            .bind(record.update_time())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(CreateOutcome::Created(row.try_into()?));
        }

        // 唯一约束冲突：以胜出者的记录为准
        match self.fetch_by_key(&record.key()).await? {
            Some(existing) => Ok(CreateOutcome::Existing(existing)),
            None => Err(DomainError::ledger(format!(
                "conflicting row vanished: event_id={}",
                record.event_id()
            ))),
        }
    }

    async fn update(&self, record: &LedgerRecord) -> Result<bool> {
        let retry_times = to_db_count(record.retry_times(), "retry_times")?;
        let result = sqlx::query(
            r#"
            UPDATE event_ledger
            SET status = $1,
                message = $2,
                retry_times = $3,
                next_retry_time = $4,
                update_time = $5,
                version = version + 1
            WHERE id = $6
              AND version = $7
              AND status NOT IN ('SUCCESS', 'FAILED')
            "#,
        )
        .bind(record.status().as_str())
        .bind(record.message())
        .bind(retry_times)
        .bind(record.next_retry_time())
        .bind(record.update_time())
        .bind(record.id())
        .bind(record.version())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM event_ledger \
             WHERE action = 'CONSUME' AND status = 'RETRYING' AND delete_marker = 0 \
             AND next_retry_time <= $1 \
             ORDER BY retry_times ASC, create_time ASC \
             LIMIT $2"
        );
        let rows: Vec<LedgerRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(LedgerRecord::try_from).collect()
    }

    async fn tombstone(&self, record: &LedgerRecord, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE event_ledger
            SET delete_marker = id,
                update_time = $3,
                version = version + 1
            WHERE id = $1 AND version = $2 AND delete_marker = 0
            "#,
        )
        .bind(record.id())
        .bind(record.version())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
