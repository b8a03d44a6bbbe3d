use alloy::hex;
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::intent::PENDING_EXPIRED;
use crate::models::{CopyIntent, IntentStatus, Side};

use super::{ClaimResult, ExecutionRecord, IntentRecord, IntentStore, StoreError};

#[derive(Debug, sqlx::FromRow)]
struct IntentRow {
    idempotency_key: String,
    config_id: Uuid,
    proxy_address: String,
    token_id: String,
    copy_side: String,
    copy_size: Decimal,
    status: String,
    attempt: i32,
    error_message: Option<String>,
    order_id: Option<String>,
    tx_hash: Option<String>,
    fill_price: Option<Decimal>,
    expires_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
}

impl TryFrom<IntentRow> for IntentRecord {
    type Error = StoreError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        let invalid = |what: &str, value: &str| StoreError::InvalidRow(format!("{what} {value:?} in {}", row.idempotency_key));

        Ok(IntentRecord {
            proxy_address: row
                .proxy_address
                .parse::<Address>()
                .map_err(|_| invalid("proxy_address", &row.proxy_address))?,
            copy_side: Side::from_api_str(&row.copy_side).ok_or_else(|| invalid("copy_side", &row.copy_side))?,
            status: row
                .status
                .parse::<IntentStatus>()
                .map_err(|_| invalid("status", &row.status))?,
            tx_hash: match &row.tx_hash {
                Some(h) => Some(h.parse::<B256>().map_err(|_| invalid("tx_hash", h))?),
                None => None,
            },
            attempt: row.attempt.max(0) as u32,
            config_id: row.config_id,
            token_id: row.token_id.clone(),
            copy_size_usd: row.copy_size,
            error_message: row.error_message.clone(),
            order_id: row.order_id.clone(),
            fill_price: row.fill_price,
            expires_at: row.expires_at,
            executed_at: row.executed_at,
            idempotency_key: row.idempotency_key.clone(),
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    idempotency_key, config_id, proxy_address, token_id, copy_side, copy_size, status,
    attempt, error_message, order_id, tx_hash, fill_price, expires_at, executed_at
"#;

/// `copy_trades` in Postgres.
#[derive(Clone)]
pub struct PgIntentStore {
    pool: PgPool,
}

impl PgIntentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntentStore for PgIntentStore {
    async fn insert(&self, intent: &CopyIntent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO copy_trades (
                idempotency_key, config_id, wallet_address, proxy_address, trader_address,
                token_id, copy_side, copy_size, leader_price, leader_tx_hash, source,
                status, attempt, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'PENDING', $12, $13)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(&intent.idempotency_key)
        .bind(intent.config_id)
        .bind(hex::encode_prefixed(intent.wallet_address))
        .bind(hex::encode_prefixed(intent.proxy_address))
        .bind(hex::encode_prefixed(intent.trader_address))
        .bind(&intent.token_id)
        .bind(intent.copy_side.as_str())
        .bind(intent.copy_size_usd)
        .bind(intent.leader_price)
        .bind(intent.leader_tx_hash.map(hex::encode_prefixed))
        .bind(intent.source.as_str())
        .bind(intent.attempt as i32)
        .bind(intent.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn begin_processing(&self, key: &str, now: DateTime<Utc>) -> Result<ClaimResult, StoreError> {
        let claimed = sqlx::query(
            r#"
            UPDATE copy_trades
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE idempotency_key = $1 AND status = 'PENDING' AND expires_at > $2
            "#,
        )
        .bind(key)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if claimed.rows_affected() == 1 {
            return Ok(ClaimResult::Claimed);
        }

        let expired = sqlx::query(
            r#"
            UPDATE copy_trades
            SET status = 'EXPIRED', error_message = $2, updated_at = NOW()
            WHERE idempotency_key = $1 AND status = 'PENDING' AND expires_at <= $3
            "#,
        )
        .bind(key)
        .bind(PENDING_EXPIRED)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if expired.rows_affected() == 1 {
            return Ok(ClaimResult::Expired);
        }

        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM copy_trades WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match status {
            Some((status,)) => {
                let status = status
                    .parse::<IntentStatus>()
                    .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
                Ok(ClaimResult::NotClaimable(status))
            }
            None => Ok(ClaimResult::Missing),
        }
    }

    async fn mark_executed(&self, key: &str, record: &ExecutionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE copy_trades
            SET status = 'EXECUTED', order_id = $2, tx_hash = $3, fill_price = $4,
                filled_shares = $5, execution_path = $6, error_message = NULL,
                executed_at = NOW(), updated_at = NOW()
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .bind(&record.order_id)
        .bind(record.tx_hash.map(hex::encode_prefixed))
        .bind(record.fill_price)
        .bind(record.filled_shares)
        .bind(record.path.map(|p| p.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, key: &str, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE copy_trades
            SET status = 'FAILED', error_message = $2, updated_at = NOW()
            WHERE idempotency_key = $1 AND status <> 'EXECUTED'
            "#,
        )
        .bind(key)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release(&self, key: &str, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE copy_trades
            SET status = 'PENDING', attempt = attempt + 1, error_message = $2, updated_at = NOW()
            WHERE idempotency_key = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(key)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reopen(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE copy_trades
            SET status = 'PENDING', expires_at = $2, updated_at = NOW()
            WHERE idempotency_key = $1 AND status IN ('FAILED', 'EXPIRED')
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_pending(&self, now: DateTime<Utc>, batch: i64) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE copy_trades
            SET status = 'FAILED', error_message = $2, updated_at = NOW()
            WHERE id IN (
                SELECT id FROM copy_trades
                WHERE status = 'PENDING' AND expires_at <= $1
                ORDER BY expires_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING idempotency_key
            "#,
        )
        .bind(now)
        .bind(PENDING_EXPIRED)
        .bind(batch)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn get(&self, key: &str) -> Result<Option<IntentRecord>, StoreError> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM copy_trades WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IntentRecord::try_from).transpose()
    }
}
