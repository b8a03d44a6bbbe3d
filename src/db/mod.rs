pub mod config_repo;
pub mod intent_repo;
pub mod memory;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::execution::{ExecutionOutcome, ExecutionPath};
use crate::models::{CopyConfig, CopyIntent, IntentStatus, Side};

pub use config_repo::PgConfigStore;
pub use intent_repo::PgIntentStore;
pub use memory::{MemoryConfigStore, MemoryIntentStore};

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Persisted view of one copy intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentRecord {
    pub idempotency_key: String,
    pub config_id: Uuid,
    pub proxy_address: Address,
    pub token_id: String,
    pub copy_side: Side,
    pub copy_size_usd: Decimal,
    pub status: IntentStatus,
    pub attempt: u32,
    pub error_message: Option<String>,
    pub order_id: Option<String>,
    pub tx_hash: Option<B256>,
    pub fill_price: Option<Decimal>,
    pub expires_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl IntentRecord {
    pub fn from_intent(intent: &CopyIntent) -> Self {
        Self {
            idempotency_key: intent.idempotency_key.clone(),
            config_id: intent.config_id,
            proxy_address: intent.proxy_address,
            token_id: intent.token_id.clone(),
            copy_side: intent.copy_side,
            copy_size_usd: intent.copy_size_usd,
            status: IntentStatus::Pending,
            attempt: intent.attempt,
            error_message: None,
            order_id: None,
            tx_hash: None,
            fill_price: None,
            expires_at: intent.expires_at,
            executed_at: None,
        }
    }
}

/// What a successful execution leaves on the intent row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub order_id: Option<String>,
    pub tx_hash: Option<B256>,
    pub fill_price: Option<Decimal>,
    pub filled_shares: Option<Decimal>,
    pub path: Option<ExecutionPath>,
}

impl From<&ExecutionOutcome> for ExecutionRecord {
    fn from(outcome: &ExecutionOutcome) -> Self {
        Self {
            order_id: outcome.order_id.clone(),
            tx_hash: outcome.tx_hash,
            fill_price: outcome.fill_price,
            filled_shares: outcome.filled_shares,
            path: outcome.path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// PENDING → PROCESSING succeeded; this worker owns execution.
    Claimed,
    /// Was PENDING but past its expiry; now EXPIRED.
    Expired,
    /// Another state already owns it (executed, failed, or being processed).
    NotClaimable(IntentStatus),
    Missing,
}

/// Intent rows keyed by idempotency key. The unique key is the only dedup.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Insert as PENDING. `false` when the key already exists.
    async fn insert(&self, intent: &CopyIntent) -> Result<bool, StoreError>;

    /// Move a live PENDING row to PROCESSING.
    async fn begin_processing(&self, key: &str, now: DateTime<Utc>) -> Result<ClaimResult, StoreError>;

    async fn mark_executed(&self, key: &str, record: &ExecutionRecord) -> Result<(), StoreError>;

    async fn mark_failed(&self, key: &str, reason: &str) -> Result<(), StoreError>;

    /// PROCESSING → PENDING after a retryable failure, bumping the attempt counter.
    async fn release(&self, key: &str, reason: &str) -> Result<(), StoreError>;

    /// FAILED/EXPIRED → PENDING with a fresh expiry, for operator replays. Never touches
    /// EXECUTED or in-progress rows.
    async fn reopen(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Fail up to `batch` PENDING rows past expiry with `PENDING_EXPIRED`. Returns their keys.
    async fn expire_pending(&self, now: DateTime<Utc>, batch: i64) -> Result<Vec<String>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<IntentRecord>, StoreError>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn active_configs(&self) -> Result<Vec<CopyConfig>, StoreError>;

    async fn configs_for_trader(&self, trader: Address) -> Result<Vec<CopyConfig>, StoreError>;
}
