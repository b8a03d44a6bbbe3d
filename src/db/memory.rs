//! In-process stores with the same semantics as the Postgres repos.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::intent::PENDING_EXPIRED;
use crate::models::{CopyConfig, CopyIntent, IntentStatus};

use super::{ClaimResult, ConfigStore, ExecutionRecord, IntentRecord, IntentStore, StoreError};

#[derive(Default)]
pub struct MemoryIntentStore {
    rows: Mutex<HashMap<String, IntentRecord>>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, IntentRecord>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_with_status(&self, status: IntentStatus) -> usize {
        self.rows().values().filter(|r| r.status == status).count()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn insert(&self, intent: &CopyIntent) -> Result<bool, StoreError> {
        let mut rows = self.rows();
        if rows.contains_key(&intent.idempotency_key) {
            return Ok(false);
        }
        rows.insert(intent.idempotency_key.clone(), IntentRecord::from_intent(intent));
        Ok(true)
    }

    async fn begin_processing(&self, key: &str, now: DateTime<Utc>) -> Result<ClaimResult, StoreError> {
        let mut rows = self.rows();
        let Some(row) = rows.get_mut(key) else {
            return Ok(ClaimResult::Missing);
        };
        match row.status {
            IntentStatus::Pending if row.expires_at > now => {
                row.status = IntentStatus::Processing;
                Ok(ClaimResult::Claimed)
            }
            IntentStatus::Pending => {
                row.status = IntentStatus::Expired;
                row.error_message = Some(PENDING_EXPIRED.to_string());
                Ok(ClaimResult::Expired)
            }
            other => Ok(ClaimResult::NotClaimable(other)),
        }
    }

    async fn mark_executed(&self, key: &str, record: &ExecutionRecord) -> Result<(), StoreError> {
        if let Some(row) = self.rows().get_mut(key) {
            row.status = IntentStatus::Executed;
            row.order_id = record.order_id.clone();
            row.tx_hash = record.tx_hash;
            row.fill_price = record.fill_price;
            row.error_message = None;
            row.executed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, key: &str, reason: &str) -> Result<(), StoreError> {
        if let Some(row) = self.rows().get_mut(key) {
            if row.status != IntentStatus::Executed {
                row.status = IntentStatus::Failed;
                row.error_message = Some(reason.to_string());
            }
        }
        Ok(())
    }

    async fn release(&self, key: &str, reason: &str) -> Result<(), StoreError> {
        if let Some(row) = self.rows().get_mut(key) {
            if row.status == IntentStatus::Processing {
                row.status = IntentStatus::Pending;
                row.attempt += 1;
                row.error_message = Some(reason.to_string());
            }
        }
        Ok(())
    }

    async fn reopen(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut rows = self.rows();
        match rows.get_mut(key) {
            Some(row) if matches!(row.status, IntentStatus::Failed | IntentStatus::Expired) => {
                row.status = IntentStatus::Pending;
                row.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_pending(&self, now: DateTime<Utc>, batch: i64) -> Result<Vec<String>, StoreError> {
        let mut rows = self.rows();
        let mut due: Vec<(DateTime<Utc>, String)> = rows
            .values()
            .filter(|r| r.status == IntentStatus::Pending && r.expires_at <= now)
            .map(|r| (r.expires_at, r.idempotency_key.clone()))
            .collect();
        due.sort();
        due.truncate(batch.max(0) as usize);

        let mut keys = Vec::with_capacity(due.len());
        for (_, key) in due {
            if let Some(row) = rows.get_mut(&key) {
                row.status = IntentStatus::Failed;
                row.error_message = Some(PENDING_EXPIRED.to_string());
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<IntentRecord>, StoreError> {
        Ok(self.rows().get(key).cloned())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    configs: RwLock<Vec<CopyConfig>>,
}

impl MemoryConfigStore {
    pub fn new(configs: Vec<CopyConfig>) -> Self {
        Self {
            configs: RwLock::new(configs),
        }
    }

    /// Insert or replace by id.
    pub fn upsert(&self, config: CopyConfig) {
        let mut configs = self.configs.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match configs.iter_mut().find(|c| c.id == config.id) {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
    }

    fn snapshot(&self) -> Vec<CopyConfig> {
        self.configs.read().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn active_configs(&self) -> Result<Vec<CopyConfig>, StoreError> {
        Ok(self.snapshot().into_iter().filter(|c| c.is_active).collect())
    }

    async fn configs_for_trader(&self, trader: Address) -> Result<Vec<CopyConfig>, StoreError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|c| c.is_active && c.trader_address == trader)
            .collect())
    }
}
