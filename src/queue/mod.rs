//! Bounded job queue for copy intents.
//!
//! Partitions: `pending` (FIFO), `processing` + `in-flight` (claimed, keyed by token),
//! `delayed` (retry backoff, scored by ready time) and `dlq`. Backends only expose
//! atomic primitives; retry policy and reaping live in [`JobQueue`].

pub mod memory;
pub mod ops;
pub mod redis_queue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CopyIntent, DlqEntry, DlqSource, QueueEntry};

pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;

/// DLQ reason for operational failures that ran out of retries.
pub const REASON_EXECUTION_ERROR: &str = "EXECUTION_ERROR";
/// DLQ reason for failures that may have stranded assets.
pub const REASON_FATAL: &str = "FATAL_EXECUTION_ERROR";
/// DLQ reason for claims that outlived the liveness timeout.
pub const REASON_LIVENESS_TIMEOUT: &str = "LIVENESS_TIMEOUT";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue full: occupancy {occupancy} at max {max}")]
    Full { occupancy: usize, max: usize },

    #[error("no in-flight entry for token {0}")]
    UnknownToken(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub in_flight: usize,
    pub delayed: usize,
    pub dlq: usize,
    pub max_size: usize,
}

impl QueueStats {
    /// Entries counted against capacity. The DLQ is not.
    pub fn occupancy(&self) -> usize {
        self.pending + self.delayed + self.in_flight
    }
}

/// A claimed entry and when it was claimed (unix ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlight {
    pub entry: QueueEntry,
    pub claimed_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Requeued,
    CapacityBlocked,
    /// The DLQ row was removed by someone else first.
    Missing,
}

/// Atomic storage primitives. Every multi-partition move is a single step.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append to `pending` unless occupancy has already reached `max`.
    async fn push_pending(&self, entry: &QueueEntry, max: usize) -> Result<bool, QueueError>;

    /// Pop the oldest pending entry into `processing`/`in-flight`.
    async fn claim(&self, now_ms: i64) -> Result<Option<QueueEntry>, QueueError>;

    async fn in_flight_entry(&self, token: &str) -> Result<Option<InFlight>, QueueError>;

    /// Drop an in-flight entry. `false` if the token was not in flight.
    async fn complete(&self, token: &str) -> Result<bool, QueueError>;

    /// Move an in-flight entry to `delayed`, replaced by `entry`, ready at `ready_at_ms`.
    async fn retry_later(&self, token: &str, entry: &QueueEntry, ready_at_ms: i64) -> Result<bool, QueueError>;

    /// Move an in-flight entry to the DLQ.
    async fn dead_letter(&self, token: &str, dlq: &DlqEntry) -> Result<bool, QueueError>;

    /// Move up to `limit` due delayed entries to the tail of `pending`.
    async fn promote_due(&self, now_ms: i64, limit: usize) -> Result<usize, QueueError>;

    async fn in_flight(&self) -> Result<Vec<InFlight>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Raw DLQ rows, oldest first, starting at `offset`.
    async fn dlq_range(&self, offset: usize, limit: usize) -> Result<Vec<String>, QueueError>;

    /// Remove the DLQ row `raw` and push `entry` to `pending`, subject to capacity.
    async fn dlq_requeue(&self, raw: &str, entry: &QueueEntry, max: usize) -> Result<Requeue, QueueError>;

    /// Remove the oldest `n` DLQ rows. Returns how many were removed.
    async fn dlq_trim_oldest(&self, n: usize) -> Result<usize, QueueError>;

    /// Wait until work may be available, at most `max`.
    async fn wait_for_work(&self, max: Duration) {
        tokio::time::sleep(max).await;
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_size: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub liveness_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: 5_000,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl QueueSettings {
    /// Delay before retry number `attempt` (1-based): base × 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    Retrying { attempt: u32, delay: Duration },
    DeadLettered { attempt: u32 },
}

/// Queue facade used by the pipeline, workers and operator tooling.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    settings: QueueSettings,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, settings: QueueSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Wrap `intent` in a fresh entry and append it. Returns the queue token.
    pub async fn enqueue(&self, intent: CopyIntent) -> Result<String, QueueError> {
        let entry = QueueEntry::new(intent, now_ms());
        self.enqueue_entry(&entry).await?;
        Ok(entry.token)
    }

    pub async fn enqueue_entry(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        if self.backend.push_pending(entry, self.settings.max_size).await? {
            counter!("queue_enqueued_total").increment(1);
            return Ok(());
        }

        let occupancy = self.backend.stats().await.map(|s| s.occupancy()).unwrap_or(0);
        counter!("queue_rejected_total").increment(1);
        Err(QueueError::Full {
            occupancy,
            max: self.settings.max_size,
        })
    }

    /// Claim the next pending entry, waiting up to `timeout`.
    pub async fn claim(&self, timeout: Duration) -> Result<Option<QueueEntry>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(entry) = self.backend.claim(now_ms()).await? {
                counter!("queue_claimed_total").increment(1);
                return Ok(Some(entry));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(self.settings.poll_interval);
            self.backend.wait_for_work(wait).await;
        }
    }

    pub async fn ack(&self, token: &str) -> Result<bool, QueueError> {
        let removed = self.backend.complete(token).await?;
        if removed {
            counter!("queue_acked_total").increment(1);
        } else {
            tracing::warn!(token, "Ack for token that is not in flight");
        }
        Ok(removed)
    }

    /// Record a failed attempt: retry after backoff, or dead-letter once attempts run out.
    pub async fn nack(&self, token: &str, reason: &str, detail: Option<String>) -> Result<NackOutcome, QueueError> {
        let claimed = self
            .backend
            .in_flight_entry(token)
            .await?
            .ok_or_else(|| QueueError::UnknownToken(token.to_string()))?;

        let mut entry = claimed.entry;
        entry.queue_attempt += 1;
        let attempt = entry.queue_attempt;

        if attempt < self.settings.max_attempts {
            let delay = self.settings.backoff(attempt);
            let ready_at = now_ms() + delay.as_millis() as i64;
            if !self.backend.retry_later(token, &entry, ready_at).await? {
                return Err(QueueError::UnknownToken(token.to_string()));
            }
            counter!("queue_retried_total").increment(1);
            tracing::info!(token, attempt, delay_ms = delay.as_millis() as u64, reason, "Job scheduled for retry");
            return Ok(NackOutcome::Retrying { attempt, delay });
        }

        self.move_to_dlq(token, entry, reason, DlqSource::Nack, detail).await?;
        Ok(NackOutcome::DeadLettered { attempt })
    }

    /// Dead-letter immediately, skipping retries.
    pub async fn fail_permanently(&self, token: &str, reason: &str, detail: Option<String>) -> Result<(), QueueError> {
        let claimed = self
            .backend
            .in_flight_entry(token)
            .await?
            .ok_or_else(|| QueueError::UnknownToken(token.to_string()))?;
        let mut entry = claimed.entry;
        entry.queue_attempt += 1;
        self.move_to_dlq(token, entry, reason, DlqSource::Nack, detail).await
    }

    async fn move_to_dlq(
        &self,
        token: &str,
        entry: QueueEntry,
        reason: &str,
        source: DlqSource,
        detail: Option<String>,
    ) -> Result<(), QueueError> {
        let key = entry.payload.idempotency_key.clone();
        let attempt = entry.queue_attempt;
        let dlq = DlqEntry {
            entry,
            reason: reason.to_string(),
            source,
            failed_at: now_ms(),
            detail,
        };
        if !self.backend.dead_letter(token, &dlq).await? {
            return Err(QueueError::UnknownToken(token.to_string()));
        }
        counter!("queue_dead_lettered_total", "source" => source.as_str()).increment(1);
        tracing::error!(token, key = %key, attempt, reason, source = %source, "Job dead-lettered");
        Ok(())
    }

    /// Route claims older than the liveness timeout to the DLQ. Returns the entries moved.
    pub async fn reclaim_stale(&self, now_ms: i64) -> Result<Vec<DlqEntry>, QueueError> {
        let cutoff = now_ms - self.settings.liveness_timeout.as_millis() as i64;
        let mut moved = Vec::new();

        for claimed in self.backend.in_flight().await? {
            if claimed.claimed_at > cutoff {
                continue;
            }
            let token = claimed.entry.token.clone();
            let dlq = DlqEntry {
                entry: claimed.entry,
                reason: REASON_LIVENESS_TIMEOUT.to_string(),
                source: DlqSource::Reclaim,
                failed_at: now_ms,
                detail: Some(format!("claimed at {} and never acknowledged", claimed.claimed_at)),
            };
            // lost the race with a late ack
            if self.backend.dead_letter(&token, &dlq).await? {
                counter!("queue_dead_lettered_total", "source" => DlqSource::Reclaim.as_str()).increment(1);
                tracing::error!(token = %token, claimed_at = claimed.claimed_at, "Reclaimed stale in-flight job");
                moved.push(dlq);
            }
        }
        Ok(moved)
    }

    pub async fn promote_due(&self, now_ms: i64) -> Result<usize, QueueError> {
        self.backend.promote_due(now_ms, 100).await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = self.backend.stats().await?;
        stats.max_size = self.settings.max_size;

        gauge!("queue_pending").set(stats.pending as f64);
        gauge!("queue_in_flight").set(stats.in_flight as f64);
        gauge!("queue_delayed").set(stats.delayed as f64);
        gauge!("queue_dlq").set(stats.dlq as f64);
        Ok(stats)
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
