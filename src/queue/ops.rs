//! Operator tooling over the dead-letter queue: peek, replay and purge.

use serde::Serialize;
use uuid::Uuid;

use crate::models::{DlqEntry, DlqSource};

use super::{now_ms, JobQueue, QueueError, Requeue};

/// One DLQ row as shown to an operator. `entry` is `None` when the row does not parse.
#[derive(Debug, Clone, Serialize)]
pub struct DlqRow {
    pub index: usize,
    pub entry: Option<DlqEntry>,
}

/// The newest `limit` DLQ rows, oldest of them first.
pub async fn peek(queue: &JobQueue, limit: usize) -> Result<Vec<DlqRow>, QueueError> {
    let total = queue.backend().stats().await?.dlq;
    let start = total.saturating_sub(limit);
    let rows = queue.backend().dlq_range(start, limit).await?;

    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(i, raw)| DlqRow {
            index: start + i,
            entry: serde_json::from_str(&raw).ok(),
        })
        .collect())
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Oldest rows scanned.
    pub limit: usize,
    pub reason: Option<String>,
    pub source: Option<DlqSource>,
    pub token: Option<String>,
    pub dry_run: bool,
    /// Keep `queue_attempt` instead of resetting it to 0.
    pub keep_attempt: bool,
}

impl ReplayOptions {
    fn matches(&self, entry: &DlqEntry) -> bool {
        if self.reason.as_deref().is_some_and(|r| r != entry.reason) {
            return false;
        }
        if self.source.is_some_and(|s| s != entry.source) {
            return false;
        }
        if self.token.as_deref().is_some_and(|t| t != entry.entry.token) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub scanned: usize,
    pub matched: usize,
    pub replayed: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub capacity_blocked: usize,
}

/// Re-inject matching DLQ rows into `pending` under new queue tokens.
///
/// Only rows actually pushed are removed from the DLQ. The business idempotency key is
/// carried over unchanged, so the worker's intent-store claim still guards execution.
pub async fn replay(queue: &JobQueue, opts: &ReplayOptions) -> Result<ReplaySummary, QueueError> {
    let rows = queue.backend().dlq_range(0, opts.limit).await?;
    let max = queue.settings().max_size;
    let mut summary = ReplaySummary {
        scanned: rows.len(),
        ..Default::default()
    };

    for raw in rows {
        let Ok(dead) = serde_json::from_str::<DlqEntry>(&raw) else {
            summary.invalid += 1;
            continue;
        };
        if !opts.matches(&dead) {
            summary.skipped += 1;
            continue;
        }
        summary.matched += 1;

        let mut entry = dead.entry;
        let old_token = std::mem::replace(&mut entry.token, Uuid::new_v4().to_string());
        entry.enqueued_at = now_ms();
        entry.replayed = true;
        if !opts.keep_attempt {
            entry.queue_attempt = 0;
        }

        if opts.dry_run {
            if queue.backend().stats().await?.occupancy() >= max {
                summary.capacity_blocked += 1;
            } else {
                summary.replayed += 1;
            }
            continue;
        }

        match queue.backend().dlq_requeue(&raw, &entry, max).await? {
            Requeue::Requeued => {
                summary.replayed += 1;
                tracing::info!(old_token = %old_token, token = %entry.token, reason = %dead.reason, "Replayed DLQ entry");
            }
            Requeue::CapacityBlocked => summary.capacity_blocked += 1,
            Requeue::Missing => summary.skipped += 1,
        }
    }

    Ok(summary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeScope {
    Oldest(usize),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    pub before: usize,
    pub removed: usize,
    pub remaining: usize,
    pub dry_run: bool,
}

/// Drop the oldest DLQ rows. Never touches pending or in-flight entries.
pub async fn purge(queue: &JobQueue, scope: PurgeScope, dry_run: bool) -> Result<PurgeSummary, QueueError> {
    let before = queue.backend().stats().await?.dlq;
    let wanted = match scope {
        PurgeScope::Oldest(n) => n.min(before),
        PurgeScope::All => before,
    };

    let removed = if dry_run {
        wanted
    } else {
        queue.backend().dlq_trim_oldest(wanted).await?
    };

    if !dry_run && removed > 0 {
        tracing::warn!(removed, before, "Purged DLQ entries");
    }
    Ok(PurgeSummary {
        before,
        removed,
        remaining: before.saturating_sub(removed),
        dry_run,
    })
}
