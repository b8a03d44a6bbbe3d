use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::IntentStore;
use crate::queue::{now_ms, JobQueue};

use super::notifier::{format_dead_letter, Notifier};

/// PENDING rows failed per sweep.
pub const EXPIRY_BATCH: i64 = 25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub reclaimed: usize,
    pub promoted: usize,
}

/// Housekeeping that keeps the intent table and the queue honest.
pub struct Sweeper {
    queue: JobQueue,
    intents: Arc<dyn IntentStore>,
    notifier: Option<Arc<Notifier>>,
}

impl Sweeper {
    pub fn new(queue: JobQueue, intents: Arc<dyn IntentStore>, notifier: Option<Arc<Notifier>>) -> Self {
        Self {
            queue,
            intents,
            notifier,
        }
    }

    /// One pass: expire stale PENDING intents, dead-letter abandoned claims, promote due
    /// retries. Each step runs even if an earlier one failed.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.intents.expire_pending(Utc::now(), EXPIRY_BATCH).await {
            Ok(keys) => {
                report.expired = keys.len();
                if !keys.is_empty() {
                    counter!("intents_expired_total").increment(keys.len() as u64);
                    tracing::info!(count = keys.len(), "Expired pending intents");
                }
            }
            Err(e) => tracing::error!(error = %e, "Sweeper: failed to expire pending intents"),
        }

        match self.queue.reclaim_stale(now_ms()).await {
            Ok(moved) => {
                report.reclaimed = moved.len();
                for dlq in &moved {
                    let key = &dlq.entry.payload.idempotency_key;
                    if let Err(e) = self.intents.mark_failed(key, &dlq.reason).await {
                        tracing::error!(key = %key, error = %e, "Sweeper: failed to mark reclaimed intent");
                    }
                    if let Some(notifier) = &self.notifier {
                        notifier.send(&format_dead_letter(dlq)).await;
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Sweeper: reclaim failed"),
        }

        match self.queue.promote_due(now_ms()).await {
            Ok(n) => {
                report.promoted = n;
                if n > 0 {
                    tracing::debug!(count = n, "Promoted delayed retries");
                }
            }
            Err(e) => tracing::error!(error = %e, "Sweeper: promote failed"),
        }

        // refreshes the queue gauges
        if let Err(e) = self.queue.stats().await {
            tracing::warn!(error = %e, "Sweeper: queue stats unavailable");
        }

        report
    }

    pub async fn run(self, every: Duration, cancel: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = every.as_millis() as u64, "Sweeper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
        tracing::info!("Sweeper stopped");
    }
}
