use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::db::{ConfigStore, IntentStore, StoreError};
use crate::execution::sizing::{evaluate, IntentContext};
use crate::models::{CopyIntent, IntentStatus, TradeSignal, UNCONFIRMED_SETTLEMENT};
use crate::queue::{JobQueue, QueueError};

use super::price_cache::PriceCache;

/// Error recorded on intents that never made it into the queue.
pub const QUEUE_FULL: &str = "QUEUE_FULL";
pub const QUEUE_UNAVAILABLE: &str = "QUEUE_UNAVAILABLE";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub pending_ttl: chrono::Duration,
    pub idempotency_bucket_ms: i64,
    /// Enqueue attempts on a full queue before the intent is dropped.
    pub enqueue_attempts: u32,
    pub enqueue_backoff: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pending_ttl: chrono::Duration::minutes(10),
            idempotency_bucket_ms: 5_000,
            enqueue_attempts: 3,
            enqueue_backoff: Duration::from_millis(500),
        }
    }
}

/// What happened to one signal across every config following its trader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub configs: usize,
    pub enqueued: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub dropped: usize,
    /// Signal had no price and none could be resolved.
    pub unpriced: bool,
}

/// Signal → intents → queue.
pub struct SignalPipeline {
    configs: Arc<dyn ConfigStore>,
    intents: Arc<dyn IntentStore>,
    queue: JobQueue,
    prices: Option<Arc<PriceCache>>,
    settings: PipelineSettings,
}

impl SignalPipeline {
    pub fn new(
        configs: Arc<dyn ConfigStore>,
        intents: Arc<dyn IntentStore>,
        queue: JobQueue,
        prices: Option<Arc<PriceCache>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            configs,
            intents,
            queue,
            prices,
            settings,
        }
    }

    /// Evaluate `signal` against every active config for its trader, persist the
    /// resulting intents and enqueue the new ones.
    pub async fn handle(&self, signal: TradeSignal) -> Result<PipelineReport, StoreError> {
        let mut report = PipelineReport::default();

        let signal = match signal.unit_price {
            Some(_) => signal,
            None => match self.resolve_price(&signal).await {
                Some(price) => signal.with_price(price),
                None => {
                    counter!("signals_unpriced_total").increment(1);
                    tracing::debug!(token_id = %signal.token_id, side = %signal.side, "No strict price for signal, skipping");
                    report.unpriced = true;
                    return Ok(report);
                }
            },
        };

        let configs = self.configs.configs_for_trader(signal.trader_address).await?;
        report.configs = configs.len();

        let ctx = IntentContext {
            now: Utc::now(),
            pending_ttl: self.settings.pending_ttl,
            idempotency_bucket_ms: self.settings.idempotency_bucket_ms,
        };

        for config in &configs {
            let intent = match evaluate(&signal, config, &ctx) {
                Ok(intent) => intent,
                Err(reason) => {
                    counter!("intents_rejected_total", "reason" => reason.code()).increment(1);
                    tracing::debug!(config_id = %config.id, reason = %reason, "Signal filtered");
                    report.rejected += 1;
                    continue;
                }
            };

            match self.intents.insert(&intent).await {
                Ok(true) => {}
                Ok(false) => {
                    if !self.reopen_for_settlement(&intent).await {
                        tracing::debug!(key = %intent.idempotency_key, "Intent already recorded");
                        report.duplicates += 1;
                        continue;
                    }
                }
                Err(e) => {
                    tracing::error!(config_id = %config.id, error = %e, "Failed to persist intent");
                    report.dropped += 1;
                    continue;
                }
            }

            counter!("intents_created_total", "source" => intent.source.as_str()).increment(1);
            if self.enqueue(&intent).await {
                report.enqueued += 1;
            } else {
                report.dropped += 1;
            }
        }

        Ok(report)
    }

    /// A confirmed fill takes back a row its mempool sighting lost at a resolved market.
    async fn reopen_for_settlement(&self, intent: &CopyIntent) -> bool {
        if !intent.source.is_authoritative() {
            return false;
        }
        let key = intent.idempotency_key.as_str();
        let refused = match self.intents.get(key).await {
            Ok(Some(record)) => {
                record.status == IntentStatus::Failed
                    && record.error_message.as_deref() == Some(UNCONFIRMED_SETTLEMENT)
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to load existing intent");
                false
            }
        };
        if !refused {
            return false;
        }

        match self.intents.reopen(key, intent.expires_at).await {
            Ok(reopened) => {
                if reopened {
                    counter!("intents_reopened_total").increment(1);
                    tracing::info!(key = %key, "Confirmed settlement reopens intent");
                }
                reopened
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to reopen intent");
                false
            }
        }
    }

    async fn resolve_price(&self, signal: &TradeSignal) -> Option<rust_decimal::Decimal> {
        self.prices.as_ref()?.price_for(&signal.token_id, signal.side).await
    }

    /// Enqueue with bounded retry on a full queue. On final failure the intent row is
    /// failed so the sweeper does not wait for it to expire.
    async fn enqueue(&self, intent: &CopyIntent) -> bool {
        let mut attempt = 0;
        let err = loop {
            attempt += 1;
            match self.queue.enqueue(intent.clone()).await {
                Ok(token) => {
                    tracing::info!(
                        key = %intent.idempotency_key,
                        token = %token,
                        side = %intent.copy_side,
                        size = %intent.copy_size_usd,
                        "Copy intent enqueued"
                    );
                    return true;
                }
                Err(QueueError::Full { occupancy, max }) if attempt < self.settings.enqueue_attempts => {
                    tracing::warn!(occupancy, max, attempt, "Queue full, backing off");
                    tokio::time::sleep(self.settings.enqueue_backoff * attempt).await;
                }
                Err(e) => break e,
            }
        };

        let reason = match err {
            QueueError::Full { .. } => QUEUE_FULL,
            _ => QUEUE_UNAVAILABLE,
        };
        counter!("intents_dropped_total", "reason" => reason).increment(1);
        tracing::error!(key = %intent.idempotency_key, error = %err, "Dropping copy intent");

        if let Err(e) = self.intents.mark_failed(&intent.idempotency_key, reason).await {
            tracing::error!(key = %intent.idempotency_key, error = %e, "Failed to record dropped intent");
        }
        false
    }

    /// Drain `rx` until it closes or `cancel` fires.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<TradeSignal>, cancel: CancellationToken) {
        tracing::info!("Signal pipeline started");
        loop {
            let signal = tokio::select! {
                _ = cancel.cancelled() => break,
                s = rx.recv() => match s {
                    Some(s) => s,
                    None => break,
                },
            };

            let start = Instant::now();
            counter!("signals_received_total", "source" => signal.source.as_str()).increment(1);
            let trader = signal.trader_address;

            match self.handle(signal).await {
                Ok(report) if report.enqueued > 0 => {
                    tracing::debug!(trader = %trader, ?report, "Signal processed");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(trader = %trader, error = %e, "Signal pipeline error"),
            }
            histogram!("pipeline_latency_seconds").record(start.elapsed().as_secs_f64());
        }
        tracing::info!("Signal pipeline stopped");
    }
}
