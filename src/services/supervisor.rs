//! Worker pool: claim → execute → ack/nack, end to end per job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::{ClaimResult, ExecutionRecord, IntentStore};
use crate::execution::{ErrorClass, ExecutionError, ExecutionOutcome, ExecutionService};
use crate::models::{DlqEntry, DlqSource, QueueEntry, UNCONFIRMED_SETTLEMENT};
use crate::queue::{now_ms, JobQueue, NackOutcome, REASON_EXECUTION_ERROR, REASON_FATAL};

use super::notifier::{format_dead_letter, format_executed, Notifier};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub workers: usize,
    /// How long one claim waits for work before the loop re-checks pause/cancel.
    pub claim_timeout: Duration,
    /// Fresh expiry given to replayed intents.
    pub pending_ttl: chrono::Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            claim_timeout: Duration::from_secs(2),
            pending_ttl: chrono::Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    /// Nothing to claim within the timeout.
    Idle,
    Paused,
    Executed,
    Retrying,
    DeadLettered,
    /// Policy failure, terminal for the intent.
    Rejected,
    Expired,
    /// The intent row was already owned by another state.
    Skipped,
}

impl JobResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobResult::Idle => "idle",
            JobResult::Paused => "paused",
            JobResult::Executed => "executed",
            JobResult::Retrying => "retrying",
            JobResult::DeadLettered => "dead_lettered",
            JobResult::Rejected => "rejected",
            JobResult::Expired => "expired",
            JobResult::Skipped => "skipped",
        }
    }
}

pub struct Supervisor {
    queue: JobQueue,
    intents: Arc<dyn IntentStore>,
    executor: Arc<ExecutionService>,
    notifier: Option<Arc<Notifier>>,
    paused: Arc<AtomicBool>,
    settings: WorkerSettings,
}

impl Supervisor {
    pub fn new(
        queue: JobQueue,
        intents: Arc<dyn IntentStore>,
        executor: Arc<ExecutionService>,
        notifier: Option<Arc<Notifier>>,
        paused: Arc<AtomicBool>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            intents,
            executor,
            notifier,
            paused,
            settings,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Claim and fully process at most one job.
    pub async fn process_next(&self) -> anyhow::Result<JobResult> {
        if self.is_paused() {
            return Ok(JobResult::Paused);
        }

        let Some(entry) = self.queue.claim(self.settings.claim_timeout).await? else {
            return Ok(JobResult::Idle);
        };

        let result = self.process(&entry).await?;
        counter!("jobs_processed_total", "result" => result.as_str()).increment(1);
        Ok(result)
    }

    async fn process(&self, entry: &QueueEntry) -> anyhow::Result<JobResult> {
        let token = entry.token.as_str();
        let intent = &entry.payload;
        let key = intent.idempotency_key.as_str();

        if entry.replayed {
            let expires_at = Utc::now() + self.settings.pending_ttl;
            if self.intents.reopen(key, expires_at).await? {
                tracing::info!(key, token, "Reopened replayed intent");
            }
        }

        match self.intents.begin_processing(key, Utc::now()).await? {
            ClaimResult::Claimed => {}
            ClaimResult::Expired => {
                tracing::info!(key, token, "Intent expired before execution");
                self.queue.ack(token).await?;
                return Ok(JobResult::Expired);
            }
            ClaimResult::NotClaimable(status) => {
                tracing::info!(key, token, status = %status, "Intent not claimable, skipping job");
                self.queue.ack(token).await?;
                return Ok(JobResult::Skipped);
            }
            ClaimResult::Missing => {
                tracing::warn!(key, token, "No intent row for queued job, skipping");
                self.queue.ack(token).await?;
                return Ok(JobResult::Skipped);
            }
        }

        let outcome = self.executor.execute(intent).await;
        self.settle(entry, outcome).await
    }

    async fn settle(&self, entry: &QueueEntry, outcome: ExecutionOutcome) -> anyhow::Result<JobResult> {
        let token = entry.token.as_str();
        let key = entry.payload.idempotency_key.as_str();

        let Some(error) = outcome.error.as_ref() else {
            self.intents.mark_executed(key, &ExecutionRecord::from(&outcome)).await?;
            self.queue.ack(token).await?;
            self.notify(format_executed(&entry.payload, &outcome));
            return Ok(JobResult::Executed);
        };
        let detail = error.to_string();

        match error.class() {
            ErrorClass::Policy => {
                let reason = match error {
                    ExecutionError::UnconfirmedSettlement(_) => UNCONFIRMED_SETTLEMENT,
                    _ => detail.as_str(),
                };
                self.intents.mark_failed(key, reason).await?;
                self.queue.ack(token).await?;
                Ok(JobResult::Rejected)
            }
            ErrorClass::Fatal => {
                self.queue.fail_permanently(token, REASON_FATAL, Some(detail.clone())).await?;
                self.intents.mark_failed(key, &detail).await?;
                self.notify_dead_letter(entry, entry.queue_attempt + 1, REASON_FATAL, detail);
                Ok(JobResult::DeadLettered)
            }
            ErrorClass::Operational => {
                // back to PENDING before the entry can be promoted and claimed again
                self.intents.release(key, &detail).await?;
                match self.queue.nack(token, REASON_EXECUTION_ERROR, Some(detail.clone())).await? {
                    NackOutcome::Retrying { .. } => Ok(JobResult::Retrying),
                    NackOutcome::DeadLettered { attempt } => {
                        self.intents.mark_failed(key, &detail).await?;
                        self.notify_dead_letter(entry, attempt, REASON_EXECUTION_ERROR, detail);
                        Ok(JobResult::DeadLettered)
                    }
                }
            }
        }
    }

    fn notify_dead_letter(&self, entry: &QueueEntry, attempt: u32, reason: &str, detail: String) {
        if self.notifier.is_none() {
            return;
        }
        let mut entry = entry.clone();
        entry.queue_attempt = attempt;
        let dlq = DlqEntry {
            entry,
            reason: reason.to_string(),
            source: DlqSource::Nack,
            failed_at: now_ms(),
            detail: Some(detail),
        };
        self.notify(format_dead_letter(&dlq));
    }

    fn notify(&self, message: String) {
        if let Some(notifier) = self.notifier.clone() {
            tokio::spawn(async move { notifier.send(&message).await });
        }
    }

    /// Spawn `settings.workers` loops. In-flight jobs finish before a worker observes
    /// cancellation.
    pub fn spawn_workers(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.settings.workers.max(1))
            .map(|worker| {
                let supervisor = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { supervisor.worker_loop(worker, cancel).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, cancel: CancellationToken) {
        tracing::info!(worker, "Queue worker started");

        while !cancel.is_cancelled() {
            let idle = match self.process_next().await {
                Ok(JobResult::Paused) => Some(self.settings.claim_timeout),
                Ok(_) => None,
                Err(e) => {
                    tracing::error!(worker, error = %e, "Queue worker error");
                    Some(Duration::from_secs(1))
                }
            };

            if let Some(wait) = idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        tracing::info!(worker, "Queue worker stopped");
    }
}
