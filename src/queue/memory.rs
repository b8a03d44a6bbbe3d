use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::models::{DlqEntry, QueueEntry};

use super::{InFlight, QueueBackend, QueueError, QueueStats, Requeue};

#[derive(Default)]
struct State {
    pending: VecDeque<QueueEntry>,
    processing: Vec<String>,
    in_flight: HashMap<String, InFlight>,
    delayed: Vec<(i64, QueueEntry)>,
    /// Serialized like the Redis backend so replay sees the same rows.
    dlq: VecDeque<String>,
}

impl State {
    fn occupancy(&self) -> usize {
        self.pending.len() + self.delayed.len() + self.in_flight.len()
    }

    fn take_in_flight(&mut self, token: &str) -> Option<InFlight> {
        let claimed = self.in_flight.remove(token)?;
        self.processing.retain(|t| t != token);
        Some(claimed)
    }
}

/// Single-process queue for tests and deployments without Redis.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a raw row to the DLQ, bypassing the in-flight bookkeeping.
    pub fn push_dlq_raw(&self, raw: impl Into<String>) {
        self.lock().dlq.push_back(raw.into());
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push_pending(&self, entry: &QueueEntry, max: usize) -> Result<bool, QueueError> {
        {
            let mut state = self.lock();
            if state.occupancy() >= max {
                return Ok(false);
            }
            state.pending.push_back(entry.clone());
        }
        self.notify.notify_one();
        Ok(true)
    }

    async fn claim(&self, now_ms: i64) -> Result<Option<QueueEntry>, QueueError> {
        let mut state = self.lock();
        let Some(entry) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.processing.push(entry.token.clone());
        state.in_flight.insert(
            entry.token.clone(),
            InFlight {
                entry: entry.clone(),
                claimed_at: now_ms,
            },
        );
        Ok(Some(entry))
    }

    async fn in_flight_entry(&self, token: &str) -> Result<Option<InFlight>, QueueError> {
        Ok(self.lock().in_flight.get(token).cloned())
    }

    async fn complete(&self, token: &str) -> Result<bool, QueueError> {
        Ok(self.lock().take_in_flight(token).is_some())
    }

    async fn retry_later(&self, token: &str, entry: &QueueEntry, ready_at_ms: i64) -> Result<bool, QueueError> {
        let mut state = self.lock();
        if state.take_in_flight(token).is_none() {
            return Ok(false);
        }
        state.delayed.push((ready_at_ms, entry.clone()));
        Ok(true)
    }

    async fn dead_letter(&self, token: &str, dlq: &DlqEntry) -> Result<bool, QueueError> {
        let raw = serde_json::to_string(dlq)?;
        let mut state = self.lock();
        if state.take_in_flight(token).is_none() {
            return Ok(false);
        }
        state.dlq.push_back(raw);
        Ok(true)
    }

    async fn promote_due(&self, now_ms: i64, limit: usize) -> Result<usize, QueueError> {
        let moved = {
            let mut state = self.lock();
            state.delayed.sort_by_key(|(ready_at, _)| *ready_at);
            let due = state
                .delayed
                .iter()
                .take_while(|(ready_at, _)| *ready_at <= now_ms)
                .count()
                .min(limit);
            let promoted: Vec<_> = state.delayed.drain(..due).collect();
            for (_, entry) in promoted {
                state.pending.push_back(entry);
            }
            due
        };
        if moved > 0 {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn in_flight(&self) -> Result<Vec<InFlight>, QueueError> {
        Ok(self.lock().in_flight.values().cloned().collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.lock();
        Ok(QueueStats {
            pending: state.pending.len(),
            processing: state.processing.len(),
            in_flight: state.in_flight.len(),
            delayed: state.delayed.len(),
            dlq: state.dlq.len(),
            max_size: 0,
        })
    }

    async fn dlq_range(&self, offset: usize, limit: usize) -> Result<Vec<String>, QueueError> {
        Ok(self.lock().dlq.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn dlq_requeue(&self, raw: &str, entry: &QueueEntry, max: usize) -> Result<Requeue, QueueError> {
        {
            let mut state = self.lock();
            if state.occupancy() >= max {
                return Ok(Requeue::CapacityBlocked);
            }
            let Some(pos) = state.dlq.iter().position(|row| row == raw) else {
                return Ok(Requeue::Missing);
            };
            state.dlq.remove(pos);
            state.pending.push_back(entry.clone());
        }
        self.notify.notify_one();
        Ok(Requeue::Requeued)
    }

    async fn dlq_trim_oldest(&self, n: usize) -> Result<usize, QueueError> {
        let mut state = self.lock();
        let removed = n.min(state.dlq.len());
        state.dlq.drain(..removed);
        Ok(removed)
    }

    async fn wait_for_work(&self, max: Duration) {
        let _ = tokio::time::timeout(max, self.notify.notified()).await;
    }
}
