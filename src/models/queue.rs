use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::copy_config::UnknownVariant;
use super::CopyIntent;

/// Durable wrapper around a `CopyIntent` while it is owned by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Opaque per-enqueue handle. Replays mint a new one.
    pub token: String,
    pub payload: CopyIntent,
    /// Unix milliseconds.
    pub enqueued_at: i64,
    pub queue_attempt: u32,
    #[serde(default)]
    pub replayed: bool,
}

impl QueueEntry {
    pub fn new(payload: CopyIntent, now_ms: i64) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            payload,
            enqueued_at: now_ms,
            queue_attempt: 0,
            replayed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DlqSource {
    /// Retries exhausted after explicit failures.
    Nack,
    /// Claim outlived the liveness timeout.
    Reclaim,
}

impl DlqSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqSource::Nack => "nack",
            DlqSource::Reclaim => "reclaim",
        }
    }
}

impl FromStr for DlqSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nack" => Ok(DlqSource::Nack),
            "reclaim" => Ok(DlqSource::Reclaim),
            _ => Err(UnknownVariant { kind: "dlq source", value: s.into() }),
        }
    }
}

impl fmt::Display for DlqSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    #[serde(flatten)]
    pub entry: QueueEntry,
    /// Machine-readable bucket operators filter replays by, e.g. `EXECUTION_ERROR`.
    pub reason: String,
    pub source: DlqSource,
    /// Unix milliseconds.
    pub failed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
