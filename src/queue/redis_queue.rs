use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use serde::Deserialize;

use crate::models::{DlqEntry, QueueEntry};

use super::{InFlight, QueueBackend, QueueError, QueueStats, Requeue};

pub const DEFAULT_PREFIX: &str = "copytrading:supervisor:";

// KEYS: pending, in-flight, delayed. ARGV: raw entry, max.
const PUSH_PENDING: &str = r#"
local occupancy = redis.call('LLEN', KEYS[1]) + redis.call('HLEN', KEYS[2]) + redis.call('ZCARD', KEYS[3])
if occupancy >= tonumber(ARGV[2]) then
    return 0
end
redis.call('RPUSH', KEYS[1], ARGV[1])
return 1
"#;

// KEYS: pending, processing, in-flight. ARGV: now ms.
const CLAIM: &str = r#"
local raw = redis.call('LPOP', KEYS[1])
if not raw then
    return false
end
local entry = cjson.decode(raw)
redis.call('RPUSH', KEYS[2], raw)
redis.call('HSET', KEYS[3], entry.token, cjson.encode({claimedAt = tonumber(ARGV[1]), raw = raw}))
return raw
"#;

// KEYS: in-flight, processing. ARGV: token.
const COMPLETE: &str = r#"
local record = redis.call('HGET', KEYS[1], ARGV[1])
if not record then
    return 0
end
redis.call('LREM', KEYS[2], 1, cjson.decode(record).raw)
redis.call('HDEL', KEYS[1], ARGV[1])
return 1
"#;

// KEYS: in-flight, processing, destination. ARGV: token, new raw, score (zset only).
// The destination is a zset when a score is given, otherwise a list.
const MOVE_IN_FLIGHT: &str = r#"
local record = redis.call('HGET', KEYS[1], ARGV[1])
if not record then
    return 0
end
redis.call('LREM', KEYS[2], 1, cjson.decode(record).raw)
redis.call('HDEL', KEYS[1], ARGV[1])
if ARGV[3] then
    redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
else
    redis.call('RPUSH', KEYS[3], ARGV[2])
end
return 1
"#;

// KEYS: delayed, pending. ARGV: now ms, limit.
const PROMOTE_DUE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, raw in ipairs(due) do
    redis.call('ZREM', KEYS[1], raw)
    redis.call('RPUSH', KEYS[2], raw)
end
return #due
"#;

// KEYS: pending, in-flight, delayed, dlq. ARGV: dlq row, new raw, max.
// 1 requeued, 0 row gone, -1 over capacity.
const DLQ_REQUEUE: &str = r#"
local occupancy = redis.call('LLEN', KEYS[1]) + redis.call('HLEN', KEYS[2]) + redis.call('ZCARD', KEYS[3])
if occupancy >= tonumber(ARGV[3]) then
    return -1
end
if redis.call('LREM', KEYS[4], 1, ARGV[1]) == 0 then
    return 0
end
redis.call('RPUSH', KEYS[1], ARGV[2])
return 1
"#;

// KEYS: dlq. ARGV: n.
const DLQ_TRIM: &str = r#"
local size = redis.call('LLEN', KEYS[1])
local n = math.min(size, tonumber(ARGV[1]))
if n <= 0 then
    return 0
end
if n >= size then
    redis.call('DEL', KEYS[1])
else
    redis.call('LTRIM', KEYS[1], n, -1)
end
return n
"#;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimRecord {
    claimed_at: i64,
    raw: String,
}

impl ClaimRecord {
    fn into_in_flight(self) -> Result<InFlight, QueueError> {
        Ok(InFlight {
            entry: serde_json::from_str(&self.raw)?,
            claimed_at: self.claimed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueueKeys {
    pub pending: String,
    pub processing: String,
    pub in_flight: String,
    pub delayed: String,
    pub dlq: String,
}

impl QueueKeys {
    pub fn new(prefix: &str) -> Self {
        let base = format!("{prefix}queue");
        Self {
            processing: format!("{base}:processing"),
            in_flight: format!("{base}:inflight"),
            delayed: format!("{base}:delayed"),
            dlq: format!("{base}:dlq"),
            pending: base,
        }
    }
}

/// Redis-backed queue. Every move between partitions runs as one Lua script.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    keys: QueueKeys,
    push_pending: Script,
    claim: Script,
    complete: Script,
    move_in_flight: Script,
    promote_due: Script,
    dlq_requeue: Script,
    dlq_trim: Script,
}

impl RedisQueue {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(prefix, "Connected to Redis queue");
        Ok(Self::with_connection(conn, prefix))
    }

    pub fn with_connection(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            keys: QueueKeys::new(prefix),
            push_pending: Script::new(PUSH_PENDING),
            claim: Script::new(CLAIM),
            complete: Script::new(COMPLETE),
            move_in_flight: Script::new(MOVE_IN_FLIGHT),
            promote_due: Script::new(PROMOTE_DUE),
            dlq_requeue: Script::new(DLQ_REQUEUE),
            dlq_trim: Script::new(DLQ_TRIM),
        }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Delete every partition. Tests only ever point this at a scratch prefix.
    pub async fn reset(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let k = &self.keys;
        let _: () = redis::cmd("DEL")
            .arg(&k.pending)
            .arg(&k.processing)
            .arg(&k.in_flight)
            .arg(&k.delayed)
            .arg(&k.dlq)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn push_pending(&self, entry: &QueueEntry, max: usize) -> Result<bool, QueueError> {
        let raw = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();
        let pushed: i64 = self
            .push_pending
            .key(&self.keys.pending)
            .key(&self.keys.in_flight)
            .key(&self.keys.delayed)
            .arg(raw)
            .arg(max)
            .invoke_async(&mut conn)
            .await?;
        Ok(pushed == 1)
    }

    async fn claim(&self, now_ms: i64) -> Result<Option<QueueEntry>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .claim
            .key(&self.keys.pending)
            .key(&self.keys.processing)
            .key(&self.keys.in_flight)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn in_flight_entry(&self, token: &str) -> Result<Option<InFlight>, QueueError> {
        let mut conn = self.conn.clone();
        let record: Option<String> = redis::cmd("HGET")
            .arg(&self.keys.in_flight)
            .arg(token)
            .query_async(&mut conn)
            .await?;
        match record {
            Some(raw) => Ok(Some(serde_json::from_str::<ClaimRecord>(&raw)?.into_in_flight()?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, token: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .complete
            .key(&self.keys.in_flight)
            .key(&self.keys.processing)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn retry_later(&self, token: &str, entry: &QueueEntry, ready_at_ms: i64) -> Result<bool, QueueError> {
        let raw = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .move_in_flight
            .key(&self.keys.in_flight)
            .key(&self.keys.processing)
            .key(&self.keys.delayed)
            .arg(token)
            .arg(raw)
            .arg(ready_at_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved == 1)
    }

    async fn dead_letter(&self, token: &str, dlq: &DlqEntry) -> Result<bool, QueueError> {
        let raw = serde_json::to_string(dlq)?;
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .move_in_flight
            .key(&self.keys.in_flight)
            .key(&self.keys.processing)
            .key(&self.keys.dlq)
            .arg(token)
            .arg(raw)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved == 1)
    }

    async fn promote_due(&self, now_ms: i64, limit: usize) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let moved: usize = self
            .promote_due
            .key(&self.keys.delayed)
            .key(&self.keys.pending)
            .arg(now_ms)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn in_flight(&self) -> Result<Vec<InFlight>, QueueError> {
        let mut conn = self.conn.clone();
        let records: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&self.keys.in_flight)
            .query_async(&mut conn)
            .await?;

        let mut claimed = Vec::with_capacity(records.len());
        for (token, raw) in records {
            match serde_json::from_str::<ClaimRecord>(&raw).map_err(QueueError::from).and_then(ClaimRecord::into_in_flight) {
                Ok(entry) => claimed.push(entry),
                Err(e) => tracing::warn!(token = %token, error = %e, "Skipping unreadable in-flight record"),
            }
        }
        Ok(claimed)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn.clone();
        let k = &self.keys;
        let (pending, processing, in_flight, delayed, dlq): (usize, usize, usize, usize, usize) = redis::pipe()
            .cmd("LLEN")
            .arg(&k.pending)
            .cmd("LLEN")
            .arg(&k.processing)
            .cmd("HLEN")
            .arg(&k.in_flight)
            .cmd("ZCARD")
            .arg(&k.delayed)
            .cmd("LLEN")
            .arg(&k.dlq)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            pending,
            processing,
            in_flight,
            delayed,
            dlq,
            max_size: 0,
        })
    }

    async fn dlq_range(&self, offset: usize, limit: usize) -> Result<Vec<String>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let rows: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.keys.dlq)
            .arg(offset)
            .arg(offset + limit - 1)
            .query_async(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn dlq_requeue(&self, raw: &str, entry: &QueueEntry, max: usize) -> Result<Requeue, QueueError> {
        let new_raw = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();
        let k = &self.keys;
        let result: i64 = self
            .dlq_requeue
            .key(&k.pending)
            .key(&k.in_flight)
            .key(&k.delayed)
            .key(&k.dlq)
            .arg(raw)
            .arg(new_raw)
            .arg(max)
            .invoke_async(&mut conn)
            .await?;
        Ok(match result {
            1 => Requeue::Requeued,
            -1 => Requeue::CapacityBlocked,
            _ => Requeue::Missing,
        })
    }

    async fn dlq_trim_oldest(&self, n: usize) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let removed: usize = self.dlq_trim.key(&self.keys.dlq).arg(n).invoke_async(&mut conn).await?;
        Ok(removed)
    }
}
