//! Transports that deliver `OrderFilled` logs to the settlement listener.
//!
//! `ws://` and `wss://` endpoints get a push subscription; anything else is polled with
//! `eth_blockNumber` + `eth_getLogs`. Decode logic never sees which one is in use.

use std::time::Duration;

use alloy::primitives::{Address, B256, U64};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::chain::abi::{EXCHANGE_CONTRACTS, ORDER_FILLED_TOPIC};
use crate::chain::RawLog;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A socket that stays silent this long is treated as dead.
pub const READ_TIMEOUT: Duration = Duration::from_secs(90);

/// Widest block range replayed after a reconnect. Older gaps are skipped with a warning.
pub const MAX_BACKFILL_BLOCKS: u64 = 2_000;

const SUBSCRIBE_ID: u64 = 1;
const BACKFILL_ID: u64 = 2;

#[derive(Debug, Error)]
pub enum LogSourceError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,

    #[error("no frame received for {0:?}")]
    Stalled(Duration),

    #[error("not connected")]
    NotConnected,
}

/// Contracts and topic-0 values to subscribe to.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topic0: Vec<B256>,
}

impl LogFilter {
    pub fn order_filled() -> Self {
        Self {
            addresses: EXCHANGE_CONTRACTS.to_vec(),
            topic0: vec![ORDER_FILLED_TOPIC],
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "address": self.addresses,
            "topics": [self.topic0],
        })
    }

    fn with_range(&self, from: u64, to: u64) -> Value {
        let mut filter = self.to_json();
        filter["fromBlock"] = json!(format!("{from:#x}"));
        filter["toBlock"] = json!(format!("{to:#x}"));
        filter
    }

    fn since(&self, from: u64) -> Value {
        let mut filter = self.to_json();
        filter["fromBlock"] = json!(format!("{from:#x}"));
        filter["toBlock"] = json!("latest");
        filter
    }
}

#[async_trait]
pub trait LogSource: Send {
    fn kind(&self) -> &'static str;

    /// Open the transport. When `resume_from` is set, logs from that block onward
    /// are replayed before (or alongside) live ones; duplicates are expected.
    async fn connect(&mut self, filter: &LogFilter, resume_from: Option<u64>) -> Result<(), LogSourceError>;

    /// Wait for the next group of logs. An error means the connection is gone.
    async fn next_batch(&mut self) -> Result<Vec<RawLog>, LogSourceError>;

    /// First block a replacement connection must replay from so nothing is missed.
    fn resume_point(&self) -> Option<u64>;
}

/// Pick the transport by URL scheme.
pub fn log_source_for(url: &str) -> Box<dyn LogSource> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Box::new(StreamingLogSource::new(url))
    } else {
        Box::new(PollingLogSource::new(url, POLL_INTERVAL))
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC framing shared with the mempool watcher
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

/// Build an `eth_subscribe` request.
pub(crate) fn subscribe_request(id: u64, params: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "eth_subscribe",
        "params": params,
    })
    .to_string()
}

/// One parsed frame from an `eth_subscribe` socket.
#[derive(Debug)]
pub(crate) enum Frame {
    /// `{"id":..,"result":"0x.."}`
    Subscribed(String),
    /// `{"id":..,"result":[..]}` answering a plain request on the socket.
    Response { id: u64, result: Value },
    /// `{"id":..,"error":{..}}`
    Rejected { id: Option<u64>, error: LogSourceError },
    /// `{"method":"eth_subscription","params":{"result":..}}`
    Notification(Value),
    Other,
}

pub(crate) fn parse_frame(text: &str) -> Result<Frame, serde_json::Error> {
    let mut msg: Value = serde_json::from_str(text)?;
    let id = msg.get("id").and_then(Value::as_u64);

    if let Some(err) = msg.get("error") {
        let body: RpcErrorBody = serde_json::from_value(err.clone())?;
        return Ok(Frame::Rejected {
            id,
            error: LogSourceError::Rpc {
                code: body.code,
                message: body.message,
            },
        });
    }

    if let Some(id) = id {
        match msg.get_mut("result") {
            Some(Value::String(sub)) => return Ok(Frame::Subscribed(std::mem::take(sub))),
            Some(result) if !result.is_null() => {
                return Ok(Frame::Response {
                    id,
                    result: result.take(),
                })
            }
            _ => {}
        }
    }

    match msg.get_mut("params").and_then(|p| p.get_mut("result")) {
        Some(result) => Ok(Frame::Notification(result.take())),
        None => Ok(Frame::Other),
    }
}

// ---------------------------------------------------------------------------
// WebSocket subscription
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct StreamingLogSource {
    url: String,
    read_timeout: Duration,
    ws: Option<WsStream>,
    /// Set while an `eth_getLogs` replay is outstanding on the socket.
    backfill_from: Option<u64>,
    highest_block: Option<u64>,
}

impl StreamingLogSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read_timeout: READ_TIMEOUT,
            ws: None,
            backfill_from: None,
            highest_block: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn observe(&mut self, logs: &[RawLog]) {
        let top = logs.iter().filter_map(|l| l.block_number).map(|b| b.to::<u64>()).max();
        if top > self.highest_block {
            self.highest_block = top;
        }
    }

    fn drop_socket<T>(&mut self, err: LogSourceError) -> Result<T, LogSourceError> {
        self.ws = None;
        Err(err)
    }
}

#[async_trait]
impl LogSource for StreamingLogSource {
    fn kind(&self) -> &'static str {
        "ws"
    }

    async fn connect(&mut self, filter: &LogFilter, resume_from: Option<u64>) -> Result<(), LogSourceError> {
        let (mut ws, _response) = connect_async(&self.url).await?;
        let request = subscribe_request(SUBSCRIBE_ID, json!(["logs", filter.to_json()]));
        ws.send(Message::Text(request.into())).await?;

        // Subscribe first so the replay overlaps live delivery instead of leaving a hole.
        if let Some(from) = resume_from {
            let request = json!({
                "jsonrpc": "2.0",
                "id": BACKFILL_ID,
                "method": "eth_getLogs",
                "params": [filter.since(from)],
            });
            ws.send(Message::Text(request.to_string().into())).await?;
            tracing::info!(from_block = from, "Requested log backfill");
        }

        self.ws = Some(ws);
        self.backfill_from = resume_from;
        self.highest_block = resume_from;
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<Vec<RawLog>, LogSourceError> {
        loop {
            let ws = self.ws.as_mut().ok_or(LogSourceError::NotConnected)?;
            let msg = match tokio::time::timeout(self.read_timeout, ws.next()).await {
                Ok(msg) => msg,
                Err(_) => return self.drop_socket(LogSourceError::Stalled(self.read_timeout)),
            };

            match msg {
                Some(Ok(Message::Text(text))) => match parse_frame(text.as_ref()) {
                    Ok(Frame::Notification(value)) => match serde_json::from_value::<RawLog>(value) {
                        Ok(log) => {
                            let batch = vec![log];
                            self.observe(&batch);
                            return Ok(batch);
                        }
                        Err(e) => tracing::debug!(error = %e, "Undecodable log notification"),
                    },
                    Ok(Frame::Response { id: BACKFILL_ID, result }) => {
                        let from = self.backfill_from.take();
                        let logs: Vec<RawLog> = serde_json::from_value(result)?;
                        counter!("listener_backfill_logs_total", "transport" => "ws").increment(logs.len() as u64);
                        tracing::info!(from_block = ?from, logs = logs.len(), "Log backfill received");
                        self.observe(&logs);
                        if !logs.is_empty() {
                            return Ok(logs);
                        }
                    }
                    Ok(Frame::Rejected { id: Some(BACKFILL_ID), error }) => {
                        tracing::warn!(from_block = ?self.backfill_from, error = %error, "Log backfill rejected; gap not replayed");
                        self.backfill_from = None;
                    }
                    Ok(Frame::Rejected { error, .. }) => return self.drop_socket(error),
                    Ok(Frame::Subscribed(id)) => tracing::debug!(subscription = %id, "Log subscription confirmed"),
                    Ok(Frame::Response { .. }) | Ok(Frame::Other) => {}
                    Err(e) => tracing::debug!(error = %e, "Non-JSON frame on log socket"),
                },
                Some(Ok(Message::Ping(data))) => ws.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => return self.drop_socket(LogSourceError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return self.drop_socket(e.into()),
            }
        }
    }

    fn resume_point(&self) -> Option<u64> {
        // Live logs past the gap do not move the cursor until the replay has landed.
        self.backfill_from.or(self.highest_block)
    }
}

// ---------------------------------------------------------------------------
// HTTP polling
// ---------------------------------------------------------------------------

pub struct PollingLogSource {
    url: String,
    http: reqwest::Client,
    interval: Duration,
    filter: Option<LogFilter>,
    last_block: u64,
    /// Head at connect time while a replay is still being read.
    backfill_until: Option<u64>,
}

/// Last block a polling source treats as read, given the head and the first block
/// still owed by a previous connection.
pub(crate) fn polling_start(head: u64, resume_from: Option<u64>) -> u64 {
    match resume_from {
        Some(from) if from <= head => {
            let floor = head.saturating_sub(MAX_BACKFILL_BLOCKS - 1);
            if from < floor {
                tracing::warn!(from_block = from, floor, "Backfill gap too wide; skipping oldest blocks");
            }
            from.max(floor).saturating_sub(1)
        }
        _ => head,
    }
}

impl PollingLogSource {
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            interval,
            filter: None,
            last_block: 0,
            backfill_until: None,
        }
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LogSourceError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let resp: RpcResponse<T> = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = resp.error {
            return Err(LogSourceError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        resp.result.ok_or_else(|| LogSourceError::Rpc {
            code: 0,
            message: format!("{method} returned no result"),
        })
    }

    async fn block_number(&self) -> Result<u64, LogSourceError> {
        let n: U64 = self.rpc("eth_blockNumber", json!([])).await?;
        Ok(n.to::<u64>())
    }
}

#[async_trait]
impl LogSource for PollingLogSource {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn connect(&mut self, filter: &LogFilter, resume_from: Option<u64>) -> Result<(), LogSourceError> {
        let head = self.block_number().await?;
        self.last_block = polling_start(head, resume_from);
        self.backfill_until = (self.last_block < head).then_some(head);
        self.filter = Some(filter.clone());
        if let Some(until) = self.backfill_until {
            counter!("listener_backfill_blocks_total", "transport" => "http").increment(until - self.last_block);
        }
        tracing::debug!(from_block = self.last_block + 1, head, "Polling log source positioned");
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<Vec<RawLog>, LogSourceError> {
        let filter = self.filter.clone().ok_or(LogSourceError::NotConnected)?;

        loop {
            tokio::time::sleep(self.interval).await;

            let latest = self.block_number().await?;
            if latest <= self.last_block {
                continue;
            }

            let logs: Vec<RawLog> = self
                .rpc("eth_getLogs", json!([filter.with_range(self.last_block + 1, latest)]))
                .await?;
            self.last_block = latest;

            if let Some(until) = self.backfill_until {
                let replayed = logs
                    .iter()
                    .filter(|l| l.block_number.is_some_and(|b| b.to::<u64>() <= until))
                    .count();
                counter!("listener_backfill_logs_total", "transport" => "http").increment(replayed as u64);
                if latest >= until {
                    self.backfill_until = None;
                }
            }

            if !logs.is_empty() {
                return Ok(logs);
            }
        }
    }

    fn resume_point(&self) -> Option<u64> {
        self.filter.as_ref().map(|_| self.last_block + 1)
    }
}
