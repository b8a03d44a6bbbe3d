use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::Address;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::chain::abi::CONDITIONAL_TOKENS;
use crate::chain::decoder::decode_pending_tx;
use crate::chain::PendingTx;
use crate::models::TradeSignal;
use crate::queue::now_ms;

use super::emit_signal;
use super::log_source::{parse_frame, subscribe_request, Frame, LogSourceError};
use super::traders::{MonitoredTraders, TraderSet};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// The pending feed is never quiet this long on a healthy socket.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Which pending-transaction subscription the node speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MempoolProvider {
    /// `alchemy_pendingTransactions`, filtered server-side by `toAddress`.
    Alchemy,
    /// `newPendingTransactions` with full transaction objects.
    Standard,
}

impl MempoolProvider {
    pub fn subscription_params(&self, ctf: Address) -> Value {
        match self {
            MempoolProvider::Alchemy => json!([
                "alchemy_pendingTransactions",
                { "toAddress": [ctf], "hashesOnly": false }
            ]),
            MempoolProvider::Standard => json!(["newPendingTransactions", true]),
        }
    }
}

impl FromStr for MempoolProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alchemy" => Ok(MempoolProvider::Alchemy),
            "standard" => Ok(MempoolProvider::Standard),
            other => Err(format!("unknown mempool provider: {other}")),
        }
    }
}

/// Decode one socket frame into signals for monitored traders.
///
/// Anything that is not a pending CTF transfer yields nothing; decode failures are
/// logged at debug and swallowed. A rejected subscription is an error: the socket
/// will never deliver anything and must be replaced.
pub fn handle_frame(
    text: &str,
    ctf: Address,
    monitored: &HashSet<Address>,
    now_ms: i64,
) -> Result<Vec<TradeSignal>, LogSourceError> {
    let value = match parse_frame(text) {
        Ok(Frame::Notification(value)) => value,
        Ok(Frame::Subscribed(id)) => {
            tracing::info!(subscription = %id, "Mempool subscription confirmed");
            return Ok(Vec::new());
        }
        Ok(Frame::Rejected { error, .. }) => return Err(error),
        Ok(Frame::Response { .. }) | Ok(Frame::Other) => return Ok(Vec::new()),
        Err(e) => {
            tracing::debug!(error = %e, "Non-JSON mempool frame");
            return Ok(Vec::new());
        }
    };

    let tx: PendingTx = match serde_json::from_value(value) {
        Ok(tx) => tx,
        Err(e) => {
            tracing::debug!(error = %e, "Pending tx payload not decodable");
            return Ok(Vec::new());
        }
    };

    match decode_pending_tx(&tx, ctf, monitored, now_ms) {
        Ok(signals) => Ok(signals),
        Err(e) => {
            tracing::debug!(tx_hash = %tx.hash, error = %e, "Skipping pending CTF call");
            Ok(Vec::new())
        }
    }
}

/// Pre-confirmation signals from a pending-transaction subscription.
pub struct MempoolWatcher {
    ws_url: String,
    provider: MempoolProvider,
    ctf: Address,
    reconnect_delay: Duration,
    read_timeout: Duration,
    /// Starts empty so updates made before `start` are kept.
    traders: Mutex<MonitoredTraders>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MempoolWatcher {
    pub fn new(ws_url: impl Into<String>, provider: MempoolProvider) -> Self {
        Self {
            ws_url: ws_url.into(),
            provider,
            ctf: CONDITIONAL_TOKENS,
            reconnect_delay: RECONNECT_DELAY,
            read_timeout: READ_TIMEOUT,
            traders: Mutex::new(MonitoredTraders::new(HashSet::new())),
            running: Mutex::new(None),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Start watching `monitored`, replacing any set published before.
    pub fn start(&self, monitored: HashSet<Address>, tx: mpsc::Sender<TradeSignal>) {
        let traders = self.traders.lock().unwrap_or_else(|p| p.into_inner()).clone();
        traders.replace(monitored);
        self.start_with(traders, tx);
    }

    /// Start with a set shared with the caller; updates through either handle apply.
    pub fn start_with(&self, traders: MonitoredTraders, tx: mpsc::Sender<TradeSignal>) {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            tracing::warn!("Mempool watcher already running");
            return;
        }

        *self.traders.lock().unwrap_or_else(|p| p.into_inner()) = traders.clone();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_watcher(
            self.ws_url.clone(),
            self.provider,
            self.ctf,
            self.reconnect_delay,
            self.read_timeout,
            traders,
            tx,
            cancel.clone(),
        ));
        *running = Some((cancel, handle));
    }

    /// Swap the monitored set. Takes effect from the next frame, or from the first
    /// one when called before `start_with`.
    pub fn update_monitored_traders(&self, set: HashSet<Address>) {
        self.traders.lock().unwrap_or_else(|p| p.into_inner()).replace(set);
    }

    pub fn monitored_traders(&self) -> TraderSet {
        self.traders.lock().unwrap_or_else(|p| p.into_inner()).snapshot()
    }

    pub fn stop(&self) {
        if let Some((cancel, _handle)) = self.running.lock().unwrap_or_else(|p| p.into_inner()).take() {
            cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }
}

impl Drop for MempoolWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_watcher(
    ws_url: String,
    provider: MempoolProvider,
    ctf: Address,
    reconnect_delay: Duration,
    read_timeout: Duration,
    traders: MonitoredTraders,
    tx: mpsc::Sender<TradeSignal>,
    cancel: CancellationToken,
) {
    loop {
        tracing::info!(url = %ws_url, provider = ?provider, "Mempool watcher connecting...");

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            r = connect_async(&ws_url) => r,
        };

        match connected {
            Ok((ws_stream, _response)) => {
                let (mut write, mut read) = ws_stream.split();

                let request = subscribe_request(1, provider.subscription_params(ctf));
                if let Err(e) = write.send(Message::Text(request.into())).await {
                    tracing::warn!(error = %e, "Failed to send mempool subscription");
                } else {
                    tracing::info!(trader_count = traders.len(), "Mempool watcher subscribed");

                    loop {
                        let msg = tokio::select! {
                            _ = cancel.cancelled() => break,
                            m = tokio::time::timeout(read_timeout, read.next()) => m,
                        };
                        let Ok(msg) = msg else {
                            counter!("listener_read_timeouts_total", "listener" => "mempool").increment(1);
                            tracing::warn!(timeout_secs = read_timeout.as_secs(), "Mempool watcher: socket went silent");
                            break;
                        };
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let monitored = traders.snapshot();
                                let signals = match handle_frame(text.as_ref(), ctf, &monitored, now_ms()) {
                                    Ok(signals) => signals,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "Mempool subscription rejected");
                                        break;
                                    }
                                };
                                for signal in signals {
                                    tracing::info!(
                                        trader = %signal.trader_address,
                                        side = %signal.side,
                                        shares = %signal.size_shares,
                                        tx_hash = ?signal.tx_hash,
                                        "Pending leader transfer detected"
                                    );
                                    emit_signal(&tx, signal, "mempool");
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = write.send(Message::Pong(data)).await {
                                    tracing::warn!(error = %e, "Failed to send pong");
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                tracing::warn!("Mempool watcher: server sent close frame");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "Mempool watcher: WS read error");
                                break;
                            }
                            None => {
                                tracing::warn!("Mempool watcher: WS stream ended");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Mempool watcher: connection failed"),
        }

        if cancel.is_cancelled() {
            break;
        }
        counter!("listener_reconnects_total", "listener" => "mempool").increment(1);
        tracing::info!(delay_secs = reconnect_delay.as_secs(), "Mempool watcher reconnecting...");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    tracing::info!("Mempool watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use alloy::primitives::{Bytes, U256};
    use alloy::sol_types::SolCall;
    use rust_decimal::Decimal;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;
    use crate::chain::abi::IConditionalTokens;
    use crate::models::{Side, SignalSource};

    fn pending_frame(from: Address, to: Address, amount: u64) -> String {
        let input = IConditionalTokens::safeTransferFromCall {
            from,
            to,
            id: U256::from(42u64),
            value: U256::from(amount),
            data: Bytes::new(),
        }
        .abi_encode();

        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0x1",
                "result": {
                    "hash": format!("0x{}", "ab".repeat(32)),
                    "from": from,
                    "to": CONDITIONAL_TOKENS,
                    "input": Bytes::from(input),
                    "maxFeePerGas": "0x3b9aca00",
                    "maxPriorityFeePerGas": "0x77359400"
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_provider_parsing_and_params() {
        assert_eq!("Alchemy".parse::<MempoolProvider>(), Ok(MempoolProvider::Alchemy));
        assert!("geth".parse::<MempoolProvider>().is_err());

        let params = MempoolProvider::Alchemy.subscription_params(CONDITIONAL_TOKENS);
        assert_eq!(params[0], "alchemy_pendingTransactions");
        assert_eq!(params[1]["hashesOnly"], false);

        let params = MempoolProvider::Standard.subscription_params(CONDITIONAL_TOKENS);
        assert_eq!(params, json!(["newPendingTransactions", true]));
    }

    #[test]
    fn test_incoming_transfer_is_buy_by_receiver() {
        let leader = Address::repeat_byte(0x11);
        let frame = pending_frame(Address::repeat_byte(0x99), leader, 25_000_000);

        let signals = handle_frame(&frame, CONDITIONAL_TOKENS, &HashSet::from([leader]), 7).unwrap();
        assert_eq!(signals.len(), 1);
        let s = &signals[0];
        assert_eq!(s.source, SignalSource::Mempool);
        assert_eq!(s.trader_address, leader);
        assert_eq!(s.side, Side::Buy);
        assert_eq!(s.size_shares, Decimal::from(25));
        assert_eq!(s.unit_price, None);
        assert!(!s.confirmed);
        assert!(s.gas.is_some());
    }

    #[test]
    fn test_outgoing_transfer_is_sell_by_sender() {
        let leader = Address::repeat_byte(0x11);
        let frame = pending_frame(leader, Address::repeat_byte(0x99), 1_000_000);

        let signals = handle_frame(&frame, CONDITIONAL_TOKENS, &HashSet::from([leader]), 7).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Sell);
    }

    #[test]
    fn test_unmonitored_and_garbage_frames_yield_nothing() {
        let frame = pending_frame(Address::repeat_byte(1), Address::repeat_byte(2), 1_000_000);
        let nothing = |text: &str, monitored: &HashSet<Address>| {
            handle_frame(text, CONDITIONAL_TOKENS, monitored, 0).unwrap().is_empty()
        };
        assert!(nothing(&frame, &HashSet::from([Address::repeat_byte(3)])));
        assert!(nothing("{not json", &HashSet::new()));
        assert!(nothing(r#"{"jsonrpc":"2.0","id":1,"result":"0x9"}"#, &HashSet::new()));
    }

    #[test]
    fn test_rejected_subscription_is_an_error() {
        let frame = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#;
        let err = handle_frame(frame, CONDITIONAL_TOKENS, &HashSet::new(), 0).unwrap_err();
        assert!(matches!(err, LogSourceError::Rpc { code: -32601, .. }));
    }

    #[test]
    fn test_update_before_start_is_kept() {
        let leader = Address::repeat_byte(1);
        let watcher = MempoolWatcher::new("ws://127.0.0.1:1", MempoolProvider::Standard);
        watcher.update_monitored_traders(HashSet::from([leader]));

        assert!(!watcher.is_running());
        assert!(watcher.monitored_traders().contains(&leader));
    }

    /// Loopback server that rejects every subscription and counts connections.
    async fn rejecting_server(connections: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    let _ = ws.next().await;
                    let reply = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad params"}}"#;
                    let _ = ws.send(Message::Text(reply.to_string().into())).await;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                });
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_rejected_subscription_reconnects() {
        let connections = Arc::new(AtomicUsize::new(0));
        let url = rejecting_server(connections.clone()).await;
        let watcher = MempoolWatcher::new(url, MempoolProvider::Standard).with_reconnect_delay(Duration::from_millis(20));
        let (tx, _rx) = mpsc::channel(4);

        watcher.start(HashSet::new(), tx);
        tokio::time::sleep(Duration::from_millis(300)).await;
        watcher.stop();

        assert!(connections.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_silent_socket_reconnects() {
        let connections = Arc::new(AtomicUsize::new(0));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counter = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while ws.next().await.is_some() {}
                });
            }
        });

        let watcher = MempoolWatcher::new(format!("ws://{addr}"), MempoolProvider::Standard)
            .with_reconnect_delay(Duration::from_millis(20))
            .with_read_timeout(Duration::from_millis(50));
        let (tx, _rx) = mpsc::channel(4);

        watcher.start(HashSet::new(), tx);
        tokio::time::sleep(Duration::from_millis(400)).await;
        watcher.stop();

        assert!(connections.load(Ordering::SeqCst) >= 2);
    }
}
