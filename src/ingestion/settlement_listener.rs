use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, B256};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chain::decoder::decode_order_filled;
use crate::chain::RawLog;
use crate::models::TradeSignal;
use crate::queue::now_ms;

use super::dedup::BoundedDedup;
use super::log_source::{log_source_for, LogFilter, LogSource};
use super::traders::MonitoredTraders;
use super::emit_signal;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Listening,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerState::Disconnected => "disconnected",
            ListenerState::Connecting => "connecting",
            ListenerState::Listening => "listening",
        }
    }
}

pub type SourceFactory = Arc<dyn Fn() -> Box<dyn LogSource> + Send + Sync>;

/// Confirmed `OrderFilled` events for monitored makers.
///
/// One background task owns the connection, the dedupe set and the reconnect timer.
/// `stop()` cancels all three. The block cursor survives reconnects, so a fresh
/// connection replays whatever landed while the old one was down.
pub struct SettlementListener {
    factory: SourceFactory,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<ListenerState>>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SettlementListener {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        let url = rpc_url.into();
        Self::with_source_factory(Arc::new(move || log_source_for(&url)))
    }

    pub fn with_source_factory(factory: SourceFactory) -> Self {
        let (state, _rx) = watch::channel(ListenerState::Disconnected);
        Self {
            factory,
            reconnect_delay: RECONNECT_DELAY,
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Follow a single maker.
    pub fn start(&self, target_maker: Address, tx: mpsc::Sender<TradeSignal>) {
        self.start_with(MonitoredTraders::single(target_maker), tx);
    }

    /// Follow whatever set `targets` holds at the time each log arrives.
    pub fn start_with(&self, targets: MonitoredTraders, tx: mpsc::Sender<TradeSignal>) {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            tracing::warn!("Settlement listener already running");
            return;
        }

        let cancel = CancellationToken::new();
        let task = ListenerTask {
            factory: self.factory.clone(),
            reconnect_delay: self.reconnect_delay,
            state: self.state.clone(),
            targets,
            tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());
        *running = Some((cancel, handle));
    }

    pub fn stop(&self) {
        if let Some((cancel, _handle)) = self.running.lock().unwrap_or_else(|p| p.into_inner()).take() {
            cancel.cancel();
        }
        self.state.send_replace(ListenerState::Disconnected);
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }
}

impl Drop for SettlementListener {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ListenerTask {
    factory: SourceFactory,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<ListenerState>>,
    targets: MonitoredTraders,
    tx: mpsc::Sender<TradeSignal>,
    cancel: CancellationToken,
}

impl ListenerTask {
    async fn run(self) {
        let filter = LogFilter::order_filled();
        let mut seen: BoundedDedup<(B256, u64)> = BoundedDedup::default();
        let mut resume_from: Option<u64> = None;

        loop {
            self.state.send_replace(ListenerState::Connecting);
            let mut source = (self.factory)();
            tracing::info!(transport = source.kind(), resume_from = ?resume_from, "Settlement listener connecting");

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = source.connect(&filter, resume_from) => r,
            };

            match connected {
                Ok(()) => {
                    self.state.send_replace(ListenerState::Listening);
                    tracing::info!(transport = source.kind(), "Settlement listener subscribed to OrderFilled");

                    loop {
                        let batch = tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            b = source.next_batch() => b,
                        };
                        match batch {
                            Ok(logs) => {
                                self.handle_batch(&logs, &mut seen);
                                if let Some(point) = source.resume_point() {
                                    resume_from = Some(point);
                                    gauge!("settlement_listener_resume_block").set(point as f64);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Settlement listener connection lost");
                                break;
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Settlement listener connect failed"),
            }

            if let Some(point) = source.resume_point() {
                resume_from = Some(point);
            }
            drop(source);

            if self.cancel.is_cancelled() {
                break;
            }
            self.state.send_replace(ListenerState::Disconnected);
            counter!("listener_reconnects_total", "listener" => "settlement").increment(1);
            tracing::info!(delay_secs = self.reconnect_delay.as_secs(), "Settlement listener reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.state.send_replace(ListenerState::Disconnected);
        tracing::info!("Settlement listener stopped");
    }

    fn handle_batch(&self, logs: &[RawLog], seen: &mut BoundedDedup<(B256, u64)>) {
        let targets = self.targets.snapshot();
        let now = now_ms();
        for log in logs {
            if let Some(signal) = accept_log(log, &targets, seen, now) {
                tracing::info!(
                    trader = %signal.trader_address,
                    side = %signal.side,
                    shares = %signal.size_shares,
                    tx_hash = ?signal.tx_hash,
                    "Settlement fill detected"
                );
                emit_signal(&self.tx, signal, "settlement");
            }
        }
    }
}

/// Decode one log and decide whether it becomes a signal.
///
/// Removed (reorged) logs, undecodable logs, fills by unmonitored makers and
/// `(tx_hash, log_index)` pairs already seen are all dropped.
pub fn accept_log(
    log: &RawLog,
    targets: &HashSet<Address>,
    seen: &mut BoundedDedup<(B256, u64)>,
    now_ms: i64,
) -> Option<TradeSignal> {
    if log.removed {
        return None;
    }

    let fill = match decode_order_filled(log) {
        Ok(Some(fill)) => fill,
        Ok(None) => return None,
        Err(e) => {
            tracing::debug!(error = %e, tx_hash = ?log.transaction_hash, "Skipping undecodable log");
            return None;
        }
    };

    if !targets.contains(&fill.maker) {
        return None;
    }

    if let Some(id) = log.identity() {
        if !seen.insert(id) {
            tracing::debug!(tx_hash = %id.0, log_index = id.1, "Duplicate fill ignored");
            return None;
        }
    }

    Some(fill.into_signal(now_ms))
}
