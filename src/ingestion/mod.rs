pub mod dedup;
pub mod log_source;
pub mod mempool;
pub mod pipeline;
pub mod price_cache;
pub mod settlement_listener;
pub mod traders;

pub use mempool::{MempoolProvider, MempoolWatcher};
pub use pipeline::{PipelineReport, PipelineSettings, SignalPipeline};
pub use price_cache::PriceCache;
pub use settlement_listener::{ListenerState, SettlementListener};
pub use traders::MonitoredTraders;

use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::TradeSignal;

/// Hand a signal to the pipeline without waiting. Listener read loops must never
/// block on downstream work, so a full channel drops the signal.
pub(crate) fn emit_signal(tx: &mpsc::Sender<TradeSignal>, signal: TradeSignal, listener: &'static str) -> bool {
    match tx.try_send(signal) {
        Ok(()) => {
            counter!("signals_emitted_total", "listener" => listener).increment(1);
            true
        }
        Err(TrySendError::Full(signal)) => {
            counter!("signals_dropped_total", "listener" => listener).increment(1);
            tracing::warn!(
                listener,
                trader = %signal.trader_address,
                tx_hash = ?signal.tx_hash,
                "Signal channel full, dropping signal"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::warn!(listener, "Signal channel closed");
            false
        }
    }
}
