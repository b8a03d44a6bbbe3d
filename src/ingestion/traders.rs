use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use metrics::gauge;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::db::ConfigStore;

pub type TraderSet = Arc<HashSet<Address>>;

/// The leaders currently being copied, shared by both listeners.
///
/// Updates swap the whole set; readers take an `Arc` snapshot per decode so a
/// transaction is never checked against a half-updated set.
#[derive(Clone)]
pub struct MonitoredTraders {
    tx: Arc<watch::Sender<TraderSet>>,
}

impl MonitoredTraders {
    pub fn new(initial: HashSet<Address>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn single(trader: Address) -> Self {
        Self::new(HashSet::from([trader]))
    }

    /// Publish a new set. Returns `false` when it equals the current one.
    pub fn replace(&self, set: HashSet<Address>) -> bool {
        self.tx.send_if_modified(|current| {
            if **current == set {
                return false;
            }
            *current = Arc::new(set);
            true
        })
    }

    pub fn snapshot(&self) -> TraderSet {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TraderSet> {
        self.tx.subscribe()
    }

    pub fn contains(&self, trader: &Address) -> bool {
        self.tx.borrow().contains(trader)
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load the traders referenced by active configs.
pub async fn load_from_store(store: &dyn ConfigStore) -> anyhow::Result<HashSet<Address>> {
    let configs = store.active_configs().await?;
    Ok(configs.into_iter().map(|c| c.trader_address).collect())
}

/// Reload the monitored set from `store` every `interval` until cancelled.
pub async fn run_refresh(
    store: Arc<dyn ConfigStore>,
    traders: MonitoredTraders,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match load_from_store(store.as_ref()).await {
            Ok(set) => {
                let count = set.len();
                if traders.replace(set) {
                    tracing::info!(trader_count = count, "Monitored trader set updated");
                }
                gauge!("monitored_traders").set(count as f64);
            }
            Err(e) => tracing::error!(error = %e, "Failed to refresh monitored traders"),
        }
    }
}
