pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod polymarket;
pub mod proxy;
pub mod queue;
pub mod services;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::db::IntentStore;
use crate::ingestion::ListenerState;
use crate::queue::JobQueue;

#[derive(Clone)]
pub struct AppState {
    /// `None` when running on in-memory stores.
    pub db: Option<sqlx::PgPool>,
    pub config: AppConfig,
    pub queue: JobQueue,
    pub intents: Arc<dyn IntentStore>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    pub pause_flag: Arc<AtomicBool>,
    pub listener_state: Option<watch::Receiver<ListenerState>>,
}
