use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use tokio_util::sync::CancellationToken;

use polycopy::api::router::create_router;
use polycopy::config::AppConfig;
use polycopy::db::{self, ConfigStore, IntentStore, PgConfigStore, PgIntentStore};
use polycopy::execution::{ExecutionService, ExecutionSettings, MarketData, OrderRouter, ProxyGateway};
use polycopy::ingestion::{
    traders, MempoolWatcher, MonitoredTraders, PipelineSettings, PriceCache, SettlementListener, SignalPipeline,
};
use polycopy::models::TradeSignal;
use polycopy::polymarket::{BotWallet, ClobClient, DryRunRouter, GammaClient, PolymarketMarketData, TradingClient};
use polycopy::proxy::AlloyProxyGateway;
use polycopy::queue::{JobQueue, MemoryQueue, QueueBackend, QueueSettings, RedisQueue};
use polycopy::services::{Notifier, Supervisor, Sweeper, WorkerSettings};
use polycopy::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // rustls needs an explicit provider when more than one is linked
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);
    let metrics_handle = polycopy::metrics::init_metrics();

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database connected");

    let configs: Arc<dyn ConfigStore> = Arc::new(PgConfigStore::new(pool.clone()));
    let intents: Arc<dyn IntentStore> = Arc::new(PgIntentStore::new(pool.clone()));

    // --- Queue ---
    let backend: Arc<dyn QueueBackend> = match &config.redis_url {
        Some(url) => {
            tracing::info!(prefix = %config.queue_prefix, "Connecting to Redis queue");
            Arc::new(RedisQueue::connect(url, &config.queue_prefix).await?)
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-process queue (jobs are lost on restart)");
            Arc::new(MemoryQueue::new())
        }
    };
    let queue = JobQueue::new(
        backend,
        QueueSettings {
            max_size: config.queue_max_size,
            max_attempts: config.queue_max_attempts,
            liveness_timeout: config.liveness_timeout(),
            ..QueueSettings::default()
        },
    );

    // --- Execution ---
    let market: Arc<dyn MarketData> = Arc::new(PolymarketMarketData::new(
        ClobClient::new(config.clob_api_url.clone()),
        GammaClient::new(config.gamma_api_url.clone()),
    ));

    let (router, signer): (Arc<dyn OrderRouter>, PrivateKeySigner) = match &config.private_key {
        Some(key) if config.is_live() => {
            let wallet = Arc::new(BotWallet::connect(key, &config.clob_api_url).await?);
            let signer = wallet.signer().clone();
            (Arc::new(TradingClient::new(wallet)), signer)
        }
        Some(key) => {
            tracing::info!("DRY_RUN enabled, orders will be planned but not placed");
            (Arc::new(DryRunRouter), PrivateKeySigner::from_str(key)?)
        }
        None => {
            tracing::warn!("BOT_PRIVATE_KEY not set, executing in dry-run mode with an ephemeral key");
            (Arc::new(DryRunRouter), PrivateKeySigner::random())
        }
    };
    let proxy: Arc<dyn ProxyGateway> = Arc::new(AlloyProxyGateway::connect(&config.polygon_rpc_url, signer)?);
    tracing::info!(bot = %proxy.bot_address(), live = config.is_live(), "Execution gateway ready");

    let executor = Arc::new(ExecutionService::new(
        market.clone(),
        router,
        proxy,
        ExecutionSettings {
            call_timeout: Duration::from_secs(config.execution_timeout_secs),
            gas_boost_percent: config.gas_boost_percent,
            dry_run: !config.is_live(),
        },
    ));

    let notifier = match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat)) if config.has_telegram() => {
            tracing::info!("Telegram notifications enabled");
            Some(Arc::new(Notifier::new(token.clone(), chat.clone())))
        }
        _ => None,
    };

    let cancel = CancellationToken::new();
    let pause_flag = Arc::new(AtomicBool::new(false));

    // --- Workers and housekeeping ---
    let pending_ttl = chrono::Duration::seconds(config.pending_ttl_secs);
    let supervisor = Arc::new(Supervisor::new(
        queue.clone(),
        intents.clone(),
        executor,
        notifier.clone(),
        pause_flag.clone(),
        WorkerSettings {
            workers: config.worker_count,
            pending_ttl,
            ..WorkerSettings::default()
        },
    ));
    let workers = supervisor.spawn_workers(cancel.clone());
    tracing::info!(workers = config.worker_count, "Queue workers spawned");

    let sweeper = Sweeper::new(queue.clone(), intents.clone(), notifier);
    tokio::spawn(sweeper.run(Duration::from_secs(config.sweep_interval_secs), cancel.clone()));

    // --- Ingestion: listeners → pipeline → queue ---
    let (signal_tx, signal_rx) = tokio::sync::mpsc::channel::<TradeSignal>(config.signal_channel_capacity);

    let pipeline = Arc::new(SignalPipeline::new(
        configs.clone(),
        intents.clone(),
        queue.clone(),
        Some(Arc::new(PriceCache::new(market))),
        PipelineSettings {
            pending_ttl,
            idempotency_bucket_ms: config.idempotency_bucket_ms,
            ..PipelineSettings::default()
        },
    ));
    tokio::spawn(pipeline.run(signal_rx, cancel.clone()));

    let monitored = MonitoredTraders::new(traders::load_from_store(configs.as_ref()).await?);
    tracing::info!(trader_count = monitored.len(), "Loaded monitored traders");
    tokio::spawn(traders::run_refresh(
        configs,
        monitored.clone(),
        Duration::from_secs(config.config_refresh_secs),
        cancel.clone(),
    ));

    let settlement = SettlementListener::new(config.settlement_rpc_url.clone());
    settlement.start_with(monitored.clone(), signal_tx.clone());

    let mempool = config.mempool_ws_url.as_ref().map(|url| {
        let watcher = MempoolWatcher::new(url.clone(), config.mempool_provider);
        watcher.start_with(monitored.clone(), signal_tx.clone());
        watcher
    });
    if mempool.is_none() {
        tracing::info!("MEMPOOL_WS_URL not set, mempool watcher disabled");
    }
    drop(signal_tx);

    // --- Ops API ---
    let state = AppState {
        db: Some(pool),
        config,
        queue,
        intents,
        metrics_handle,
        pause_flag,
        listener_state: Some(settlement.subscribe_state()),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    settlement.stop();
    if let Some(watcher) = &mempool {
        watcher.stop();
    }
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Queue worker panicked");
        }
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
