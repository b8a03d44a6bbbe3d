use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ingestion::MempoolProvider;
use crate::polymarket::clob_client::CLOB_API_BASE;
use crate::polymarket::gamma_client::GAMMA_API_BASE;
use crate::queue::redis_queue::DEFAULT_PREFIX;

const DEFAULT_POLYGON_RPC: &str = "https://polygon-rpc.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Bearer token for `/api/*`. Unset disables auth (dev mode).
    pub api_token: Option<String>,

    // Queue. Without a Redis URL the in-process queue is used.
    pub redis_url: Option<String>,
    pub queue_prefix: String,
    pub queue_max_size: usize,
    pub queue_max_attempts: u32,
    pub queue_liveness_timeout_secs: u64,

    // Chain
    pub polygon_rpc_url: String,
    /// `ws(s)://` streams settlement logs, anything else polls.
    pub settlement_rpc_url: String,
    pub mempool_ws_url: Option<String>,
    pub mempool_provider: MempoolProvider,

    // Polymarket
    pub clob_api_url: String,
    pub gamma_api_url: String,

    // Execution
    pub private_key: Option<String>,
    pub dry_run: bool,
    pub worker_count: usize,
    pub execution_timeout_secs: u64,
    pub gas_boost_percent: u64,
    pub pending_ttl_secs: i64,
    pub idempotency_bucket_ms: i64,
    pub signal_channel_capacity: usize,
    pub config_refresh_secs: u64,
    pub sweep_interval_secs: u64,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub notifications_enabled: bool,
}

/// Read `key`, falling back to `default` when unset. A set but unparsable value is an error.
fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let polygon_rpc_url = env::var("POLYGON_RPC_URL").unwrap_or_else(|_| DEFAULT_POLYGON_RPC.into());
        let settlement_rpc_url = optional("POLYGON_WS_URL").unwrap_or_else(|| polygon_rpc_url.clone());

        let mempool_provider = match env::var("MEMPOOL_PROVIDER") {
            Ok(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "MEMPOOL_PROVIDER",
                value: raw,
                reason,
            })?,
            Err(_) => MempoolProvider::Alchemy,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_or("PORT", 8080)?,
            api_token: optional("API_TOKEN"),

            redis_url: optional("REDIS_URL"),
            queue_prefix: env::var("QUEUE_PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.into()),
            queue_max_size: parse_or("QUEUE_MAX_SIZE", 5_000)?,
            queue_max_attempts: parse_or("QUEUE_MAX_ATTEMPTS", 3)?,
            queue_liveness_timeout_secs: parse_or("QUEUE_LIVENESS_TIMEOUT_SECS", 300)?,

            polygon_rpc_url,
            settlement_rpc_url,
            mempool_ws_url: optional("MEMPOOL_WS_URL"),
            mempool_provider,

            clob_api_url: env::var("CLOB_API_URL").unwrap_or_else(|_| CLOB_API_BASE.into()),
            gamma_api_url: env::var("GAMMA_API_URL").unwrap_or_else(|_| GAMMA_API_BASE.into()),

            private_key: optional("BOT_PRIVATE_KEY"),
            dry_run: parse_or("DRY_RUN", true)?,
            worker_count: parse_or("WORKER_COUNT", 4)?,
            execution_timeout_secs: parse_or("EXECUTION_TIMEOUT_SECS", 30)?,
            gas_boost_percent: parse_or("GAS_BOOST_PERCENT", 115)?,
            pending_ttl_secs: parse_or("PENDING_TTL_SECS", 600)?,
            idempotency_bucket_ms: parse_or("IDEMPOTENCY_BUCKET_MS", 5_000)?,
            signal_channel_capacity: parse_or("SIGNAL_CHANNEL_CAPACITY", 1_000)?,
            config_refresh_secs: parse_or("CONFIG_REFRESH_SECS", 60)?,
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 15)?,

            telegram_bot_token: optional("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: optional("TELEGRAM_CHAT_ID"),
            notifications_enabled: parse_or("NOTIFICATIONS_ENABLED", false)?,
        })
    }

    /// Returns true if Telegram is enabled and fully configured.
    pub fn has_telegram(&self) -> bool {
        self.notifications_enabled && self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }

    /// Live execution needs a key and `DRY_RUN=false`.
    pub fn is_live(&self) -> bool {
        !self.dry_run && self.private_key.is_some()
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_liveness_timeout_secs)
    }

    /// A config suitable for tests and tooling that never touch the environment.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/polycopy_test".into(),
            host: "127.0.0.1".into(),
            port: 0,
            api_token: None,
            redis_url: None,
            queue_prefix: DEFAULT_PREFIX.into(),
            queue_max_size: 5_000,
            queue_max_attempts: 3,
            queue_liveness_timeout_secs: 300,
            polygon_rpc_url: DEFAULT_POLYGON_RPC.into(),
            settlement_rpc_url: DEFAULT_POLYGON_RPC.into(),
            mempool_ws_url: None,
            mempool_provider: MempoolProvider::Alchemy,
            clob_api_url: CLOB_API_BASE.into(),
            gamma_api_url: GAMMA_API_BASE.into(),
            private_key: None,
            dry_run: true,
            worker_count: 1,
            execution_timeout_secs: 30,
            gas_boost_percent: 115,
            pending_ttl_secs: 600,
            idempotency_bucket_ms: 5_000,
            signal_channel_capacity: 1_000,
            config_refresh_secs: 60,
            sweep_interval_secs: 15,
            telegram_bot_token: None,
            telegram_chat_id: None,
            notifications_enabled: false,
        }
    }
}
