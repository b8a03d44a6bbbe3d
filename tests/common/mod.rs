#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use polycopy::chain::abi::{CONDITIONAL_TOKENS, USDC};
use polycopy::execution::{
    BookLevel, ExecutionService, ExecutionSettings, GatewayError, MarketData, MarketResolution, OrderBook,
    OrderFill, OrderRequest, OrderRouter, ProxyGateway,
};
use polycopy::models::{
    CopyIntent, GasHint, IntentStatus, Side, SignalSource, SlippageMode, TradeSignal,
};
use polycopy::proxy::{FeeTier, ProxyAccount};
use polycopy::queue::{JobQueue, MemoryQueue, QueueSettings, RedisQueue};

pub const TOKEN: &str = "71321045679252212594626385532706912750332728571942532289631379312455583992563";

pub fn trader() -> Address {
    Address::repeat_byte(0x11)
}

pub fn proxy_address() -> Address {
    Address::repeat_byte(0x22)
}

pub fn bot_address() -> Address {
    Address::repeat_byte(0x33)
}

/// A unique 32-byte hash.
pub fn random_hash() -> B256 {
    B256::left_padding_from(Uuid::new_v4().as_bytes())
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("decimal literal")
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn chain_signal(side: Side, shares: &str, price: &str) -> TradeSignal {
    TradeSignal {
        source: SignalSource::ChainEvent,
        trader_address: trader(),
        token_id: TOKEN.into(),
        side,
        size_shares: dec(shares),
        unit_price: Some(dec(price)),
        tx_hash: Some(random_hash()),
        log_index: Some(3),
        observed_at_ms: Utc::now().timestamp_millis(),
        confirmed: true,
        gas: None,
    }
}

pub fn mempool_signal(side: Side, shares: &str) -> TradeSignal {
    TradeSignal {
        source: SignalSource::Mempool,
        trader_address: trader(),
        token_id: TOKEN.into(),
        side,
        size_shares: dec(shares),
        unit_price: None,
        tx_hash: Some(random_hash()),
        log_index: None,
        observed_at_ms: Utc::now().timestamp_millis(),
        confirmed: false,
        gas: Some(GasHint {
            max_fee_per_gas: alloy::primitives::U256::from(100u64),
            max_priority_fee_per_gas: alloy::primitives::U256::from(30u64),
        }),
    }
}

/// A live intent with a unique key.
pub fn intent(side: Side, size_usd: &str, leader_price: &str) -> CopyIntent {
    CopyIntent {
        idempotency_key: Uuid::new_v4().simple().to_string(),
        config_id: Uuid::new_v4(),
        wallet_address: Address::repeat_byte(0x44),
        proxy_address: proxy_address(),
        trader_address: trader(),
        token_id: TOKEN.into(),
        copy_side: side,
        copy_size_usd: dec(size_usd),
        leader_price: dec(leader_price),
        leader_tx_hash: None,
        source: SignalSource::ChainEvent,
        slippage_mode: SlippageMode::Auto,
        max_slippage: dec("0.05"),
        gas: None,
        expires_at: Utc::now() + chrono::Duration::minutes(10),
        status: IntentStatus::Pending,
        attempt: 0,
        error_message: None,
    }
}

/// Deep book centred on `mid`: one bid level a cent below, one ask level at `mid`.
pub fn book_at(mid: &str) -> OrderBook {
    let mid = dec(mid);
    OrderBook::from_levels(
        vec![BookLevel { price: mid - dec("0.01"), size: Decimal::from(10_000) }],
        vec![BookLevel { price: mid, size: Decimal::from(10_000) }],
    )
}

/// A funded, unpaused proxy that allows both USDC and the CTF.
pub fn funded_account(balance: &str) -> ProxyAccount {
    let mut account = ProxyAccount::new(proxy_address(), FeeTier::Pro);
    account.apply_deposit(dec(balance));
    account.allowed_targets = HashSet::from([USDC, CONDITIONAL_TOKENS]);
    account
}

pub fn memory_queue(max_size: usize) -> JobQueue {
    JobQueue::new(
        Arc::new(MemoryQueue::new()),
        QueueSettings {
            max_size,
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            ..QueueSettings::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Gateway fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedMarket {
    pub book: Mutex<OrderBook>,
    pub resolution: Mutex<Option<MarketResolution>>,
    pub book_calls: Mutex<usize>,
}

impl ScriptedMarket {
    pub fn with_book(book: OrderBook) -> Self {
        Self {
            book: Mutex::new(book),
            ..Default::default()
        }
    }

    pub fn resolved(condition_id: B256, payout: &str) -> Self {
        Self {
            resolution: Mutex::new(Some(MarketResolution {
                condition_id,
                payout_per_share: dec(payout),
            })),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MarketData for ScriptedMarket {
    async fn order_book(&self, _token_id: &str) -> Result<OrderBook, GatewayError> {
        *self.book_calls.lock().unwrap() += 1;
        Ok(self.book.lock().unwrap().clone())
    }

    async fn resolution(&self, _token_id: &str) -> Result<Option<MarketResolution>, GatewayError> {
        Ok(*self.resolution.lock().unwrap())
    }
}

/// Fills every order in full at its limit price unless a scripted failure is queued.
#[derive(Default)]
pub struct ScriptedRouter {
    pub failures: Mutex<VecDeque<GatewayError>>,
    pub orders: Mutex<Vec<OrderRequest>>,
}

impl ScriptedRouter {
    pub fn failing(times: usize) -> Self {
        let router = Self::default();
        for _ in 0..times {
            router
                .failures
                .lock()
                .unwrap()
                .push_back(GatewayError::Exchange("order killed".into()));
        }
        router
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderRouter for ScriptedRouter {
    async fn place_fok(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError> {
        self.orders.lock().unwrap().push(order.clone());
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(OrderFill {
            order_id: format!("order-{}", self.orders.lock().unwrap().len()),
            filled_shares: order.shares,
            avg_price: order.worst_price,
            tx_hash: None,
        })
    }
}

/// In-memory proxy + bot wallet. Every call is logged by name; names in `failing` error.
pub struct FakeProxy {
    pub account: Mutex<ProxyAccount>,
    pub bot_usdc: Mutex<Decimal>,
    pub tokens: Mutex<HashMap<Address, Decimal>>,
    pub failing: Mutex<HashSet<&'static str>>,
    pub calls: Mutex<Vec<(&'static str, Decimal)>>,
}

impl FakeProxy {
    pub fn new(account: ProxyAccount, bot_usdc: &str) -> Self {
        Self {
            account: Mutex::new(account),
            bot_usdc: Mutex::new(dec(bot_usdc)),
            tokens: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_proxy_tokens(self, shares: &str) -> Self {
        self.tokens.lock().unwrap().insert(proxy_address(), dec(shares));
        self
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|(name, _)| *name).collect()
    }

    pub fn amount_of(&self, op: &'static str) -> Option<Decimal> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| *name == op)
            .map(|(_, amount)| *amount)
    }

    fn record(&self, op: &'static str, amount: Decimal) -> Result<B256, GatewayError> {
        self.calls.lock().unwrap().push((op, amount));
        if self.failing.lock().unwrap().contains(op) {
            return Err(GatewayError::Rpc(format!("{op} failed")));
        }
        Ok(random_hash())
    }
}

#[async_trait]
impl ProxyGateway for FakeProxy {
    fn bot_address(&self) -> Address {
        bot_address()
    }

    async fn account(&self, proxy: Address, _targets: &[Address]) -> Result<ProxyAccount, GatewayError> {
        let mut account = self.account.lock().unwrap().clone();
        account.address = proxy;
        Ok(account)
    }

    async fn usdc_balance(&self, holder: Address) -> Result<Decimal, GatewayError> {
        if holder == bot_address() {
            Ok(*self.bot_usdc.lock().unwrap())
        } else {
            Ok(self.account.lock().unwrap().balance)
        }
    }

    async fn token_balance(&self, holder: Address, _token_id: &str) -> Result<Decimal, GatewayError> {
        Ok(self.tokens.lock().unwrap().get(&holder).copied().unwrap_or_default())
    }

    async fn pull_usdc(&self, _proxy: Address, amount: Decimal, _gas: Option<GasHint>) -> Result<B256, GatewayError> {
        self.record("pull_usdc", amount)
    }

    async fn push_usdc(&self, _proxy: Address, amount: Decimal) -> Result<B256, GatewayError> {
        self.record("push_usdc", amount)
    }

    async fn pull_tokens(
        &self,
        _proxy: Address,
        _token_id: &str,
        shares: Decimal,
        _gas: Option<GasHint>,
    ) -> Result<B256, GatewayError> {
        self.record("pull_tokens", shares)
    }

    async fn push_tokens(&self, _proxy: Address, _token_id: &str, shares: Decimal) -> Result<B256, GatewayError> {
        self.record("push_tokens", shares)
    }

    async fn redeem(&self, _proxy: Address, _condition_id: B256) -> Result<B256, GatewayError> {
        self.record("redeem", Decimal::ZERO)
    }
}

/// Executor over the given fakes with short timeouts.
pub fn executor(
    market: Arc<ScriptedMarket>,
    router: Arc<ScriptedRouter>,
    proxy: Arc<FakeProxy>,
) -> ExecutionService {
    ExecutionService::new(
        market,
        router,
        proxy,
        ExecutionSettings {
            call_timeout: Duration::from_secs(2),
            gas_boost_percent: 115,
            dry_run: false,
        },
    )
}

// ---------------------------------------------------------------------------
// External backends, used only when configured
// ---------------------------------------------------------------------------

/// Migrated Postgres pool from `TEST_DATABASE_URL`, or `None` when unset.
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

/// Redis queue under a scratch prefix from `TEST_REDIS_URL`, or `None` when unset.
pub async fn test_redis_queue() -> Option<RedisQueue> {
    let url = std::env::var("TEST_REDIS_URL").ok()?;
    let prefix = format!("polycopy:test:{}:", Uuid::new_v4().simple());
    let queue = RedisQueue::connect(&url, &prefix)
        .await
        .expect("Failed to connect to test redis");
    queue.reset().await.expect("Failed to reset redis keys");
    Some(queue)
}
