use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy::primitives::{Address, B256};
use metrics::{counter, histogram};
use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::chain::abi::{CONDITIONAL_TOKENS, USDC};
use crate::models::{CopyIntent, GasHint, Side, SignalSource};
use crate::proxy::ledger::{ProxyAccount, ProxyError};

use super::gateway::{
    GatewayError, MarketData, MarketResolution, OrderFill, OrderRequest, OrderRouter, ProxyGateway,
};
use super::slippage::{allowed_slippage, check_drift, worst_price, SlippageError};

/// How the worker treats a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// The intent can never succeed as written. Marked FAILED, not retried.
    Policy,
    /// Transient. Retried with backoff until attempts run out.
    Operational,
    /// Assets may be stranded between bot and proxy. Dead-lettered at once for an operator.
    Fatal,
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("target not allowed by proxy: {0}")]
    TargetNotAllowed(Address),

    #[error("proxy execution paused")]
    ProxyPaused,

    #[error("insufficient proxy balance: {available} < {required}")]
    InsufficientProxyBalance { available: Decimal, required: Decimal },

    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("slippage exceeded: {0}")]
    SlippageExceeded(String),

    #[error("token push to proxy failed: {0}")]
    TokenPushFailed(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("tokens delivered but USDC reimbursement failed: {0}")]
    ReimbursementFailed(String),

    #[error("could not return assets to proxy: {0}")]
    ReturnFailed(String),

    #[error("resolved market needs a confirmed settlement event, got {0} signal")]
    UnconfirmedSettlement(SignalSource),
}

impl ExecutionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ExecutionError::TargetNotAllowed(_)
            | ExecutionError::ProxyPaused
            | ExecutionError::InvalidIntent(_)
            | ExecutionError::UnconfirmedSettlement(_) => ErrorClass::Policy,
            ExecutionError::InsufficientProxyBalance { .. }
            | ExecutionError::InsufficientLiquidity(_)
            | ExecutionError::SlippageExceeded(_)
            | ExecutionError::TokenPushFailed(_)
            | ExecutionError::OrderRejected(_)
            | ExecutionError::Timeout(_)
            | ExecutionError::Gateway(_) => ErrorClass::Operational,
            ExecutionError::ReimbursementFailed(_) | ExecutionError::ReturnFailed(_) => ErrorClass::Fatal,
        }
    }

    /// Short label used as the metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::TargetNotAllowed(_) => "target_not_allowed",
            ExecutionError::ProxyPaused => "proxy_paused",
            ExecutionError::InsufficientProxyBalance { .. } => "insufficient_proxy_balance",
            ExecutionError::InsufficientLiquidity(_) => "insufficient_liquidity",
            ExecutionError::SlippageExceeded(_) => "slippage_exceeded",
            ExecutionError::TokenPushFailed(_) => "token_push_failed",
            ExecutionError::OrderRejected(_) => "order_rejected",
            ExecutionError::Timeout(_) => "timeout",
            ExecutionError::Gateway(_) => "gateway",
            ExecutionError::InvalidIntent(_) => "invalid_intent",
            ExecutionError::ReimbursementFailed(_) => "reimbursement_failed",
            ExecutionError::ReturnFailed(_) => "return_failed",
            ExecutionError::UnconfirmedSettlement(_) => "unconfirmed_settlement",
        }
    }
}

impl From<ProxyError> for ExecutionError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Paused => ExecutionError::ProxyPaused,
            ProxyError::TargetNotAllowed(target) => ExecutionError::TargetNotAllowed(target),
            ProxyError::InsufficientBalance { available, required } => {
                ExecutionError::InsufficientProxyBalance { available, required }
            }
            ProxyError::WithdrawExceedsBalance { requested, balance } => ExecutionError::InsufficientProxyBalance {
                available: balance,
                required: requested,
            },
        }
    }
}

impl From<SlippageError> for ExecutionError {
    fn from(err: SlippageError) -> Self {
        match err {
            SlippageError::InsufficientDepth { .. } | SlippageError::NoReference => {
                ExecutionError::InsufficientLiquidity(err.to_string())
            }
            SlippageError::ImpactAboveCeiling { .. } | SlippageError::Drift { .. } => {
                ExecutionError::SlippageExceeded(err.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPath {
    /// Bot trades with its own float, pushes tokens, then is reimbursed by the proxy.
    Optimized,
    /// Assets are pulled from the proxy, traded, and the proceeds returned.
    Direct,
    /// Resolved market: the proxy redeems its position.
    Settlement,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::Optimized => "optimized",
            ExecutionPath::Direct => "direct",
            ExecutionPath::Settlement => "settlement",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub tx_hash: Option<B256>,
    pub order_id: Option<String>,
    pub fill_price: Option<Decimal>,
    pub filled_shares: Option<Decimal>,
    pub path: Option<ExecutionPath>,
    pub error: Option<ExecutionError>,
    /// Change the bot could not hand back to the proxy after a filled direct buy.
    pub unreturned_usdc: Option<Decimal>,
}

impl ExecutionOutcome {
    fn filled(path: ExecutionPath, fill: &OrderFill, tx_hash: Option<B256>) -> Self {
        Self {
            success: true,
            tx_hash,
            order_id: Some(fill.order_id.clone()),
            fill_price: Some(fill.avg_price),
            filled_shares: Some(fill.filled_shares),
            path: Some(path),
            error: None,
            unreturned_usdc: None,
        }
    }

    fn failed(error: ExecutionError) -> Self {
        Self {
            success: false,
            tx_hash: None,
            order_id: None,
            fill_price: None,
            filled_shares: None,
            path: None,
            error: Some(error),
            unreturned_usdc: None,
        }
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error.as_ref().map(ExecutionError::class)
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// One async mutex per key.
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

/// Holding the guard means no other order for that proxy is in flight.
pub type ProxyLocks = KeyedLocks<Address>;

/// Keyed by token id. Held while the bot wallet carries that token for an intent, so a
/// concurrent intent for another proxy cannot mistake it for leftover inventory.
pub type InventoryLocks = KeyedLocks<String>;

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Applied to every outbound call separately.
    pub call_timeout: Duration,
    /// Gas hint multiplier in percent (115 = ×1.15).
    pub gas_boost_percent: u64,
    /// Price and plan the trade, log it, move nothing.
    pub dry_run: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            gas_boost_percent: 115,
            dry_run: false,
        }
    }
}

/// Priced order for one intent, before any asset moves.
struct Plan {
    side: Side,
    best: Decimal,
    worst: Decimal,
    shares: Decimal,
    slippage: Decimal,
}

pub struct ExecutionService {
    market: Arc<dyn MarketData>,
    router: Arc<dyn OrderRouter>,
    proxy: Arc<dyn ProxyGateway>,
    locks: ProxyLocks,
    inventory: InventoryLocks,
    settings: ExecutionSettings,
}

impl ExecutionService {
    pub fn new(
        market: Arc<dyn MarketData>,
        router: Arc<dyn OrderRouter>,
        proxy: Arc<dyn ProxyGateway>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            market,
            router,
            proxy,
            locks: ProxyLocks::new(),
            inventory: InventoryLocks::new(),
            settings,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Execute one copy intent end to end. Never panics on gateway failures; the
    /// outcome carries the error and its class.
    pub async fn execute(&self, intent: &CopyIntent) -> ExecutionOutcome {
        let started = Instant::now();
        let _guard = self.locks.acquire(intent.proxy_address).await;

        let outcome = match self.run(intent).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::failed(e),
        };
        histogram!("execution_duration_seconds").record(started.elapsed().as_secs_f64());

        match (&outcome.error, outcome.path) {
            (None, Some(path)) => {
                counter!("executions_total", "result" => "success", "path" => path.as_str()).increment(1);
                tracing::info!(
                    key = %intent.idempotency_key,
                    proxy = %intent.proxy_address,
                    token_id = %intent.token_id,
                    side = %intent.copy_side,
                    path = path.as_str(),
                    fill_price = ?outcome.fill_price,
                    dry_run = self.settings.dry_run,
                    "Copy executed"
                );
            }
            (Some(err), _) => {
                counter!("executions_total", "result" => "failure", "error" => err.kind()).increment(1);
                tracing::warn!(
                    key = %intent.idempotency_key,
                    proxy = %intent.proxy_address,
                    error = %err,
                    class = ?err.class(),
                    "Copy execution failed"
                );
            }
            (None, None) => {}
        }
        outcome
    }

    async fn run(&self, intent: &CopyIntent) -> Result<ExecutionOutcome, ExecutionError> {
        if intent.copy_size_usd <= Decimal::ZERO {
            return Err(ExecutionError::InvalidIntent(format!(
                "copy size {} is not positive",
                intent.copy_size_usd
            )));
        }
        if intent.leader_price <= Decimal::ZERO || intent.leader_price >= Decimal::ONE {
            return Err(ExecutionError::InvalidIntent(format!(
                "leader price {} outside (0, 1)",
                intent.leader_price
            )));
        }

        let account = self
            .timed("proxy_account", self.proxy.account(intent.proxy_address, &[USDC, CONDITIONAL_TOKENS]))
            .await?;
        let gas = intent.gas.map(|g| g.boosted(self.settings.gas_boost_percent));

        match intent.copy_side {
            Side::Buy => self.buy(intent, &account, gas).await,
            Side::Sell => {
                let resolution = self.timed("resolution", self.market.resolution(&intent.token_id)).await?;
                match resolution {
                    Some(resolution) if intent.source.is_authoritative() => {
                        self.settle(intent, &account, resolution).await
                    }
                    Some(_) => Err(ExecutionError::UnconfirmedSettlement(intent.source)),
                    None => self.sell(intent, &account, gas).await,
                }
            }
        }
    }

    async fn plan(&self, intent: &CopyIntent, side: Side, depth_shares: Decimal) -> Result<Plan, ExecutionError> {
        let book = self.timed("order_book", self.market.order_book(&intent.token_id)).await?;
        let best = book
            .best_price(side)
            .ok_or_else(|| ExecutionError::InsufficientLiquidity(format!("no {} liquidity", side.flipped())))?;

        check_drift(intent.leader_price, best, intent.max_slippage)?;
        let slippage = allowed_slippage(intent.slippage_mode, &book, side, depth_shares, intent.max_slippage)?;
        let worst = worst_price(best, side, slippage);

        Ok(Plan {
            side,
            best,
            worst,
            shares: depth_shares,
            slippage,
        })
    }

    // -- BUY -----------------------------------------------------------------

    async fn buy(
        &self,
        intent: &CopyIntent,
        account: &ProxyAccount,
        gas: Option<GasHint>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        account.check_execute(USDC)?;
        account.ensure_balance(intent.copy_size_usd)?;

        let mut plan = self.plan(intent, Side::Buy, intent.approx_shares()).await?;
        // spend at most the copy size even if every share fills at the worst price
        plan.shares = round_shares(intent.copy_size_usd / plan.worst);
        if plan.shares <= Decimal::ZERO {
            return Err(ExecutionError::InvalidIntent("copy size buys zero shares".into()));
        }

        let bot = self.proxy.bot_address();
        let bot_usdc = self.timed("bot_usdc_balance", self.proxy.usdc_balance(bot)).await?;
        let path = if bot_usdc >= intent.copy_size_usd {
            ExecutionPath::Optimized
        } else {
            ExecutionPath::Direct
        };

        if self.settings.dry_run {
            return Ok(self.dry_run_outcome(intent, path, &plan));
        }

        let _inventory = self.inventory.acquire(intent.token_id.clone()).await;
        match path {
            ExecutionPath::Optimized => self.buy_optimized(intent, &plan, gas).await,
            _ => self.buy_direct(intent, &plan, gas).await,
        }
    }

    async fn buy_optimized(
        &self,
        intent: &CopyIntent,
        plan: &Plan,
        gas: Option<GasHint>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let proxy = intent.proxy_address;
        let bot = self.proxy.bot_address();

        // A previous attempt may have bought and then failed to push; deliver those tokens
        // instead of buying twice.
        let held = self
            .timed("bot_token_balance", self.proxy.token_balance(bot, &intent.token_id))
            .await?;
        let fill = if held >= plan.shares {
            tracing::info!(key = %intent.idempotency_key, held = %held, "Delivering tokens already held by bot");
            OrderFill {
                order_id: format!("float:{}", intent.idempotency_key),
                filled_shares: plan.shares,
                avg_price: plan.best,
                tx_hash: None,
            }
        } else {
            self.place(intent, plan).await?
        };

        self.timed("push_tokens", self.proxy.push_tokens(proxy, &intent.token_id, fill.filled_shares))
            .await
            .map_err(|e| ExecutionError::TokenPushFailed(e.to_string()))?;

        let reimbursement = fill.notional().min(intent.copy_size_usd);
        let tx = self
            .timed("reimburse", self.proxy.pull_usdc(proxy, reimbursement, gas))
            .await
            .map_err(|e| ExecutionError::ReimbursementFailed(e.to_string()))?;

        Ok(ExecutionOutcome::filled(ExecutionPath::Optimized, &fill, Some(tx)))
    }

    async fn buy_direct(
        &self,
        intent: &CopyIntent,
        plan: &Plan,
        gas: Option<GasHint>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let proxy = intent.proxy_address;
        let amount = intent.copy_size_usd;

        self.timed("pull_usdc", self.proxy.pull_usdc(proxy, amount, gas)).await?;

        let fill = match self.place(intent, plan).await {
            Ok(fill) => fill,
            Err(order_err) => {
                self.timed("refund_usdc", self.proxy.push_usdc(proxy, amount))
                    .await
                    .map_err(|e| ExecutionError::ReturnFailed(format!("refund of {amount} USDC: {e}")))?;
                return Err(order_err);
            }
        };

        let tx = self
            .timed("push_tokens", self.proxy.push_tokens(proxy, &intent.token_id, fill.filled_shares))
            .await
            .map_err(|e| ExecutionError::ReturnFailed(format!("tokens: {e}")))?;

        let mut outcome = ExecutionOutcome::filled(ExecutionPath::Direct, &fill, Some(tx));
        let leftover = amount - fill.notional();
        if leftover > Decimal::ZERO {
            // the order filled and the tokens are delivered, so a retry would buy twice
            if let Err(e) = self.timed("return_change", self.proxy.push_usdc(proxy, leftover)).await {
                counter!("unreturned_usdc_total").increment(1);
                tracing::error!(
                    key = %intent.idempotency_key,
                    proxy = %proxy,
                    leftover = %leftover,
                    error = %e,
                    "Unspent USDC left in bot wallet"
                );
                outcome.unreturned_usdc = Some(leftover);
            }
        }

        Ok(outcome)
    }

    // -- SELL ----------------------------------------------------------------

    async fn sell(
        &self,
        intent: &CopyIntent,
        account: &ProxyAccount,
        gas: Option<GasHint>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        account.check_execute(CONDITIONAL_TOKENS)?;
        let proxy = intent.proxy_address;

        let wanted = intent.approx_shares();
        let held = self
            .timed("proxy_token_balance", self.proxy.token_balance(proxy, &intent.token_id))
            .await?;
        let shares = round_shares(wanted.min(held));
        if shares <= Decimal::ZERO {
            return Err(ExecutionError::InsufficientProxyBalance {
                available: held,
                required: wanted,
            });
        }

        let plan = self.plan(intent, Side::Sell, shares).await?;
        if self.settings.dry_run {
            return Ok(self.dry_run_outcome(intent, ExecutionPath::Direct, &plan));
        }

        let _inventory = self.inventory.acquire(intent.token_id.clone()).await;
        self.timed("pull_tokens", self.proxy.pull_tokens(proxy, &intent.token_id, shares, gas))
            .await?;

        let fill = match self.place(intent, &plan).await {
            Ok(fill) => fill,
            Err(order_err) => {
                self.timed("return_tokens", self.proxy.push_tokens(proxy, &intent.token_id, shares))
                    .await
                    .map_err(|e| ExecutionError::ReturnFailed(format!("return of {shares} shares: {e}")))?;
                return Err(order_err);
            }
        };

        let proceeds = fill.notional();
        let tx = self
            .timed("push_proceeds", self.proxy.push_usdc(proxy, proceeds))
            .await
            .map_err(|e| ExecutionError::ReturnFailed(format!("proceeds of {proceeds} USDC: {e}")))?;

        Ok(ExecutionOutcome::filled(ExecutionPath::Direct, &fill, Some(tx)))
    }

    async fn settle(
        &self,
        intent: &CopyIntent,
        account: &ProxyAccount,
        resolution: MarketResolution,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        account.check_execute(CONDITIONAL_TOKENS)?;

        if self.settings.dry_run {
            tracing::info!(
                key = %intent.idempotency_key,
                condition_id = %resolution.condition_id,
                "[DRY-RUN] Would redeem resolved position"
            );
            return Ok(ExecutionOutcome {
                success: true,
                tx_hash: None,
                order_id: None,
                fill_price: Some(resolution.payout_per_share),
                filled_shares: None,
                path: Some(ExecutionPath::Settlement),
                error: None,
                unreturned_usdc: None,
            });
        }

        let tx = self
            .timed("redeem", self.proxy.redeem(intent.proxy_address, resolution.condition_id))
            .await?;

        Ok(ExecutionOutcome {
            success: true,
            tx_hash: Some(tx),
            order_id: None,
            fill_price: Some(resolution.payout_per_share),
            filled_shares: None,
            path: Some(ExecutionPath::Settlement),
            error: None,
            unreturned_usdc: None,
        })
    }

    // -- helpers -------------------------------------------------------------

    async fn place(&self, intent: &CopyIntent, plan: &Plan) -> Result<OrderFill, ExecutionError> {
        let order = OrderRequest {
            token_id: intent.token_id.clone(),
            side: plan.side,
            shares: plan.shares,
            worst_price: plan.worst,
        };
        tracing::debug!(
            token_id = %order.token_id,
            side = %order.side,
            shares = %order.shares,
            best = %plan.best,
            worst = %order.worst_price,
            slippage = %plan.slippage,
            "Placing FOK order"
        );

        let fill = self
            .timed("place_order", self.router.place_fok(&order))
            .await
            .map_err(|e| ExecutionError::OrderRejected(e.to_string()))?;

        if fill.filled_shares <= Decimal::ZERO {
            return Err(ExecutionError::OrderRejected(format!("order {} filled nothing", fill.order_id)));
        }
        Ok(fill)
    }

    fn dry_run_outcome(&self, intent: &CopyIntent, path: ExecutionPath, plan: &Plan) -> ExecutionOutcome {
        tracing::info!(
            key = %intent.idempotency_key,
            token_id = %intent.token_id,
            side = %plan.side,
            shares = %plan.shares,
            worst_price = %plan.worst,
            path = path.as_str(),
            "[DRY-RUN] Would place FOK order"
        );
        ExecutionOutcome {
            success: true,
            tx_hash: None,
            order_id: None,
            fill_price: Some(plan.best),
            filled_shares: Some(plan.shares),
            path: Some(path),
            error: None,
            unreturned_usdc: None,
        }
    }

    async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T, ExecutionError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.settings.call_timeout, fut).await {
            Ok(result) => result.map_err(ExecutionError::from),
            Err(_) => Err(ExecutionError::Timeout(op)),
        }
    }
}

/// Share quantities go to the exchange with two decimals, rounded down.
fn round_shares(shares: Decimal) -> Decimal {
    shares.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}
