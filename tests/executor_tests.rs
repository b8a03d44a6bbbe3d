mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use rust_decimal::Decimal;

use common::*;
use polycopy::chain::abi::USDC;
use polycopy::execution::{
    ErrorClass, ExecutionError, ExecutionPath, ExecutionService, ExecutionSettings, GatewayError, OrderFill,
    OrderRequest, OrderRouter, ProxyGateway,
};
use polycopy::models::{GasHint, Side, SignalSource};
use polycopy::proxy::ProxyAccount;

struct Harness {
    market: Arc<ScriptedMarket>,
    router: Arc<ScriptedRouter>,
    proxy: Arc<FakeProxy>,
    service: ExecutionService,
}

fn harness(market: ScriptedMarket, router: ScriptedRouter, proxy: FakeProxy) -> Harness {
    let market = Arc::new(market);
    let router = Arc::new(router);
    let proxy = Arc::new(proxy);
    let service = executor(market.clone(), router.clone(), proxy.clone());
    Harness {
        market,
        router,
        proxy,
        service,
    }
}

#[tokio::test]
async fn test_buy_with_bot_float_takes_optimized_path() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("500"), "100"),
    );
    let intent = intent(Side::Buy, "50", "0.5");

    let outcome = h.service.execute(&intent).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.path, Some(ExecutionPath::Optimized));
    assert_eq!(h.proxy.call_names(), vec!["push_tokens", "pull_usdc"]);

    let order = h.router.orders.lock().unwrap()[0].clone();
    assert_eq!(order.side, Side::Buy);
    assert!(order.worst_price >= dec("0.5") && order.worst_price <= dec("0.525"));
    assert!(order.shares * order.worst_price <= dec("50"));

    // reimbursement never exceeds the copy size
    let reimbursed = h.proxy.amount_of("pull_usdc").unwrap();
    assert!(reimbursed <= dec("50") && reimbursed > dec("49"));
}

#[tokio::test]
async fn test_buy_without_float_pulls_from_proxy() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("500"), "0"),
    );

    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.path, Some(ExecutionPath::Direct));
    let calls = h.proxy.call_names();
    assert_eq!(&calls[..2], &["pull_usdc", "push_tokens"]);
    assert_eq!(h.proxy.amount_of("pull_usdc"), Some(dec("50")));
}

#[tokio::test]
async fn test_direct_buy_refunds_when_order_fails() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::failing(1),
        FakeProxy::new(funded_account("500"), "0"),
    );

    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;

    assert!(!outcome.success);
    assert!(matches!(outcome.error, Some(ExecutionError::OrderRejected(_))));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Operational));
    assert_eq!(h.proxy.call_names(), vec!["pull_usdc", "push_usdc"]);
    assert_eq!(h.proxy.amount_of("push_usdc"), Some(dec("50")));
}

#[tokio::test]
async fn test_failed_refund_is_fatal() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::failing(1),
        FakeProxy::new(funded_account("500"), "0"),
    );
    h.proxy.fail("push_usdc");

    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;

    assert!(matches!(outcome.error, Some(ExecutionError::ReturnFailed(_))));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Fatal));
}

#[tokio::test]
async fn test_token_push_failure_is_retryable_and_retry_reuses_tokens() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("500"), "100"),
    );
    h.proxy.fail("push_tokens");
    let intent = intent(Side::Buy, "50", "0.5");

    let first = h.service.execute(&intent).await;
    assert!(matches!(first.error, Some(ExecutionError::TokenPushFailed(_))));
    assert_eq!(first.error_class(), Some(ErrorClass::Operational));
    assert!(!h.proxy.call_names().contains(&"pull_usdc"));
    assert_eq!(h.router.order_count(), 1);

    // the bot now holds the bought shares; the retry delivers them instead of buying again
    h.proxy.failing.lock().unwrap().clear();
    h.proxy.tokens.lock().unwrap().insert(bot_address(), Decimal::from(1_000));
    let second = h.service.execute(&intent).await;

    assert!(second.success, "{:?}", second.error);
    assert_eq!(h.router.order_count(), 1);
    assert!(h.proxy.call_names().ends_with(&["push_tokens", "pull_usdc"]));
}

#[tokio::test]
async fn test_failed_reimbursement_is_fatal() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("500"), "100"),
    );
    h.proxy.fail("pull_usdc");

    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;

    assert!(matches!(outcome.error, Some(ExecutionError::ReimbursementFailed(_))));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Fatal));
}

#[tokio::test]
async fn test_sell_pulls_tokens_and_returns_proceeds() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("0"), "0").with_proxy_tokens("200"),
    );

    let outcome = h.service.execute(&intent(Side::Sell, "50", "0.5")).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.path, Some(ExecutionPath::Direct));
    assert_eq!(h.proxy.call_names(), vec!["pull_tokens", "push_usdc"]);
    assert_eq!(h.proxy.amount_of("pull_tokens"), Some(dec("100")));

    let order = h.router.orders.lock().unwrap()[0].clone();
    assert_eq!(order.side, Side::Sell);
    assert!(order.worst_price < dec("0.49"));
}

#[tokio::test]
async fn test_sell_without_position_is_rejected() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("0"), "0"),
    );

    let outcome = h.service.execute(&intent(Side::Sell, "50", "0.5")).await;

    assert!(matches!(outcome.error, Some(ExecutionError::InsufficientProxyBalance { .. })));
    assert!(h.proxy.call_names().is_empty());
    assert_eq!(h.router.order_count(), 0);
}

#[tokio::test]
async fn test_sell_into_resolved_market_redeems() {
    let condition = random_hash();
    let h = harness(
        ScriptedMarket::resolved(condition, "1"),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("0"), "0").with_proxy_tokens("200"),
    );

    let outcome = h.service.execute(&intent(Side::Sell, "50", "0.5")).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.path, Some(ExecutionPath::Settlement));
    assert_eq!(outcome.fill_price, Some(Decimal::ONE));
    assert_eq!(h.proxy.call_names(), vec!["redeem"]);
    assert_eq!(*h.market.book_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_mempool_sell_never_redeems() {
    let h = harness(
        ScriptedMarket::resolved(random_hash(), "1"),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("0"), "0").with_proxy_tokens("200"),
    );
    let mut pending = intent(Side::Sell, "50", "0.5");
    pending.source = SignalSource::Mempool;

    let outcome = h.service.execute(&pending).await;

    assert!(matches!(
        outcome.error,
        Some(ExecutionError::UnconfirmedSettlement(SignalSource::Mempool))
    ));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Policy));
    assert!(h.proxy.call_names().is_empty());
    assert_eq!(h.router.order_count(), 0);
}

#[tokio::test]
async fn test_unreturned_change_is_reported_on_success() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("500"), "0"),
    );
    h.proxy.fail("push_usdc");

    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;

    // tokens were delivered, so the job must not be retried
    assert!(outcome.success, "{:?}", outcome.error);
    assert!(outcome.error.is_none());
    assert_eq!(h.proxy.call_names(), vec!["pull_usdc", "push_tokens", "push_usdc"]);

    let order = h.router.orders.lock().unwrap()[0].clone();
    let change = dec("50") - order.shares * order.worst_price;
    assert!(change > Decimal::ZERO);
    assert_eq!(outcome.unreturned_usdc, Some(change));
}

#[tokio::test]
async fn test_change_returned_leaves_nothing_unreturned() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("500"), "0"),
    );

    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.unreturned_usdc, None);
}

#[tokio::test]
async fn test_policy_failures_move_nothing() {
    let mut paused = funded_account("500");
    paused.is_paused = true;
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(paused, "100"),
    );
    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;
    assert!(matches!(outcome.error, Some(ExecutionError::ProxyPaused)));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Policy));

    let mut locked = funded_account("500");
    locked.allowed_targets.clear();
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(locked, "100"),
    );
    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;
    assert!(matches!(outcome.error, Some(ExecutionError::TargetNotAllowed(t)) if t == USDC));
    assert!(h.proxy.call_names().is_empty());
}

#[tokio::test]
async fn test_underfunded_proxy_and_price_drift() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("10"), "100"),
    );
    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;
    assert!(matches!(outcome.error, Some(ExecutionError::InsufficientProxyBalance { .. })));

    // best ask 0.6 is 20% away from the leader's 0.5
    let h = harness(
        ScriptedMarket::with_book(book_at("0.6")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("500"), "100"),
    );
    let outcome = h.service.execute(&intent(Side::Buy, "50", "0.5")).await;
    assert!(matches!(outcome.error, Some(ExecutionError::SlippageExceeded(_))));
    assert_eq!(h.router.order_count(), 0);
}

#[tokio::test]
async fn test_dry_run_plans_without_moving_assets() {
    let market = Arc::new(ScriptedMarket::with_book(book_at("0.5")));
    let router = Arc::new(ScriptedRouter::default());
    let proxy = Arc::new(FakeProxy::new(funded_account("500"), "0"));
    let service = ExecutionService::new(
        market,
        router.clone(),
        proxy.clone(),
        ExecutionSettings {
            call_timeout: Duration::from_secs(2),
            gas_boost_percent: 115,
            dry_run: true,
        },
    );

    let outcome = service.execute(&intent(Side::Buy, "50", "0.5")).await;

    assert!(outcome.success);
    assert_eq!(outcome.path, Some(ExecutionPath::Direct));
    assert!(outcome.order_id.is_none());
    assert!(proxy.call_names().is_empty());
    assert_eq!(router.order_count(), 0);
}

#[tokio::test]
async fn test_invalid_intent_is_policy() {
    let h = harness(
        ScriptedMarket::with_book(book_at("0.5")),
        ScriptedRouter::default(),
        FakeProxy::new(funded_account("500"), "100"),
    );
    let outcome = h.service.execute(&intent(Side::Buy, "0", "0.5")).await;
    assert!(matches!(outcome.error, Some(ExecutionError::InvalidIntent(_))));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Policy));
}

// ---------------------------------------------------------------------------
// Shared bot inventory across proxies
// ---------------------------------------------------------------------------

const FILL_DELAY: Duration = Duration::from_millis(50);
const PUSH_DELAY: Duration = Duration::from_millis(50);

/// Bot wallet whose token balance moves with fills and pushes.
#[derive(Default)]
struct Inventory {
    bot_tokens: Mutex<Decimal>,
    delivered: Mutex<HashMap<Address, Decimal>>,
    orders: Mutex<usize>,
}

struct FillingRouter(Arc<Inventory>);

#[async_trait]
impl OrderRouter for FillingRouter {
    async fn place_fok(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError> {
        let n = {
            let mut orders = self.0.orders.lock().unwrap();
            *orders += 1;
            *orders
        };
        tokio::time::sleep(FILL_DELAY).await;
        *self.0.bot_tokens.lock().unwrap() += order.shares;
        Ok(OrderFill {
            order_id: format!("order-{n}"),
            filled_shares: order.shares,
            avg_price: order.worst_price,
            tx_hash: None,
        })
    }
}

struct InventoryProxy(Arc<Inventory>);

#[async_trait]
impl ProxyGateway for InventoryProxy {
    fn bot_address(&self) -> Address {
        bot_address()
    }

    async fn account(&self, proxy: Address, _targets: &[Address]) -> Result<ProxyAccount, GatewayError> {
        let mut account = funded_account("500");
        account.address = proxy;
        Ok(account)
    }

    async fn usdc_balance(&self, _holder: Address) -> Result<Decimal, GatewayError> {
        Ok(Decimal::from(1_000))
    }

    async fn token_balance(&self, holder: Address, _token_id: &str) -> Result<Decimal, GatewayError> {
        if holder == bot_address() {
            return Ok(*self.0.bot_tokens.lock().unwrap());
        }
        Ok(self.0.delivered.lock().unwrap().get(&holder).copied().unwrap_or_default())
    }

    async fn pull_usdc(&self, _proxy: Address, _amount: Decimal, _gas: Option<GasHint>) -> Result<B256, GatewayError> {
        Ok(random_hash())
    }

    async fn push_usdc(&self, _proxy: Address, _amount: Decimal) -> Result<B256, GatewayError> {
        Ok(random_hash())
    }

    async fn pull_tokens(
        &self,
        _proxy: Address,
        _token_id: &str,
        _shares: Decimal,
        _gas: Option<GasHint>,
    ) -> Result<B256, GatewayError> {
        Ok(random_hash())
    }

    async fn push_tokens(&self, proxy: Address, _token_id: &str, shares: Decimal) -> Result<B256, GatewayError> {
        tokio::time::sleep(PUSH_DELAY).await;
        let mut bot = self.0.bot_tokens.lock().unwrap();
        if *bot < shares {
            return Err(GatewayError::Rpc(format!("bot holds {bot}, cannot push {shares}")));
        }
        *bot -= shares;
        *self.0.delivered.lock().unwrap().entry(proxy).or_default() += shares;
        Ok(random_hash())
    }

    async fn redeem(&self, _proxy: Address, _condition_id: B256) -> Result<B256, GatewayError> {
        Ok(random_hash())
    }
}

#[tokio::test]
async fn test_concurrent_proxies_do_not_share_bot_float() {
    let inventory = Arc::new(Inventory::default());
    let service = Arc::new(ExecutionService::new(
        Arc::new(ScriptedMarket::with_book(book_at("0.5"))),
        Arc::new(FillingRouter(inventory.clone())),
        Arc::new(InventoryProxy(inventory.clone())),
        ExecutionSettings {
            call_timeout: Duration::from_secs(2),
            gas_boost_percent: 115,
            dry_run: false,
        },
    ));

    let first_proxy = Address::repeat_byte(0x51);
    let second_proxy = Address::repeat_byte(0x52);
    let mut first = intent(Side::Buy, "50", "0.5");
    first.proxy_address = first_proxy;
    let mut second = intent(Side::Buy, "50", "0.5");
    second.proxy_address = second_proxy;

    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.execute(&first).await })
    };
    // the first fill has landed in the bot wallet and its push is under way
    tokio::time::sleep(FILL_DELAY + PUSH_DELAY / 2).await;
    let second_outcome = service.execute(&second).await;
    let first_outcome = running.await.unwrap();

    assert!(first_outcome.success, "{:?}", first_outcome.error);
    assert!(second_outcome.success, "{:?}", second_outcome.error);
    assert_eq!(first_outcome.path, Some(ExecutionPath::Optimized));
    assert_eq!(second_outcome.path, Some(ExecutionPath::Optimized));

    // each proxy got the shares it paid for, bought separately
    assert_eq!(*inventory.orders.lock().unwrap(), 2);
    let delivered = inventory.delivered.lock().unwrap().clone();
    assert_eq!(delivered.get(&first_proxy), first_outcome.filled_shares.as_ref());
    assert_eq!(delivered.get(&second_proxy), second_outcome.filled_shares.as_ref());
    assert_eq!(*inventory.bot_tokens.lock().unwrap(), Decimal::ZERO);
}
