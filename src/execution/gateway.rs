//! Seams between the execution service and the outside world: market data, order
//! routing and the follower's proxy contract. Live implementations live under
//! `polymarket` and `proxy::client`; tests script them.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{GasHint, Side};
use crate::proxy::ledger::ProxyAccount;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book with bids sorted best (highest) first and asks best (lowest) first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Build a book from levels in any order.
    pub fn from_levels(mut bids: Vec<BookLevel>, mut asks: Vec<BookLevel>) -> Self {
        bids.retain(|l| l.size > Decimal::ZERO);
        asks.retain(|l| l.size > Decimal::ZERO);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self { bids, asks }
    }

    /// Levels a taker on `side` consumes: asks for a BUY, bids for a SELL.
    pub fn taker_levels(&self, side: Side) -> &[BookLevel] {
        match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        }
    }

    /// Best executable price for a taker on `side`.
    pub fn best_price(&self, side: Side) -> Option<Decimal> {
        self.taker_levels(side).first().map(|l| l.price)
    }
}

/// A market that has resolved; positions redeem at `payout_per_share`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketResolution {
    pub condition_id: B256,
    pub payout_per_share: Decimal,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn order_book(&self, token_id: &str) -> Result<OrderBook, GatewayError>;

    /// `Some` once the token's market has resolved.
    async fn resolution(&self, token_id: &str) -> Result<Option<MarketResolution>, GatewayError>;
}

// ---------------------------------------------------------------------------
// Order routing
// ---------------------------------------------------------------------------

/// A fill-or-kill order bounded by `worst_price`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: Side,
    pub shares: Decimal,
    pub worst_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    pub filled_shares: Decimal,
    pub avg_price: Decimal,
    pub tx_hash: Option<B256>,
}

impl OrderFill {
    pub fn notional(&self) -> Decimal {
        (self.filled_shares * self.avg_price).round_dp(6)
    }
}

#[async_trait]
pub trait OrderRouter: Send + Sync {
    async fn place_fok(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError>;
}

// ---------------------------------------------------------------------------
// Proxy contract + bot wallet
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProxyGateway: Send + Sync {
    /// Address of the execution signer.
    fn bot_address(&self) -> Address;

    /// Snapshot of the proxy, with `allowed_targets` resolved for `targets`.
    async fn account(&self, proxy: Address, targets: &[Address]) -> Result<ProxyAccount, GatewayError>;

    async fn usdc_balance(&self, holder: Address) -> Result<Decimal, GatewayError>;

    async fn token_balance(&self, holder: Address, token_id: &str) -> Result<Decimal, GatewayError>;

    /// `proxy.execute(usdc, transfer(bot, amount))`.
    async fn pull_usdc(&self, proxy: Address, amount: Decimal, gas: Option<GasHint>) -> Result<B256, GatewayError>;

    /// Bot sends USDC to the proxy.
    async fn push_usdc(&self, proxy: Address, amount: Decimal) -> Result<B256, GatewayError>;

    /// `proxy.execute(ctf, safeTransferFrom(proxy, bot, id, shares, ""))`.
    async fn pull_tokens(
        &self,
        proxy: Address,
        token_id: &str,
        shares: Decimal,
        gas: Option<GasHint>,
    ) -> Result<B256, GatewayError>;

    /// Bot sends outcome tokens to the proxy.
    async fn push_tokens(&self, proxy: Address, token_id: &str, shares: Decimal) -> Result<B256, GatewayError>;

    /// `proxy.execute(ctf, redeemPositions(usdc, 0, condition, [1, 2]))`.
    async fn redeem(&self, proxy: Address, condition_id: B256) -> Result<B256, GatewayError>;
}
