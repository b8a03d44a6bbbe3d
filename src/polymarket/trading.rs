use std::sync::Arc;

use async_trait::async_trait;
use polymarket_client_sdk::clob::types::{OrderType, Side as SdkSide};
use polymarket_client_sdk::types::U256;

use crate::execution::gateway::{GatewayError, OrderFill, OrderRequest, OrderRouter};
use crate::models::Side;

use super::wallet::BotWallet;

/// Places fill-or-kill limit orders through the Polymarket SDK.
pub struct TradingClient {
    wallet: Arc<BotWallet>,
}

impl TradingClient {
    pub fn new(wallet: Arc<BotWallet>) -> Self {
        Self { wallet }
    }

    pub fn wallet(&self) -> &Arc<BotWallet> {
        &self.wallet
    }
}

/// CTF token ids are decimal uint256 strings; tolerate hex as well.
pub fn parse_token_id(token_id: &str) -> Result<U256, GatewayError> {
    let parsed = match token_id.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(token_id, 10),
    };
    parsed.map_err(|e| GatewayError::Exchange(format!("invalid token id {token_id}: {e}")))
}

#[async_trait]
impl OrderRouter for TradingClient {
    async fn place_fok(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError> {
        let sdk_side = match order.side {
            Side::Buy => SdkSide::Buy,
            Side::Sell => SdkSide::Sell,
        };
        let token_id = parse_token_id(&order.token_id)?;

        let client = self.wallet.client();
        let signable = client
            .limit_order()
            .token_id(token_id)
            .side(sdk_side)
            .price(order.worst_price)
            .size(order.shares)
            .order_type(OrderType::FOK)
            .build()
            .await
            .map_err(|e| GatewayError::Exchange(e.to_string()))?;

        let signed = client
            .sign(self.wallet.signer(), signable)
            .await
            .map_err(|e| GatewayError::Exchange(e.to_string()))?;
        let response = client
            .post_order(signed)
            .await
            .map_err(|e| GatewayError::Exchange(e.to_string()))?;

        let status = format!("{:?}", response.status);
        let order_id = format!("{:?}", response.order_id).trim_matches('"').to_string();
        tracing::info!(order_id = %order_id, status = %status, token_id = %order.token_id, "Order submitted to CLOB");

        // a killed FOK order comes back unmatched
        if !status.to_lowercase().contains("matched") {
            return Err(GatewayError::Exchange(format!("order {order_id} not matched: {status}")));
        }

        Ok(OrderFill {
            order_id,
            filled_shares: order.shares,
            avg_price: order.worst_price,
            tx_hash: None,
        })
    }
}

/// Router for runs without CLOB credentials. The executor never reaches it in dry-run
/// mode; anything that does is refused.
pub struct DryRunRouter;

#[async_trait]
impl OrderRouter for DryRunRouter {
    async fn place_fok(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError> {
        Err(GatewayError::Exchange(format!(
            "order routing disabled, refusing {} {} of {}",
            order.side, order.shares, order.token_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_id_decimal_and_hex() {
        assert_eq!(parse_token_id("255").unwrap(), U256::from(255u64));
        assert_eq!(parse_token_id("0xff").unwrap(), U256::from(255u64));
        assert!(parse_token_id("not-a-number").is_err());
    }

    #[tokio::test]
    async fn test_dry_run_router_refuses() {
        let order = OrderRequest {
            token_id: "1".into(),
            side: Side::Buy,
            shares: rust_decimal::Decimal::ONE,
            worst_price: rust_decimal::Decimal::new(5, 1),
        };
        assert!(matches!(DryRunRouter.place_fok(&order).await, Err(GatewayError::Exchange(_))));
    }
}
