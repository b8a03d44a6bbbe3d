use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::execution::gateway::{GatewayError, MarketData, MarketResolution, OrderBook};

use super::clob_client::{ClobClient, ClobClientError};
use super::gamma_client::GammaClient;

/// Live `MarketData`: books from the CLOB, settlement from Gamma.
pub struct PolymarketMarketData {
    clob: ClobClient,
    gamma: GammaClient,
    // resolutions never change once observed
    resolved: Mutex<HashMap<String, MarketResolution>>,
}

impl PolymarketMarketData {
    pub fn new(clob: ClobClient, gamma: GammaClient) -> Self {
        Self {
            clob,
            gamma,
            resolved: Mutex::new(HashMap::new()),
        }
    }
}

impl From<ClobClientError> for GatewayError {
    fn from(e: ClobClientError) -> Self {
        match e {
            ClobClientError::NoBook(token) => GatewayError::NotFound(format!("order book for {token}")),
            other => GatewayError::Exchange(other.to_string()),
        }
    }
}

#[async_trait]
impl MarketData for PolymarketMarketData {
    async fn order_book(&self, token_id: &str) -> Result<OrderBook, GatewayError> {
        let book = self.clob.get_order_book(token_id).await?;
        Ok(book.into())
    }

    async fn resolution(&self, token_id: &str) -> Result<Option<MarketResolution>, GatewayError> {
        if let Some(r) = self.resolved.lock().unwrap_or_else(|p| p.into_inner()).get(token_id) {
            return Ok(Some(*r));
        }

        let market = self
            .gamma
            .market_by_token(token_id)
            .await
            .map_err(|e| GatewayError::Exchange(e.to_string()))?;

        let resolution = market.and_then(|m| m.resolution_for(token_id));
        if let Some(r) = resolution {
            tracing::info!(token_id, condition_id = %r.condition_id, payout = %r.payout_per_share, "Market resolved");
            self.resolved
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(token_id.to_string(), r);
        }
        Ok(resolution)
    }
}
