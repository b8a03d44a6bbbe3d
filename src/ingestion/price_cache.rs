use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::execution::gateway::MarketData;
use crate::models::Side;

pub const PRICE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct Quote {
    fetched_at: Instant,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
}

/// Top-of-book prices for pricing mempool transfers, cached briefly per token.
pub struct PriceCache {
    market: Arc<dyn MarketData>,
    ttl: Duration,
    quotes: Mutex<HashMap<String, Quote>>,
}

impl PriceCache {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self::with_ttl(market, PRICE_TTL)
    }

    pub fn with_ttl(market: Arc<dyn MarketData>, ttl: Duration) -> Self {
        Self {
            market,
            ttl,
            quotes: Mutex::new(HashMap::new()),
        }
    }

    /// What a taker on `side` would pay right now: best ask for a BUY, best bid for a SELL.
    /// `None` when the book is empty on that side or cannot be fetched.
    pub async fn price_for(&self, token_id: &str, side: Side) -> Option<Decimal> {
        let cached = self
            .quotes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(token_id)
            .copied()
            .filter(|q| q.fetched_at.elapsed() < self.ttl);

        let quote = match cached {
            Some(q) => q,
            None => {
                let book = match self.market.order_book(token_id).await {
                    Ok(book) => book,
                    Err(e) => {
                        tracing::debug!(token_id, error = %e, "Order book unavailable for pricing");
                        return None;
                    }
                };
                let q = Quote {
                    fetched_at: Instant::now(),
                    best_bid: book.best_price(Side::Sell),
                    best_ask: book.best_price(Side::Buy),
                };
                self.quotes
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(token_id.to_string(), q);
                q
            }
        };

        let price = match side {
            Side::Buy => quote.best_ask,
            Side::Sell => quote.best_bid,
        };
        price.filter(|p| *p > Decimal::ZERO && *p < Decimal::ONE)
    }

    /// Drop quotes older than the TTL.
    pub fn evict_stale(&self) {
        let ttl = self.ttl;
        self.quotes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, q| q.fetched_at.elapsed() < ttl);
    }
}
