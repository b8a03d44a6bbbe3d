use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::execution::gateway::{BookLevel, OrderBook};

// ---------------------------------------------------------------------------
// Order Book (CLOB API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiOrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// `GET /book?token_id=..`. Prices and sizes arrive as decimal strings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiOrderBook {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub bids: Vec<ApiOrderBookLevel>,
    #[serde(default)]
    pub asks: Vec<ApiOrderBookLevel>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl From<ApiOrderBook> for OrderBook {
    fn from(book: ApiOrderBook) -> Self {
        let level = |l: ApiOrderBookLevel| BookLevel {
            price: l.price,
            size: l.size,
        };
        OrderBook::from_levels(
            book.bids.into_iter().map(level).collect(),
            book.asks.into_iter().map(level).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    #[test]
    fn test_book_payload_sorts_best_first() {
        // the CLOB lists bids ascending and asks descending
        let raw = r#"{
            "market": "0xabc",
            "asset_id": "123",
            "bids": [{"price": "0.40", "size": "100"}, {"price": "0.45", "size": "50"}],
            "asks": [{"price": "0.60", "size": "10"}, {"price": "0.55", "size": "20"}],
            "hash": "h",
            "timestamp": "1700000000000"
        }"#;
        let api: ApiOrderBook = serde_json::from_str(raw).unwrap();
        let book = OrderBook::from(api);

        assert_eq!(book.best_price(Side::Buy), Some(Decimal::new(55, 2)));
        assert_eq!(book.best_price(Side::Sell), Some(Decimal::new(45, 2)));
    }
}
