use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use super::types::ApiOrderBook;

pub const CLOB_API_BASE: &str = "https://clob.polymarket.com";

#[derive(Debug, Error)]
pub enum ClobClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no order book for token {0}")]
    NoBook(String),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// Public (unauthenticated) CLOB endpoints.
#[derive(Debug, Clone)]
pub struct ClobClient {
    http: Client,
    base_url: String,
}

impl Default for ClobClient {
    fn default() -> Self {
        Self::new(CLOB_API_BASE)
    }
}

impl ClobClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the order book for a specific token.
    pub async fn get_order_book(&self, token_id: &str) -> Result<ApiOrderBook, ClobClientError> {
        let url = format!("{}/book", self.base_url);
        let resp = self.http.get(&url).query(&[("token_id", token_id)]).send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClobClientError::NoBook(token_id.to_string()));
        }

        let book: ApiOrderBook = resp.error_for_status()?.json().await?;
        Ok(book)
    }
}
