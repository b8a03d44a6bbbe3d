use std::time::Duration;

use alloy::primitives::B256;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::gateway::MarketResolution;

pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// Outcome prices at or beyond these bounds on a closed market count as settled.
const WIN_PRICE: Decimal = Decimal::from_parts(95, 0, 0, false, 2);
const LOSS_PRICE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

#[derive(Debug, Error)]
pub enum GammaClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GammaMarket {
    #[serde(alias = "conditionId")]
    pub condition_id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub closed: bool,
    /// Stringified JSON array of outcome labels, e.g. `"[\"Yes\",\"No\"]"`.
    #[serde(default)]
    pub outcomes: Option<String>,
    /// Stringified JSON array of prices, index-aligned with `clob_token_ids`.
    #[serde(default, alias = "outcomePrices")]
    pub outcome_prices: Option<String>,
    /// Stringified JSON array of token IDs, e.g. "[\"token1\", \"token2\"]"
    #[serde(default, alias = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
}

impl GammaMarket {
    /// Parse the stringified clobTokenIds into a Vec of token ID strings.
    pub fn parse_token_ids(&self) -> Vec<String> {
        parse_string_array(self.clob_token_ids.as_deref())
    }

    pub fn parse_outcome_prices(&self) -> Vec<Decimal> {
        parse_string_array(self.outcome_prices.as_deref())
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    /// Settlement for `token_id`, once the market is closed and its price has
    /// converged to a winner (1) or loser (0).
    pub fn resolution_for(&self, token_id: &str) -> Option<MarketResolution> {
        if !self.closed {
            return None;
        }
        let index = self.parse_token_ids().iter().position(|t| t == token_id)?;
        let price = *self.parse_outcome_prices().get(index)?;
        let condition_id = self.condition_id.parse::<B256>().ok()?;

        let payout_per_share = if price >= WIN_PRICE {
            Decimal::ONE
        } else if price <= LOSS_PRICE {
            Decimal::ZERO
        } else {
            return None;
        };

        Some(MarketResolution {
            condition_id,
            payout_per_share,
        })
    }
}

fn parse_string_array(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct GammaClient {
    http: Client,
    base_url: String,
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new(GAMMA_API_BASE)
    }
}

impl GammaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Look up the market that lists `token_id` among its outcome tokens.
    pub async fn market_by_token(&self, token_id: &str) -> Result<Option<GammaMarket>, GammaClientError> {
        let url = format!("{}/markets", self.base_url);
        let markets: Vec<GammaMarket> = self
            .http
            .get(&url)
            .query(&[("clob_token_ids", token_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(markets.into_iter().find(|m| m.parse_token_ids().iter().any(|t| t == token_id)))
    }
}
