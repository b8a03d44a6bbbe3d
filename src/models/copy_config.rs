use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingMode {
    Percentage,
    FixedAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CopyDirection {
    Copy,
    Counter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlippageMode {
    /// Derive the allowed slippage from live order-book depth.
    Auto,
    /// Use the configured bound as-is.
    Fixed,
}

/// Error for unrecognised enum labels coming out of storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for SizingMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PERCENTAGE" => Ok(SizingMode::Percentage),
            "FIXED_AMOUNT" => Ok(SizingMode::FixedAmount),
            _ => Err(UnknownVariant { kind: "sizing mode", value: s.into() }),
        }
    }
}

impl FromStr for CopyDirection {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "COPY" => Ok(CopyDirection::Copy),
            "COUNTER" => Ok(CopyDirection::Counter),
            _ => Err(UnknownVariant { kind: "direction", value: s.into() }),
        }
    }
}

impl FromStr for SlippageMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AUTO" => Ok(SlippageMode::Auto),
            "FIXED" => Ok(SlippageMode::Fixed),
            _ => Err(UnknownVariant { kind: "slippage mode", value: s.into() }),
        }
    }
}

impl fmt::Display for SizingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingMode::Percentage => write!(f, "PERCENTAGE"),
            SizingMode::FixedAmount => write!(f, "FIXED_AMOUNT"),
        }
    }
}

// ---------------------------------------------------------------------------
// CopyConfig: a follower's standing instruction to copy one leader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyConfig {
    pub id: Uuid,
    pub wallet_address: Address,
    pub trader_address: Address,
    pub proxy_address: Address,
    pub mode: SizingMode,
    pub size_scale: Decimal,
    pub fixed_amount: Option<Decimal>,
    pub min_size_per_trade: Option<Decimal>,
    pub max_size_per_trade: Decimal,
    pub direction: CopyDirection,
    pub side_filter: Option<Side>,
    pub min_trigger_size_usd: Option<Decimal>,
    pub max_odds: Option<Decimal>,
    pub slippage_mode: SlippageMode,
    /// Fractional bound, e.g. 0.02 for 2%.
    pub max_slippage: Decimal,
    pub is_active: bool,
}

impl CopyConfig {
    /// A percentage-mode config with no filters; callers adjust fields as needed.
    pub fn percentage(
        trader_address: Address,
        proxy_address: Address,
        size_scale: Decimal,
        max_size_per_trade: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address: Address::ZERO,
            trader_address,
            proxy_address,
            mode: SizingMode::Percentage,
            size_scale,
            fixed_amount: None,
            min_size_per_trade: None,
            max_size_per_trade,
            direction: CopyDirection::Copy,
            side_filter: None,
            min_trigger_size_usd: None,
            max_odds: None,
            slippage_mode: SlippageMode::Auto,
            max_slippage: Decimal::new(5, 2),
            is_active: true,
        }
    }
}
