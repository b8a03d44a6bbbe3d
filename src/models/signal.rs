use alloy::primitives::{Address, B256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Side;

/// Which detection channel produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalSource {
    Mempool,
    ChainEvent,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Mempool => "MEMPOOL",
            SignalSource::ChainEvent => "CHAIN_EVENT",
        }
    }

    /// Confirmed settlement events are the only source allowed to drive settlement.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, SignalSource::ChainEvent)
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EIP-1559 fee fields observed on a leader's pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasHint {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl GasHint {
    /// Scale both fee fields by `percent / 100` (e.g. 115 for a 15% boost).
    pub fn boosted(&self, percent: u64) -> Self {
        let p = U256::from(percent);
        let hundred = U256::from(100u64);
        Self {
            max_fee_per_gas: self.max_fee_per_gas * p / hundred,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas * p / hundred,
        }
    }
}

// ---------------------------------------------------------------------------
// TradeSignal: one observed trade by a monitored leader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub source: SignalSource,
    pub trader_address: Address,
    /// ERC-1155 position id as a decimal string.
    pub token_id: String,
    pub side: Side,
    pub size_shares: Decimal,
    /// USDC per share, 6 decimal places. Mempool transfers carry no price until priced.
    pub unit_price: Option<Decimal>,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
    pub observed_at_ms: i64,
    pub confirmed: bool,
    #[serde(default)]
    pub gas: Option<GasHint>,
}

impl TradeSignal {
    /// Only confirmed settlement events may feed accounting.
    pub fn is_authoritative(&self) -> bool {
        self.confirmed && self.source.is_authoritative()
    }

    /// Leader notional in USDC, when the signal is priced.
    pub fn notional(&self) -> Option<Decimal> {
        self.unit_price.map(|p| self.size_shares * p)
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.unit_price = Some(price.round_dp(6));
        self
    }
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = &self.token_id[..12.min(self.token_id.len())];
        write!(
            f,
            "Signal[{}]: trader={} side={} shares={} price={} token={}",
            self.source,
            self.trader_address,
            self.side,
            self.size_shares,
            self.unit_price.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
            token,
        )
    }
}
