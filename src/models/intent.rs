use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::copy_config::UnknownVariant;
use super::{GasHint, Side, SignalSource, SlippageMode};

/// Error message recorded when a PENDING intent outlives its expiry.
pub const PENDING_EXPIRED: &str = "PENDING_EXPIRED";

/// Error message recorded when a pre-confirmation SELL reaches a resolved market. The
/// confirmed sighting of the same trade reopens the row.
pub const UNCONFIRMED_SETTLEMENT: &str = "UNCONFIRMED_SETTLEMENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentStatus {
    Pending,
    Processing,
    Executed,
    Failed,
    Expired,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "PENDING",
            IntentStatus::Processing => "PROCESSING",
            IntentStatus::Executed => "EXECUTED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            IntentStatus::Pending | IntentStatus::Processing => false,
            IntentStatus::Executed | IntentStatus::Failed | IntentStatus::Expired => true,
        }
    }
}

impl FromStr for IntentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(IntentStatus::Pending),
            "PROCESSING" => Ok(IntentStatus::Processing),
            "EXECUTED" => Ok(IntentStatus::Executed),
            "FAILED" => Ok(IntentStatus::Failed),
            "EXPIRED" => Ok(IntentStatus::Expired),
            _ => Err(UnknownVariant { kind: "intent status", value: s.into() }),
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CopyIntent: candidate copy order, also the queue job payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyIntent {
    pub idempotency_key: String,
    pub config_id: Uuid,
    pub wallet_address: Address,
    pub proxy_address: Address,
    pub trader_address: Address,
    pub token_id: String,
    pub copy_side: Side,
    pub copy_size_usd: Decimal,
    pub leader_price: Decimal,
    pub leader_tx_hash: Option<B256>,
    pub source: SignalSource,
    pub slippage_mode: SlippageMode,
    pub max_slippage: Decimal,
    #[serde(default)]
    pub gas: Option<GasHint>,
    pub expires_at: DateTime<Utc>,
    pub status: IntentStatus,
    pub attempt: u32,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl CopyIntent {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Share count implied by the USDC size at the leader's price.
    pub fn approx_shares(&self) -> Decimal {
        if self.leader_price.is_zero() {
            Decimal::ZERO
        } else {
            (self.copy_size_usd / self.leader_price).round_dp(6)
        }
    }
}
