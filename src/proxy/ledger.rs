//! Client-side model of a follower's proxy contract.
//!
//! The contract is authoritative; this mirrors its accounting so execution can refuse
//! calls the contract would revert, and so fee previews match what a withdrawal charges.

use std::collections::HashSet;

use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeeTier {
    Starter,
    Pro,
    Whale,
}

impl FeeTier {
    pub fn fee_bps(&self) -> u32 {
        match self {
            FeeTier::Starter => 1_000,
            FeeTier::Pro => 500,
            FeeTier::Whale => 200,
        }
    }

    pub fn from_bps(bps: u32) -> Option<Self> {
        match bps {
            1_000 => Some(FeeTier::Starter),
            500 => Some(FeeTier::Pro),
            200 => Some(FeeTier::Whale),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProxyError {
    #[error("Execution paused")]
    Paused,

    #[error("Target not allowed: {0}")]
    TargetNotAllowed(Address),

    #[error("insufficient proxy balance: {available} < {required}")]
    InsufficientBalance { available: Decimal, required: Decimal },

    #[error("withdrawal of {requested} exceeds balance {balance}")]
    WithdrawExceedsBalance { requested: Decimal, balance: Decimal },
}

/// Snapshot of one proxy's on-chain state, in USDC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyAccount {
    pub address: Address,
    pub balance: Decimal,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub total_fees_paid: Decimal,
    pub fee_percent_bps: u32,
    pub allowed_targets: HashSet<Address>,
    pub is_paused: bool,
}

/// Result of previewing a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalPreview {
    pub fee: Decimal,
    pub net: Decimal,
}

impl ProxyAccount {
    pub fn new(address: Address, tier: FeeTier) -> Self {
        Self {
            address,
            balance: Decimal::ZERO,
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            total_fees_paid: Decimal::ZERO,
            fee_percent_bps: tier.fee_bps(),
            allowed_targets: HashSet::new(),
            is_paused: false,
        }
    }

    /// `balance + total_withdrawn - total_deposited`. Negative while in drawdown.
    pub fn profit(&self) -> Decimal {
        self.balance + self.total_withdrawn - self.total_deposited
    }

    pub fn tier(&self) -> Option<FeeTier> {
        FeeTier::from_bps(self.fee_percent_bps)
    }

    /// Performance fee charged for withdrawing `amount`.
    ///
    /// The fee applies to the share of realized profit being withdrawn:
    /// `bps/10000 × max(0, profit) × amount/balance`, bounded by the profit itself.
    pub fn withdrawal_fee(&self, amount: Decimal) -> Decimal {
        let profit = self.profit();
        if profit <= Decimal::ZERO || self.balance <= Decimal::ZERO || amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let fraction = (amount / self.balance).min(Decimal::ONE);
        let rate = Decimal::from(self.fee_percent_bps) / Decimal::from(BPS_DENOMINATOR);
        (rate * profit * fraction).min(profit)
    }

    pub fn preview_withdrawal(&self, amount: Decimal) -> Result<WithdrawalPreview, ProxyError> {
        if amount > self.balance {
            return Err(ProxyError::WithdrawExceedsBalance {
                requested: amount,
                balance: self.balance,
            });
        }
        let fee = self.withdrawal_fee(amount);
        Ok(WithdrawalPreview { fee, net: amount - fee })
    }

    /// Apply a deposit the way the contract books it.
    pub fn apply_deposit(&mut self, amount: Decimal) {
        self.balance += amount;
        self.total_deposited += amount;
    }

    /// Apply a withdrawal the way the contract books it: the full amount leaves the
    /// balance, the fee goes to the treasury and the rest to the owner.
    pub fn apply_withdrawal(&mut self, amount: Decimal) -> Result<WithdrawalPreview, ProxyError> {
        let preview = self.preview_withdrawal(amount)?;
        self.balance -= amount;
        self.total_withdrawn += amount;
        self.total_fees_paid += preview.fee;
        Ok(preview)
    }

    /// Checks the contract performs before `execute(target, data)`.
    pub fn check_execute(&self, target: Address) -> Result<(), ProxyError> {
        if self.is_paused {
            return Err(ProxyError::Paused);
        }
        if !self.allowed_targets.contains(&target) {
            return Err(ProxyError::TargetNotAllowed(target));
        }
        Ok(())
    }

    pub fn ensure_balance(&self, required: Decimal) -> Result<(), ProxyError> {
        if self.balance < required {
            return Err(ProxyError::InsufficientBalance {
                available: self.balance,
                required,
            });
        }
        Ok(())
    }
}
