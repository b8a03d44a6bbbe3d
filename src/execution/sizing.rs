use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::{
    CopyConfig, CopyDirection, CopyIntent, IntentStatus, SizingMode, TradeSignal,
};

/// Polymarket rejects marketable orders under $1.
pub const EXCHANGE_MIN_ORDER_USD: Decimal = Decimal::ONE;

/// Why a leader trade was not copied. Each filter has its own reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Inactive,
    Unpriced,
    SideFiltered,
    BelowTrigger { notional: Decimal, threshold: Decimal },
    AboveMaxOdds { price: Decimal, max_odds: Decimal },
    NonPositiveSize,
    BelowExchangeMinimum { size: Decimal },
}

impl RejectReason {
    /// Stable label for metrics and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Inactive => "inactive",
            RejectReason::Unpriced => "unpriced",
            RejectReason::SideFiltered => "side_filter",
            RejectReason::BelowTrigger { .. } => "min_trigger",
            RejectReason::AboveMaxOdds { .. } => "max_odds",
            RejectReason::NonPositiveSize => "non_positive_size",
            RejectReason::BelowExchangeMinimum { .. } => "below_exchange_min",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BelowTrigger { notional, threshold } => {
                write!(f, "notional {notional} below trigger {threshold}")
            }
            RejectReason::AboveMaxOdds { price, max_odds } => {
                write!(f, "price {price} above max odds {max_odds}")
            }
            RejectReason::BelowExchangeMinimum { size } => {
                write!(f, "copy size {size} below exchange minimum")
            }
            other => f.write_str(other.code()),
        }
    }
}

/// Inputs to intent construction that come from the runtime, not the trade.
#[derive(Debug, Clone, Copy)]
pub struct IntentContext {
    pub now: DateTime<Utc>,
    pub pending_ttl: Duration,
    pub idempotency_bucket_ms: i64,
}

impl IntentContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            pending_ttl: Duration::minutes(10),
            idempotency_bucket_ms: 5_000,
        }
    }
}

/// Decide whether `config` copies `signal` and build the intent if so.
///
/// Filters run against the leader's original side; the COUNTER flip happens after.
pub fn evaluate(
    signal: &TradeSignal,
    config: &CopyConfig,
    ctx: &IntentContext,
) -> Result<CopyIntent, RejectReason> {
    if !config.is_active {
        return Err(RejectReason::Inactive);
    }
    let price = signal.unit_price.ok_or(RejectReason::Unpriced)?;
    let notional = signal.size_shares * price;

    if let Some(side) = config.side_filter {
        if side != signal.side {
            return Err(RejectReason::SideFiltered);
        }
    }

    if let Some(threshold) = config.min_trigger_size_usd {
        if notional < threshold {
            return Err(RejectReason::BelowTrigger { notional, threshold });
        }
    }

    if let Some(max_odds) = config.max_odds {
        if price > max_odds {
            return Err(RejectReason::AboveMaxOdds { price, max_odds });
        }
    }

    let copy_side = match config.direction {
        CopyDirection::Copy => signal.side,
        CopyDirection::Counter => signal.side.flipped(),
    };

    let copy_size = copy_size(config, notional);
    if copy_size <= Decimal::ZERO {
        return Err(RejectReason::NonPositiveSize);
    }
    if copy_size < EXCHANGE_MIN_ORDER_USD {
        return Err(RejectReason::BelowExchangeMinimum { size: copy_size });
    }

    Ok(CopyIntent {
        idempotency_key: idempotency_key(signal, config, ctx.idempotency_bucket_ms),
        config_id: config.id,
        wallet_address: config.wallet_address,
        proxy_address: config.proxy_address,
        trader_address: signal.trader_address,
        token_id: signal.token_id.clone(),
        copy_side,
        copy_size_usd: copy_size,
        leader_price: price,
        leader_tx_hash: signal.tx_hash,
        source: signal.source,
        slippage_mode: config.slippage_mode,
        max_slippage: config.max_slippage,
        gas: signal.gas,
        expires_at: ctx.now + ctx.pending_ttl,
        status: IntentStatus::Pending,
        attempt: 0,
        error_message: None,
    })
}

/// USDC size of the copy for a leader trade worth `leader_notional`.
///
/// FIXED_AMOUNT ignores the leader size and the minimum. PERCENTAGE scales, widens up to
/// the minimum, then caps at the maximum, which is always the last word.
pub fn copy_size(config: &CopyConfig, leader_notional: Decimal) -> Decimal {
    let size = match config.mode {
        SizingMode::FixedAmount => config
            .fixed_amount
            .unwrap_or(Decimal::ZERO)
            .min(config.max_size_per_trade),
        SizingMode::Percentage => {
            let scaled = leader_notional * config.size_scale;
            let widened = match config.min_size_per_trade {
                Some(min) if scaled < min => min,
                _ => scaled,
            };
            widened.min(config.max_size_per_trade)
        }
    };
    size.round_dp(6)
}

/// Key that makes re-detections of the same leader trade collide.
///
/// With a tx hash: `sha256("tx:{config}:{hash}")`, so the mempool and settlement sightings
/// of one transaction agree. Without one the key falls back to the trade's shape inside
/// a time bucket.
pub fn idempotency_key(signal: &TradeSignal, config: &CopyConfig, bucket_ms: i64) -> String {
    let raw = match signal.tx_hash {
        Some(hash) => format!("tx:{}:{}", config.id, alloy::hex::encode_prefixed(hash)),
        None => {
            let bucket = signal.observed_at_ms / bucket_ms.max(1);
            [
                "fallback".to_string(),
                config.id.to_string(),
                signal.token_id.clone(),
                signal.side.to_string(),
                format!("{:.6}", signal.size_shares),
                format!("{:.6}", signal.unit_price.unwrap_or(Decimal::ZERO)),
                bucket.to_string(),
            ]
            .join("|")
        }
    };

    alloy::hex::encode(Sha256::digest(raw.as_bytes()))
}
