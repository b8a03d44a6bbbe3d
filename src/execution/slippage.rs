use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Side, SlippageMode};

use super::gateway::{BookLevel, OrderBook};

/// Floor for depth-derived slippage (0.5%).
pub const MIN_AUTO_SLIPPAGE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Buffer multiplier applied on top of measured price impact.
const IMPACT_BUFFER: Decimal = Decimal::from_parts(12, 0, 0, false, 1);

/// Executable prices are kept inside the exchange's tick range.
const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
const MAX_PRICE: Decimal = Decimal::from_parts(999, 0, 0, false, 3);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlippageError {
    #[error("book holds {available} shares, {requested} requested")]
    InsufficientDepth { requested: Decimal, available: Decimal },

    #[error("price impact {impact} exceeds ceiling {ceiling}")]
    ImpactAboveCeiling { impact: Decimal, ceiling: Decimal },

    #[error("price drifted {drift} from leader price, max {max}")]
    Drift { drift: Decimal, max: Decimal },

    #[error("no reference price")]
    NoReference,
}

/// Slippage allowed for taking `shares` on `side`.
pub fn allowed_slippage(
    mode: SlippageMode,
    book: &OrderBook,
    side: Side,
    shares: Decimal,
    ceiling: Decimal,
) -> Result<Decimal, SlippageError> {
    match mode {
        SlippageMode::Fixed => Ok(ceiling),
        SlippageMode::Auto => dynamic_slippage(book.taker_levels(side), shares, ceiling),
    }
}

/// Walk `levels` (best first) until `shares` are covered and price the impact.
///
/// `impact = |worst - best| / best`; the result is `impact × 1.2`, floored at 0.5% and
/// capped at `ceiling`. A book that cannot cover the size, or whose raw impact already
/// exceeds the ceiling, is too thin.
pub fn dynamic_slippage(
    levels: &[BookLevel],
    shares: Decimal,
    ceiling: Decimal,
) -> Result<Decimal, SlippageError> {
    let best = levels.first().map(|l| l.price).ok_or(SlippageError::InsufficientDepth {
        requested: shares,
        available: Decimal::ZERO,
    })?;
    if best.is_zero() {
        return Err(SlippageError::NoReference);
    }

    let mut remaining = shares;
    let mut worst = best;
    let mut available = Decimal::ZERO;
    for level in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        worst = level.price;
        available += level.size;
        remaining -= level.size;
    }

    if remaining > Decimal::ZERO {
        return Err(SlippageError::InsufficientDepth {
            requested: shares,
            available,
        });
    }

    let impact = ((worst - best) / best).abs();
    if impact > ceiling {
        return Err(SlippageError::ImpactAboveCeiling { impact, ceiling });
    }

    Ok((impact * IMPACT_BUFFER).max(MIN_AUTO_SLIPPAGE).min(ceiling))
}

/// Reject when the current best price moved more than `max` away from the leader's.
pub fn check_drift(leader_price: Decimal, current: Decimal, max: Decimal) -> Result<Decimal, SlippageError> {
    if leader_price.is_zero() {
        return Err(SlippageError::NoReference);
    }
    let drift = ((current - leader_price) / leader_price).abs();
    if drift > max {
        return Err(SlippageError::Drift { drift, max });
    }
    Ok(drift)
}

/// Limit price for a taker: above best for a BUY, below for a SELL.
pub fn worst_price(best: Decimal, side: Side, slippage: Decimal) -> Decimal {
    let raw = match side {
        Side::Buy => best * (Decimal::ONE + slippage),
        Side::Sell => best * (Decimal::ONE - slippage),
    };
    raw.round_dp(3).clamp(MIN_PRICE, MAX_PRICE)
}
