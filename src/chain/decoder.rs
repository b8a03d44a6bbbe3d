//! Pure decoding of CTF transfer calldata and exchange fill logs into `TradeSignal`s.
//!
//! Nothing in here performs I/O; both listeners feed raw provider payloads through these
//! functions so the decode rules live in one place.

use std::collections::HashSet;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::sol_types::SolInterface;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use super::abi::{IConditionalTokens::IConditionalTokensCalls, ORDER_FILLED_TOPIC, TOKEN_DECIMALS};
use crate::models::{GasHint, Side, SignalSource, TradeSignal};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("calldata is not a CTF transfer: {0}")]
    UnknownCall(String),

    #[error("log is not an OrderFilled event")]
    NotOrderFilled,

    #[error("OrderFilled data too short: {0} bytes")]
    ShortData(usize),

    #[error("batch transfer has {ids} ids but {amounts} amounts")]
    BatchLengthMismatch { ids: usize, amounts: usize },

    #[error("amount does not fit a decimal: {0}")]
    Overflow(U256),

    #[error("amount has no on-chain unit form: {0}")]
    AmountOutOfRange(Decimal),
}

// ---------------------------------------------------------------------------
// Raw provider payloads
// ---------------------------------------------------------------------------

/// A log as delivered by `eth_subscribe("logs")` or `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub log_index: Option<U64>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// Dedupe key: `(tx_hash, log_index)`.
    pub fn identity(&self) -> Option<(B256, u64)> {
        Some((self.transaction_hash?, self.log_index?.to::<u64>()))
    }
}

/// A full pending transaction object from a mempool subscription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTx {
    pub hash: B256,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U256>,
}

impl PendingTx {
    pub fn gas_hint(&self) -> Option<GasHint> {
        Some(GasHint {
            max_fee_per_gas: self.max_fee_per_gas?,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas?,
        })
    }
}

// ---------------------------------------------------------------------------
// ERC-1155 transfer calldata
// ---------------------------------------------------------------------------

/// One id/amount leg of a CTF transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLeg {
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    pub amount: U256,
}

/// Decode `safeTransferFrom` / `safeBatchTransferFrom` calldata. Batches fan out into one
/// leg per id/amount pair.
pub fn decode_ctf_transfer(input: &[u8]) -> Result<Vec<TransferLeg>, DecodeError> {
    let call = IConditionalTokensCalls::abi_decode(input)
        .map_err(|e| DecodeError::UnknownCall(e.to_string()))?;

    match call {
        IConditionalTokensCalls::safeTransferFrom(c) => Ok(vec![TransferLeg {
            from: c.from,
            to: c.to,
            token_id: c.id,
            amount: c.value,
        }]),
        IConditionalTokensCalls::safeBatchTransferFrom(c) => {
            if c.ids.len() != c.values.len() {
                return Err(DecodeError::BatchLengthMismatch {
                    ids: c.ids.len(),
                    amounts: c.values.len(),
                });
            }
            Ok(c.ids
                .into_iter()
                .zip(c.values)
                .map(|(token_id, amount)| TransferLeg {
                    from: c.from,
                    to: c.to,
                    token_id,
                    amount,
                })
                .collect())
        }
        other => Err(DecodeError::UnknownCall(format!("{:?}", other.selector()))),
    }
}

/// Turn a pending CTF transaction into provisional signals for monitored traders.
///
/// A leg received by a monitored address is a BUY by that address; a leg sent by one is
/// a SELL. Transactions to any other contract yield nothing.
pub fn decode_pending_tx(
    tx: &PendingTx,
    ctf_contract: Address,
    monitored: &HashSet<Address>,
    now_ms: i64,
) -> Result<Vec<TradeSignal>, DecodeError> {
    if tx.to != Some(ctf_contract) {
        return Ok(Vec::new());
    }

    let legs = decode_ctf_transfer(&tx.input)?;
    let mut signals = Vec::with_capacity(legs.len());

    for leg in legs {
        let (trader, side) = if monitored.contains(&leg.to) {
            (leg.to, Side::Buy)
        } else if monitored.contains(&leg.from) {
            (leg.from, Side::Sell)
        } else {
            continue;
        };

        let shares = units_to_decimal(leg.amount)?;
        if shares.is_zero() {
            continue;
        }

        signals.push(TradeSignal {
            source: SignalSource::Mempool,
            trader_address: trader,
            token_id: leg.token_id.to_string(),
            side,
            size_shares: shares,
            unit_price: None,
            tx_hash: Some(tx.hash),
            log_index: None,
            observed_at_ms: now_ms,
            confirmed: false,
            gas: tx.gas_hint(),
        });
    }

    Ok(signals)
}

// ---------------------------------------------------------------------------
// OrderFilled logs
// ---------------------------------------------------------------------------

/// A USDC-denominated fill, seen from the maker's side.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFill {
    pub maker: Address,
    pub taker: Address,
    pub side: Side,
    pub token_id: U256,
    pub shares: Decimal,
    pub price: Decimal,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl DecodedFill {
    pub fn into_signal(self, now_ms: i64) -> TradeSignal {
        TradeSignal {
            source: SignalSource::ChainEvent,
            trader_address: self.maker,
            token_id: self.token_id.to_string(),
            side: self.side,
            size_shares: self.shares,
            unit_price: Some(self.price),
            tx_hash: self.tx_hash,
            log_index: self.log_index,
            observed_at_ms: now_ms,
            confirmed: true,
            gas: None,
        }
    }
}

/// Decode an `OrderFilled` log.
///
/// `makerAssetId == 0` means the maker paid USDC (BUY of the taker asset);
/// `takerAssetId == 0` means the maker received USDC (SELL of the maker asset).
/// Token-for-token fills and zero-share fills return `Ok(None)`.
pub fn decode_order_filled(log: &RawLog) -> Result<Option<DecodedFill>, DecodeError> {
    if log.topics.len() < 4 || log.topics[0] != ORDER_FILLED_TOPIC {
        return Err(DecodeError::NotOrderFilled);
    }

    // topics[1] = orderHash, topics[2] = maker, topics[3] = taker
    let maker = topic_address(&log.topics[2]);
    let taker = topic_address(&log.topics[3]);

    // data: makerAssetId, takerAssetId, makerAmountFilled, takerAmountFilled, fee
    let data = log.data.as_ref();
    if data.len() < 5 * 32 {
        return Err(DecodeError::ShortData(data.len()));
    }
    let word = |i: usize| U256::from_be_slice(&data[i * 32..(i + 1) * 32]);
    let maker_asset_id = word(0);
    let taker_asset_id = word(1);
    let maker_amount = word(2);
    let taker_amount = word(3);

    let (side, token_id, share_units, usdc_units) = if maker_asset_id.is_zero() {
        (Side::Buy, taker_asset_id, taker_amount, maker_amount)
    } else if taker_asset_id.is_zero() {
        (Side::Sell, maker_asset_id, maker_amount, taker_amount)
    } else {
        return Ok(None);
    };

    if share_units.is_zero() {
        return Ok(None);
    }

    let shares = units_to_decimal(share_units)?;
    let usdc = units_to_decimal(usdc_units)?;

    Ok(Some(DecodedFill {
        maker,
        taker,
        side,
        token_id,
        shares,
        price: (usdc / shares).round_dp(TOKEN_DECIMALS),
        tx_hash: log.transaction_hash,
        log_index: log.log_index.map(|i| i.to::<u64>()),
    }))
}

/// Extract a 20-byte address from a 32-byte zero-padded topic.
pub fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

/// Convert 6-decimal on-chain units to a `Decimal`.
pub fn units_to_decimal(units: U256) -> Result<Decimal, DecodeError> {
    let raw = u128::try_from(units).map_err(|_| DecodeError::Overflow(units))?;
    let raw = i128::try_from(raw).map_err(|_| DecodeError::Overflow(units))?;
    Decimal::try_from_i128_with_scale(raw, TOKEN_DECIMALS).map_err(|_| DecodeError::Overflow(units))
}

/// Convert a `Decimal` amount to 6-decimal on-chain units, truncating extra precision.
///
/// Negative amounts and amounts too large to scale are rejected.
pub fn decimal_to_units(amount: Decimal) -> Result<U256, DecodeError> {
    let scaled = amount
        .checked_mul(Decimal::from(10u64.pow(TOKEN_DECIMALS)))
        .ok_or(DecodeError::AmountOutOfRange(amount))?
        .trunc();
    let raw = u128::try_from(scaled.mantissa() / 10i128.pow(scaled.scale()))
        .map_err(|_| DecodeError::AmountOutOfRange(amount))?;
    Ok(U256::from(raw))
}
