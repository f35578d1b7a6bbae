//! Price normalization and cross-pair deviation.
//!
//! ## Math
//!
//! V2 pools hold reserves, so the price of one base unit is
//! `reserve_quote / reserve_base`.
//!
//! V3 pools hold `sqrtPriceX96 = sqrt(token1 / token0) * 2^96`, so
//!
//! ```text
//! P(token0 in token1) = sqrtPriceX96^2 / 2^192
//! P(token1 in token0) = 2^192 / sqrtPriceX96^2
//! ```
//!
//! `sqrtPriceX96` is a uint160 and its square needs up to 320 bits, beyond
//! `U256`. Everything here runs on `BigInt`/`BigDecimal`; `f64` only appears
//! when a value is handed to the metrics exporter.
//!
//! Prices are in raw token units; no decimals adjustment is applied.

use alloy::primitives::{Address, U256};
use bigdecimal::{BigDecimal, Zero};
use num_bigint::{BigInt, Sign};
use pricemon_data::DeviationSample;
use std::collections::BTreeMap;

use crate::error::PriceError;
use crate::pool::{PoolReserves, PoolState};

/// Which pool token is base (non-stable) and which is quote (stable).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sides {
    pub base: Address,
    pub base_symbol: String,
    pub quote: Address,
    pub quote_symbol: String,
}

/// Converts raw pool state into quote units per one base unit.
///
/// # Errors
/// - [`PriceError::TokenNotInPool`] if `base` is neither pool token.
/// - [`PriceError::DivisionByZero`] on a zero reserve or zero sqrt price.
pub fn normalize(state: &PoolState, base: Address) -> Result<BigDecimal, PriceError> {
    let base_is_token0 = if base == state.token0 {
        true
    } else if base == state.token1 {
        false
    } else {
        return Err(PriceError::TokenNotInPool { token: base });
    };

    let price = match &state.reserves {
        PoolReserves::V2 { reserve0, reserve1 } => {
            if reserve0.is_zero() {
                return Err(PriceError::DivisionByZero("reserve0"));
            }
            if reserve1.is_zero() {
                return Err(PriceError::DivisionByZero("reserve1"));
            }
            let (base_reserve, quote_reserve) = if base_is_token0 {
                (reserve0, reserve1)
            } else {
                (reserve1, reserve0)
            };
            to_decimal(*quote_reserve) / to_decimal(*base_reserve)
        }
        PoolReserves::V3 { sqrt_price_x96 } => {
            if sqrt_price_x96.is_zero() {
                return Err(PriceError::DivisionByZero("sqrtPriceX96"));
            }
            let sqrt = to_bigint(*sqrt_price_x96);
            let squared = BigDecimal::new(&sqrt * &sqrt, 0);
            let q192 = BigDecimal::new(BigInt::from(1u8) << 192, 0);
            if base_is_token0 {
                squared / q192
            } else {
                q192 / squared
            }
        }
    };

    Ok(price.normalized())
}

/// Decides the base/quote sides from token symbols.
///
/// Exactly one symbol must be stable; anything else is
/// [`PriceError::AmbiguousStableSide`].
pub fn resolve_sides(
    (token0, token0_symbol): (Address, &str),
    (token1, token1_symbol): (Address, &str),
    is_stable: impl Fn(&str) -> bool,
) -> Result<Sides, PriceError> {
    match (is_stable(token0_symbol), is_stable(token1_symbol)) {
        (false, true) => Ok(Sides {
            base: token0,
            base_symbol: token0_symbol.to_string(),
            quote: token1,
            quote_symbol: token1_symbol.to_string(),
        }),
        (true, false) => Ok(Sides {
            base: token1,
            base_symbol: token1_symbol.to_string(),
            quote: token0,
            quote_symbol: token0_symbol.to_string(),
        }),
        (a, b) => Err(PriceError::AmbiguousStableSide {
            token0_symbol: token0_symbol.to_string(),
            token1_symbol: token1_symbol.to_string(),
            stable_count: usize::from(a) + usize::from(b),
        }),
    }
}

/// `|p1 - p2| / ((p1 + p2) / 2) * 100`.
///
/// # Errors
/// Returns [`PriceError::DivisionByZero`] if both prices sum to zero.
pub fn deviation_pct(p1: &BigDecimal, p2: &BigDecimal) -> Result<BigDecimal, PriceError> {
    let sum = p1 + p2;
    if sum.is_zero() {
        return Err(PriceError::DivisionByZero("mean price"));
    }
    let diff = (p1 - p2).abs();
    Ok((diff * BigDecimal::from(200) / sum).normalized())
}

/// Deviation for every unordered combination of pairs priced at `block_number`.
///
/// Pairs absent from `prices` are simply not combined. Output is ordered and
/// each sample has `pair_a < pair_b`.
pub fn deviations_for(
    block_number: u64,
    prices: &BTreeMap<String, BigDecimal>,
) -> Vec<DeviationSample> {
    let entries: Vec<(&String, &BigDecimal)> = prices.iter().collect();
    let mut out = Vec::new();

    for (i, (name_a, price_a)) in entries.iter().enumerate() {
        for (name_b, price_b) in &entries[i + 1..] {
            match deviation_pct(price_a, price_b) {
                Ok(deviation_pct) => out.push(DeviationSample {
                    pair_a: (*name_a).clone(),
                    pair_b: (*name_b).clone(),
                    block_number,
                    deviation_pct,
                }),
                Err(error) => tracing::warn!(
                    block_number,
                    pair_a = %name_a,
                    pair_b = %name_b,
                    error = %error,
                    "skipping deviation"
                ),
            }
        }
    }

    out
}

fn to_bigint(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

fn to_decimal(value: U256) -> BigDecimal {
    BigDecimal::new(to_bigint(value), 0)
}
