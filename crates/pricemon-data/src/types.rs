//! Type definitions for tracked pools and the samples derived from them.

use alloy::primitives::Address;
use bigdecimal::BigDecimal;
use std::fmt;
use std::str::FromStr;

/// Timestamp format used for the human-readable sample datetime (UTC).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Liquidity pool flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolType {
    /// Constant-product pool exposing `getReserves()`.
    V2,
    /// Concentrated-liquidity pool exposing `slot0()`.
    V3,
}

impl PoolType {
    /// Lowercase label as written in configuration and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::V2 => "v2",
            PoolType::V3 => "v3",
        }
    }
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v2" => Ok(PoolType::V2),
            "v3" => Ok(PoolType::V3),
            other => Err(format!("unknown pool type '{other}', expected v2 or v3")),
        }
    }
}

/// A configured pool whose price is sampled every block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedPair {
    /// Unique pair name, e.g. `"WBNB/USDT-pancake-v2"`.
    pub name: String,
    /// Pool contract address.
    pub pool_address: Address,
    /// Pool flavour.
    pub pool_type: PoolType,
    /// Expected token0 from configuration (cross-check only).
    pub token0_address: Option<Address>,
    /// Expected token1 from configuration (cross-check only).
    pub token1_address: Option<Address>,
}

impl TrackedPair {
    /// Returns `false` when configuration names tokens that are not the pool's
    /// on-chain pair. Order is irrelevant; missing config entries always match.
    pub fn matches_tokens(&self, token0: Address, token1: Address) -> bool {
        let on_chain = [token0, token1];
        [self.token0_address, self.token1_address]
            .iter()
            .flatten()
            .all(|configured| on_chain.contains(configured))
    }
}

/// Block header fields the monitor needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number.
    pub number: u64,
    /// Block hash (hex text), if the node reported one.
    pub hash: Option<String>,
    /// Timestamp in unix seconds.
    pub timestamp: u64,
}

/// One normalized price observation for a pair at a block.
///
/// Natural key is `(pair_name, block_number)`.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSample {
    /// Block the pool state was read at.
    pub block_number: u64,
    /// Pool contract address.
    pub pool_address: Address,
    /// Pool flavour.
    pub pool_type: PoolType,
    /// Tracked pair name.
    pub pair_name: String,
    /// Quote (stable) units per one base unit.
    pub price_base_in_quote: BigDecimal,
    /// Symbol of the non-stable side.
    pub base_symbol: String,
    /// Symbol of the stable side.
    pub quote_symbol: String,
    /// On-chain block timestamp in unix seconds.
    pub timestamp: u64,
}

impl PriceSample {
    /// Block timestamp rendered as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn datetime(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

/// Percentage price difference between two pairs at the same block.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviationSample {
    /// Lexicographically smaller pair name.
    pub pair_a: String,
    /// Lexicographically larger pair name.
    pub pair_b: String,
    /// Block both prices were read at.
    pub block_number: u64,
    /// `|p1 - p2| / mean(p1, p2) * 100`.
    pub deviation_pct: BigDecimal,
}

impl DeviationSample {
    /// Metric label for this combination, stable under argument order.
    pub fn label(&self) -> String {
        format!("{}_{}", self.pair_a, self.pair_b)
    }
}

/// Aggregate view of the stored samples for one pair.
#[derive(Clone, Debug, PartialEq)]
pub struct PairSummary {
    /// Tracked pair name.
    pub pair_name: String,
    /// Number of stored samples.
    pub samples: u64,
    /// Lowest stored block.
    pub first_block: u64,
    /// Highest stored block.
    pub last_block: u64,
    /// Price stored at `last_block` (decimal text).
    pub last_price: String,
}

/// Render unix seconds as `YYYY-MM-DD HH:MM:SS` in UTC, or an empty string if
/// the value is out of chrono's range.
pub fn format_timestamp(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
        .unwrap_or_default()
}
