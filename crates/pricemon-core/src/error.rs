//! Error taxonomy for the monitoring pipeline.
//!
//! [`PriceError`] covers the pure normalization step. [`MonitorError`] is what
//! the reader, processor and loop return; only [`MonitorError::Config`] and
//! [`MonitorError::Fatal`] are meant to end the process.

use alloy::primitives::Address;
use pricemon_data::{ConfigError, StoreError};
use thiserror::Error;

/// Failures of the pure price math.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    /// Base reserve or sqrt price is zero.
    #[error("division by zero: {0} is zero")]
    DivisionByZero(&'static str),

    /// Both or neither token symbol is a configured stable coin.
    #[error("ambiguous stable side: {token0_symbol}/{token1_symbol} ({stable_count} stable)")]
    AmbiguousStableSide {
        token0_symbol: String,
        token1_symbol: String,
        stable_count: usize,
    },

    /// Base token is neither `token0` nor `token1` of the pool.
    #[error("token {token:#x} is not part of the pool")]
    TokenNotInPool { token: Address },
}

/// Pipeline failures.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("chain read failed for {address:#x} at block {block_number}: {reason}")]
    ChainRead {
        address: Address,
        block_number: u64,
        reason: String,
    },

    #[error("block {block_number} unavailable: {reason}")]
    BlockUnavailable { block_number: u64, reason: String },

    #[error("price computation failed for {pair} at block {block_number}: {source}")]
    Computation {
        pair: String,
        block_number: u64,
        #[source]
        source: PriceError,
    },

    #[error("persistence failed at block {block_number}: {source}")]
    Persistence {
        block_number: u64,
        #[source]
        source: StoreError,
    },

    #[error("fatal: {0}")]
    Fatal(String),
}

impl MonitorError {
    /// Short label used for the pair-failure counter.
    pub fn reason(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "config",
            MonitorError::ChainRead { .. } => "chain_read",
            MonitorError::BlockUnavailable { .. } => "block_unavailable",
            MonitorError::Computation {
                source: PriceError::DivisionByZero(_),
                ..
            } => "division_by_zero",
            MonitorError::Computation {
                source: PriceError::AmbiguousStableSide { .. },
                ..
            } => "ambiguous_stable_side",
            MonitorError::Computation { .. } => "computation",
            MonitorError::Persistence { .. } => "persistence",
            MonitorError::Fatal(_) => "fatal",
        }
    }
}
