//! Point-in-time pool state reads.
//!
//! Token addresses and symbols never change for a deployed contract, so they
//! are fetched once and cached for the life of the reader. Reserves and
//! `slot0` are always read at the requested block.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use pricemon_data::{ChainClient, PoolType};
use std::sync::Arc;

use crate::abi::{IERC20Metadata, IERC20MetadataBytes32, IUniswapV2Pair, IUniswapV3Pool};
use crate::error::MonitorError;
use crate::retry::RetryPolicy;

/// Block-scoped pool reserves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolReserves {
    V2 { reserve0: U256, reserve1: U256 },
    V3 { sqrt_price_x96: U256 },
}

/// Snapshot of one pool at one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolState {
    pub token0: Address,
    pub token1: Address,
    pub reserves: PoolReserves,
}

impl PoolState {
    pub fn pool_type(&self) -> PoolType {
        match self.reserves {
            PoolReserves::V2 { .. } => PoolType::V2,
            PoolReserves::V3 { .. } => PoolType::V3,
        }
    }
}

/// Reads pool and token state through a [`ChainClient`].
pub struct PoolReader {
    chain: Arc<dyn ChainClient>,
    retry: RetryPolicy,
    tokens: DashMap<Address, (Address, Address)>,
    symbols: DashMap<Address, String>,
}

impl PoolReader {
    pub fn new(chain: Arc<dyn ChainClient>, retry: RetryPolicy) -> Self {
        Self {
            chain,
            retry,
            tokens: DashMap::new(),
            symbols: DashMap::new(),
        }
    }

    /// Reads token order and reserves (V2) or `sqrtPriceX96` (V3) at `block_number`.
    ///
    /// # Errors
    /// Returns [`MonitorError::ChainRead`] if any call fails after retries or
    /// its output cannot be decoded.
    #[tracing::instrument(skip(self), fields(pool = %format!("{pool:#x}")))]
    pub async fn read(
        &self,
        pool: Address,
        pool_type: PoolType,
        block_number: u64,
    ) -> Result<PoolState, MonitorError> {
        let (token0, token1) = self.tokens(pool, pool_type, block_number).await?;

        let reserves = match pool_type {
            PoolType::V2 => {
                let reserves = self
                    .call(pool, IUniswapV2Pair::getReservesCall {}, block_number)
                    .await?;
                PoolReserves::V2 {
                    reserve0: U256::from(reserves.reserve0),
                    reserve1: U256::from(reserves.reserve1),
                }
            }
            PoolType::V3 => {
                let slot0 = self
                    .call(pool, IUniswapV3Pool::slot0Call {}, block_number)
                    .await?;
                PoolReserves::V3 {
                    sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
                }
            }
        };

        Ok(PoolState {
            token0,
            token1,
            reserves,
        })
    }

    /// On-chain `(token0, token1)` of `pool`, cached after the first read.
    ///
    /// # Errors
    /// Returns [`MonitorError::ChainRead`] if either call fails.
    pub async fn tokens(
        &self,
        pool: Address,
        pool_type: PoolType,
        block_number: u64,
    ) -> Result<(Address, Address), MonitorError> {
        if let Some(cached) = self.tokens.get(&pool).map(|entry| *entry.value()) {
            return Ok(cached);
        }

        let tokens = match pool_type {
            PoolType::V2 => (
                self.call(pool, IUniswapV2Pair::token0Call {}, block_number)
                    .await?
                    ._0,
                self.call(pool, IUniswapV2Pair::token1Call {}, block_number)
                    .await?
                    ._0,
            ),
            PoolType::V3 => (
                self.call(pool, IUniswapV3Pool::token0Call {}, block_number)
                    .await?
                    ._0,
                self.call(pool, IUniswapV3Pool::token1Call {}, block_number)
                    .await?
                    ._0,
            ),
        };

        tracing::debug!(
            pool = %format!("{pool:#x}"),
            token0 = %format!("{:#x}", tokens.0),
            token1 = %format!("{:#x}", tokens.1),
            "resolved pool tokens"
        );
        self.tokens.insert(pool, tokens);
        Ok(tokens)
    }

    /// ERC-20 `symbol()` of `token`, cached after the first read.
    ///
    /// Falls back to the `bytes32` return shape used by pre-standard tokens.
    ///
    /// # Errors
    /// Returns [`MonitorError::ChainRead`] if the call fails or neither return
    /// shape decodes.
    pub async fn symbol(&self, token: Address, block_number: u64) -> Result<String, MonitorError> {
        if let Some(cached) = self.symbols.get(&token).map(|entry| entry.value().clone()) {
            return Ok(cached);
        }

        let raw = self
            .raw_call(
                token,
                IERC20Metadata::symbolCall {}.abi_encode().into(),
                block_number,
            )
            .await?;

        let symbol = match IERC20Metadata::symbolCall::abi_decode_returns(&raw, true) {
            Ok(decoded) => decoded._0,
            Err(string_error) => {
                let decoded = IERC20MetadataBytes32::symbolCall::abi_decode_returns(&raw, true)
                    .map_err(|_| MonitorError::ChainRead {
                        address: token,
                        block_number,
                        reason: format!("failed to decode symbol(): {string_error}"),
                    })?;
                bytes32_to_symbol(decoded._0.as_slice())
            }
        };

        self.symbols.insert(token, symbol.clone());
        Ok(symbol)
    }

    async fn call<C: SolCall>(
        &self,
        to: Address,
        call: C,
        block_number: u64,
    ) -> Result<C::Return, MonitorError> {
        let raw = self
            .raw_call(to, call.abi_encode().into(), block_number)
            .await?;
        C::abi_decode_returns(&raw, true).map_err(|e| MonitorError::ChainRead {
            address: to,
            block_number,
            reason: format!("failed to decode {}: {e}", C::SIGNATURE),
        })
    }

    async fn raw_call(
        &self,
        to: Address,
        data: Bytes,
        block_number: u64,
    ) -> Result<Bytes, MonitorError> {
        self.retry
            .run("eth_call", || self.chain.call(to, data.clone(), block_number))
            .await
            .map_err(|e| MonitorError::ChainRead {
                address: to,
                block_number,
                reason: e.to_string(),
            })
    }
}

fn bytes32_to_symbol(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes32_symbol_stops_at_first_nul() {
        let mut raw = [0u8; 32];
        raw[..3].copy_from_slice(b"MKR");
        assert_eq!(bytes32_to_symbol(&raw), "MKR");
        assert_eq!(bytes32_to_symbol(&[0u8; 32]), "");
    }

    #[test]
    fn pool_type_follows_reserves() {
        let state = PoolState {
            token0: Address::ZERO,
            token1: Address::ZERO,
            reserves: PoolReserves::V3 {
                sqrt_price_x96: U256::from(1u64),
            },
        };
        assert_eq!(state.pool_type(), PoolType::V3);
    }
}
