//! JSON-RPC access to an EVM chain node.
//!
//! Every state read is pinned to an explicit block number so that replaying a
//! block range reproduces the same pool state. Requests are plain JSON-RPC over
//! HTTP rather than a typed provider: PoA chains (BSC, Polygon) return
//! `extraData` longer than mainnet headers allow, and we only need three
//! header fields anyway.

use alloy::hex;
use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::types::BlockHeader;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failures talking to the chain node.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid RPC URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{method} request failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} HTTP status: {status}")]
    Status { method: &'static str, status: u16 },

    #[error("{method} RPC error {code}: {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },

    #[error("{method} missing result")]
    MissingResult { method: &'static str },

    #[error("{method} returned an invalid response: {reason}")]
    InvalidResponse {
        method: &'static str,
        reason: String,
    },
}

/// Chain access needed by the monitor.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number (`eth_blockNumber`).
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Header of `number`, or `None` if the node does not know the block.
    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>, ChainError>;

    /// Read-only contract call evaluated at `block_number`.
    async fn call(&self, to: Address, data: Bytes, block_number: u64)
        -> Result<Bytes, ChainError>;
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    hash: Option<String>,
    timestamp: String,
}

/// [`ChainClient`] over HTTP JSON-RPC.
#[derive(Clone, Debug)]
pub struct RpcChainClient {
    client: Client,
    rpc_url: Url,
}

impl RpcChainClient {
    /// Builds a client without touching the network.
    ///
    /// # Errors
    /// Returns [`ChainError::InvalidUrl`] if the URL is malformed or not HTTP(S).
    pub fn new(rpc_url: &str) -> Result<Self, ChainError> {
        let url = Url::parse(rpc_url).map_err(|e| ChainError::InvalidUrl {
            url: rpc_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChainError::InvalidUrl {
                url: rpc_url.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::InvalidUrl {
                url: rpc_url.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            rpc_url: url,
        })
    }

    /// Builds a client and verifies connectivity via `eth_blockNumber`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the node is unreachable.
    #[tracing::instrument(skip_all, fields(rpc_url = %rpc_url))]
    pub async fn connect(rpc_url: &str) -> Result<Self, ChainError> {
        let client = Self::new(rpc_url)?;
        let head = client.block_number().await?;
        tracing::info!(latest_block = head, "RPC connection successful");
        Ok(client)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> Result<Option<T>, ChainError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(self.rpc_url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|source| ChainError::Http { method, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Status {
                method,
                status: status.as_u16(),
            });
        }

        let rpc: RpcResponse<T> = response
            .json()
            .await
            .map_err(|source| ChainError::Http { method, source })?;

        if let Some(error) = rpc.error {
            return Err(ChainError::Rpc {
                method,
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc.result)
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        const METHOD: &str = "eth_blockNumber";
        let raw: String = self
            .request(METHOD, serde_json::json!([]))
            .await?
            .ok_or(ChainError::MissingResult { method: METHOD })?;
        parse_hex_u64(METHOD, &raw)
    }

    #[tracing::instrument(skip(self))]
    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>, ChainError> {
        const METHOD: &str = "eth_getBlockByNumber";
        let block: Option<RpcBlock> = self
            .request(METHOD, serde_json::json!([format!("0x{number:x}"), false]))
            .await?;

        let Some(block) = block else {
            tracing::debug!(block_number = number, "block not found");
            return Ok(None);
        };

        Ok(Some(BlockHeader {
            number: parse_hex_u64(METHOD, &block.number)?,
            hash: block.hash,
            timestamp: parse_hex_u64(METHOD, &block.timestamp)?,
        }))
    }

    async fn call(
        &self,
        to: Address,
        data: Bytes,
        block_number: u64,
    ) -> Result<Bytes, ChainError> {
        const METHOD: &str = "eth_call";
        let params = serde_json::json!([
            {
                "to": format!("{to:#x}"),
                "data": format!("0x{}", hex::encode(&data)),
            },
            format!("0x{block_number:x}")
        ]);

        let raw: String = self
            .request(METHOD, params)
            .await?
            .ok_or(ChainError::MissingResult { method: METHOD })?;

        let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(|e| {
            ChainError::InvalidResponse {
                method: METHOD,
                reason: format!("result is not hex: {e}"),
            }
        })?;
        Ok(Bytes::from(bytes))
    }
}

/// Parse a `0x`-prefixed quantity as returned by JSON-RPC.
fn parse_hex_u64(method: &'static str, raw: &str) -> Result<u64, ChainError> {
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Err(ChainError::InvalidResponse {
            method,
            reason: format!("empty quantity '{raw}'"),
        });
    }
    u64::from_str_radix(digits, 16).map_err(|e| ChainError::InvalidResponse {
        method,
        reason: format!("bad quantity '{raw}': {e}"),
    })
}
