//! JSON configuration loaded once at startup.
//!
//! ```json
//! {
//!   "rpc_url": "https://bsc-dataseed.binance.org",
//!   "stable_coins": ["USDT", "USDC", "BUSD"],
//!   "token_pairs": {
//!     "WBNB/USDT-v2": {
//!       "pool_address": "0x16b9a82891338f9bA80E2D6970FddA79D1eb0daE",
//!       "pool_type": "v2",
//!       "token0_address": "0x55d398326f99059fF775485246999027B3197955",
//!       "token1_address": "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"
//!     }
//!   }
//! }
//! ```
//!
//! `rpc_url`, `stable_coins` and `token_pairs` are required; everything else
//! has a default. `PRICEMON_RPC_URL` overrides `rpc_url` when set.

use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::types::{PoolType, TrackedPair};

/// Environment variable that overrides `rpc_url`.
pub const RPC_URL_ENV: &str = "PRICEMON_RPC_URL";

const DEFAULT_DB_PATH: &str = "data/prices.sqlite";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_RPC_RETRIES: u32 = 3;
const DEFAULT_RPC_RETRY_BACKOFF_MS: u64 = 500;

/// Fatal startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing required config key: {0}")]
    MissingField(String),

    #[error("invalid address in {field}: '{value}'")]
    InvalidAddress { field: String, value: String },

    #[error("invalid pool type for pair {pair}: {reason}")]
    InvalidPoolType { pair: String, reason: String },

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("pair '{0}' is not configured in token_pairs")]
    UnknownPair(String),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    rpc_url: Option<String>,
    stable_coins: Option<Vec<String>>,
    token_pairs: Option<BTreeMap<String, RawPair>>,
    db_path: Option<String>,
    metrics_addr: Option<String>,
    poll_interval_secs: Option<u64>,
    rpc_retries: Option<u32>,
    rpc_retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPair {
    pool_address: Option<String>,
    pool_type: Option<String>,
    token0_address: Option<String>,
    token1_address: Option<String>,
}

/// Validated monitor configuration.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// HTTP JSON-RPC endpoint of the chain node.
    pub rpc_url: String,
    /// Stable-coin symbols, uppercased.
    pub stable_coins: BTreeSet<String>,
    /// Every configured pair keyed by name.
    pub pairs: BTreeMap<String, TrackedPair>,
    /// SQLite database path.
    pub db_path: String,
    /// Bind address of the `/metrics` endpoint.
    pub metrics_addr: SocketAddr,
    /// Sleep between live-tail polls.
    pub poll_interval: Duration,
    /// Attempts per chain read (1 disables retries).
    pub rpc_retries: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub rpc_retry_backoff: Duration,
}

impl MonitorConfig {
    /// Reads and validates the config file, then applies environment overrides.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file is unreadable or invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_json(&text)?;
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!(env = RPC_URL_ENV, "rpc_url overridden from environment");
                config.rpc_url = url.trim().to_string();
            }
        }
        Ok(config)
    }

    /// Parses and validates configuration JSON.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on malformed JSON, missing required keys,
    /// bad addresses or unknown pool types.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)?;

        let rpc_url = raw
            .rpc_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("rpc_url".to_string()))?;

        let stable_coins: BTreeSet<String> = raw
            .stable_coins
            .ok_or_else(|| ConfigError::MissingField("stable_coins".to_string()))?
            .iter()
            .map(|symbol| symbol.trim().to_uppercase())
            .filter(|symbol| !symbol.is_empty())
            .collect();
        if stable_coins.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "stable_coins".to_string(),
                reason: "at least one stable coin symbol is required".to_string(),
            });
        }

        let raw_pairs = raw
            .token_pairs
            .ok_or_else(|| ConfigError::MissingField("token_pairs".to_string()))?;
        if raw_pairs.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "token_pairs".to_string(),
                reason: "at least one pair is required".to_string(),
            });
        }

        let mut pairs = BTreeMap::new();
        for (name, raw_pair) in raw_pairs {
            let pair = parse_pair(&name, raw_pair)?;
            pairs.insert(name, pair);
        }

        let metrics_addr_raw = raw
            .metrics_addr
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr =
            metrics_addr_raw
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "metrics_addr".to_string(),
                    reason: format!("'{metrics_addr_raw}': {e}"),
                })?;

        let poll_interval_secs = raw.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            rpc_url: rpc_url.trim().to_string(),
            stable_coins,
            pairs,
            db_path: raw.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            metrics_addr,
            poll_interval: Duration::from_secs(poll_interval_secs),
            rpc_retries: raw.rpc_retries.unwrap_or(DEFAULT_RPC_RETRIES).max(1),
            rpc_retry_backoff: Duration::from_millis(
                raw.rpc_retry_backoff_ms
                    .unwrap_or(DEFAULT_RPC_RETRY_BACKOFF_MS),
            ),
        })
    }

    /// Case-insensitive stable-coin membership.
    pub fn is_stable(&self, symbol: &str) -> bool {
        self.stable_coins.contains(&symbol.trim().to_uppercase())
    }

    /// Resolves requested pair names in request order, dropping duplicates.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownPair`] for a name missing from `token_pairs`.
    pub fn select_pairs(&self, names: &[String]) -> Result<Vec<TrackedPair>, ConfigError> {
        let mut selected: Vec<TrackedPair> = Vec::with_capacity(names.len());
        for name in names {
            let pair = self
                .pairs
                .get(name)
                .ok_or_else(|| ConfigError::UnknownPair(name.clone()))?;
            if !selected.iter().any(|p| p.name == pair.name) {
                selected.push(pair.clone());
            }
        }
        Ok(selected)
    }
}

fn parse_pair(name: &str, raw: RawPair) -> Result<TrackedPair, ConfigError> {
    let pool_address_raw = raw
        .pool_address
        .ok_or_else(|| ConfigError::MissingField(format!("token_pairs.{name}.pool_address")))?;
    let pool_address = parse_address(&format!("token_pairs.{name}.pool_address"), &pool_address_raw)?;

    let pool_type_raw = raw
        .pool_type
        .ok_or_else(|| ConfigError::MissingField(format!("token_pairs.{name}.pool_type")))?;
    let pool_type = pool_type_raw
        .parse::<PoolType>()
        .map_err(|reason| ConfigError::InvalidPoolType {
            pair: name.to_string(),
            reason,
        })?;

    let token0_address = raw
        .token0_address
        .map(|value| parse_address(&format!("token_pairs.{name}.token0_address"), &value))
        .transpose()?;
    let token1_address = raw
        .token1_address
        .map(|value| parse_address(&format!("token_pairs.{name}.token1_address"), &value))
        .transpose()?;

    Ok(TrackedPair {
        name: name.to_string(),
        pool_address,
        pool_type,
        token0_address,
        token1_address,
    })
}

fn parse_address(field: &str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
        field: field.to_string(),
        value: value.to_string(),
    })
}
