//! pricemon-data crate
//!
//! Data model, configuration, chain RPC access and SQLite persistence for the
//! per-block pool price monitor.

pub mod config;
pub mod rpc;
pub mod store;
pub mod types;

pub use config::{ConfigError, MonitorConfig};
pub use rpc::{ChainClient, ChainError, RpcChainClient};
pub use store::{Store, StoreError};
pub use types::{BlockHeader, DeviationSample, PairSummary, PoolType, PriceSample, TrackedPair};
