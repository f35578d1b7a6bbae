//! pricemon-core crate
//!
//! Per-block price pipeline: pool reads, price normalization, cross-pair
//! deviation, and the replay / live-tail loop that drives them.

pub mod abi;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod price;
pub mod processor;
pub mod retry;
pub mod sink;

pub use error::{MonitorError, PriceError};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use monitor::{LoopOutcome, LoopState, MonitorLoop, DEFAULT_POLL_INTERVAL};
pub use pool::{PoolReader, PoolReserves, PoolState};
pub use price::{deviation_pct, deviations_for, normalize, resolve_sides, Sides};
pub use processor::{BlockProcessor, ProcessResult};
pub use retry::RetryPolicy;
pub use sink::PriceSink;
