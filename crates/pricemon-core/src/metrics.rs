//! Prometheus gauges for prices and cross-pair deviation.
//!
//! Every gauge is set by label, never read-modify-written, so concurrent
//! updates from different pairs cannot race. The registry is owned by
//! [`PrometheusMetrics`] rather than the process-wide default so several
//! monitors (or tests) can coexist.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Where the processor publishes what it observed.
pub trait MetricsSink: Send + Sync {
    /// Last price of `pair_name` (`token_price{pair_name}`).
    fn set_price(&self, pair_name: &str, price: f64);

    /// Last deviation for a canonical pair-of-pairs label (`price_deviation_pct{pair}`).
    fn set_deviation(&self, label: &str, deviation_pct: f64);

    fn record_block(&self, block_number: u64);

    fn record_pair_failure(&self, pair_name: &str, reason: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_price(&self, _pair_name: &str, _price: f64) {}
    fn set_deviation(&self, _label: &str, _deviation_pct: f64) {}
    fn record_block(&self, _block_number: u64) {}
    fn record_pair_failure(&self, _pair_name: &str, _reason: &str) {}
}

pub struct PrometheusMetrics {
    registry: Registry,
    token_price: GaugeVec,
    price_deviation: GaugeVec,
    last_block: IntGauge,
    pair_failures: IntCounterVec,
}

impl PrometheusMetrics {
    /// Creates the gauge families and registers them on a fresh registry.
    ///
    /// # Errors
    /// Returns error if a metric definition is rejected by the registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let token_price = GaugeVec::new(
            Opts::new("token_price", "Last observed price per tracked pair (quote per base)."),
            &["pair_name"],
        )?;
        let price_deviation = GaugeVec::new(
            Opts::new(
                "price_deviation_pct",
                "Last price deviation in percent between two tracked pairs.",
            ),
            &["pair"],
        )?;
        let last_block = IntGauge::new(
            "pricemon_last_processed_block",
            "Most recent block number processed.",
        )?;
        let pair_failures = IntCounterVec::new(
            Opts::new(
                "pricemon_pair_failures_total",
                "Pairs skipped for a block, labeled by reason.",
            ),
            &["pair_name", "reason"],
        )?;

        registry.register(Box::new(token_price.clone()))?;
        registry.register(Box::new(price_deviation.clone()))?;
        registry.register(Box::new(last_block.clone()))?;
        registry.register(Box::new(pair_failures.clone()))?;

        Ok(Self {
            registry,
            token_price,
            price_deviation,
            last_block,
            pair_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format of all registered metrics.
    ///
    /// # Errors
    /// Returns error if encoding fails.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn set_price(&self, pair_name: &str, price: f64) {
        self.token_price.with_label_values(&[pair_name]).set(price);
    }

    fn set_deviation(&self, label: &str, deviation_pct: f64) {
        self.price_deviation
            .with_label_values(&[label])
            .set(deviation_pct);
    }

    fn record_block(&self, block_number: u64) {
        self.last_block
            .set(i64::try_from(block_number).unwrap_or(i64::MAX));
    }

    fn record_pair_failure(&self, pair_name: &str, reason: &str) {
        self.pair_failures
            .with_label_values(&[pair_name, reason])
            .inc();
    }
}

/// `/metrics` and `/health` routes.
pub fn router(metrics: Arc<PrometheusMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}

/// Serves [`router`] on `listener` until `cancel` fires.
///
/// # Errors
/// Returns error if the server fails.
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<PrometheusMetrics>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "metrics server listening");
    }
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn metrics_handler(State(metrics): State<Arc<PrometheusMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}
