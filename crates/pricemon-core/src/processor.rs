//! One block of the pipeline: read every tracked pool, normalize, publish,
//! compute deviations and persist.
//!
//! Pair reads for a block run concurrently. Publishing, deviation and
//! persistence wait until every pair of the block has either produced a
//! price or failed, and then happen in tracked-pair order.

use alloy::primitives::Address;
use bigdecimal::{BigDecimal, ToPrimitive};
use dashmap::DashSet;
use pricemon_data::{BlockHeader, ChainClient, DeviationSample, PriceSample, TrackedPair};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{MonitorError, PriceError};
use crate::metrics::MetricsSink;
use crate::pool::PoolReader;
use crate::price::{deviations_for, normalize, resolve_sides};
use crate::retry::RetryPolicy;
use crate::sink::PriceSink;

/// Outcome of one processed block.
#[derive(Debug, Default)]
pub struct ProcessResult {
    pub block_number: u64,
    /// Samples in tracked-pair order.
    pub samples: Vec<PriceSample>,
    pub deviations: Vec<DeviationSample>,
    /// Pairs that produced no price, with the reason.
    pub failures: Vec<(String, MonitorError)>,
}

pub struct BlockProcessor {
    chain: Arc<dyn ChainClient>,
    reader: PoolReader,
    stable_coins: BTreeSet<String>,
    sink: Arc<dyn PriceSink>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
    checked_pools: DashSet<Address>,
}

impl BlockProcessor {
    /// `stable_coins` are matched case-insensitively against token symbols.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        stable_coins: impl IntoIterator<Item = String>,
        sink: Arc<dyn PriceSink>,
        metrics: Arc<dyn MetricsSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reader: PoolReader::new(Arc::clone(&chain), retry),
            chain,
            stable_coins: stable_coins
                .into_iter()
                .map(|s| s.trim().to_ascii_uppercase())
                .collect(),
            sink,
            metrics,
            retry,
            checked_pools: DashSet::new(),
        }
    }

    pub fn reader(&self) -> &PoolReader {
        &self.reader
    }

    fn is_stable(&self, symbol: &str) -> bool {
        self.stable_coins
            .contains(&symbol.trim().to_ascii_uppercase())
    }

    /// Processes `block_number` for every pair in `pairs`.
    ///
    /// A failing pair is logged, counted and left out of the block; the other
    /// pairs still produce samples.
    ///
    /// # Errors
    /// - [`MonitorError::BlockUnavailable`] if the header cannot be read; nothing
    ///   is published or persisted for the block.
    /// - [`MonitorError::Persistence`] if the batch write fails. Gauges have
    ///   already been updated at that point.
    #[tracing::instrument(skip(self, pairs), fields(pairs = pairs.len()))]
    pub async fn process(
        &self,
        block_number: u64,
        pairs: &[TrackedPair],
    ) -> Result<ProcessResult, MonitorError> {
        let header = self.header(block_number).await?;

        let results =
            futures::future::join_all(pairs.iter().map(|pair| self.price_pair(pair, &header)))
                .await;

        let mut result = ProcessResult {
            block_number,
            ..ProcessResult::default()
        };
        let mut prices: BTreeMap<String, BigDecimal> = BTreeMap::new();

        for (pair, outcome) in pairs.iter().zip(results) {
            match outcome {
                Ok(sample) => {
                    tracing::debug!(
                        block_number,
                        pair = %pair.name,
                        price = %sample.price_base_in_quote,
                        "priced pair"
                    );
                    self.publish_price(&sample);
                    prices.insert(sample.pair_name.clone(), sample.price_base_in_quote.clone());
                    result.samples.push(sample);
                }
                Err(error) => {
                    tracing::warn!(
                        block_number,
                        pair = %pair.name,
                        pool = %format!("{:#x}", pair.pool_address),
                        error = %error,
                        "skipping pair for block"
                    );
                    self.metrics.record_pair_failure(&pair.name, error.reason());
                    result.failures.push((pair.name.clone(), error));
                }
            }
        }

        result.deviations = deviations_for(block_number, &prices);
        for deviation in &result.deviations {
            match deviation.deviation_pct.to_f64() {
                Some(value) => self.metrics.set_deviation(&deviation.label(), value),
                None => tracing::warn!(label = %deviation.label(), "deviation not representable as f64"),
            }
        }

        self.persist(block_number, &result)?;
        self.metrics.record_block(block_number);

        tracing::info!(
            block_number,
            priced = result.samples.len(),
            failed = result.failures.len(),
            deviations = result.deviations.len(),
            "processed block"
        );
        Ok(result)
    }

    async fn header(&self, block_number: u64) -> Result<BlockHeader, MonitorError> {
        let header = self
            .retry
            .run("eth_getBlockByNumber", || self.chain.block_header(block_number))
            .await
            .map_err(|e| MonitorError::BlockUnavailable {
                block_number,
                reason: e.to_string(),
            })?;

        header.ok_or_else(|| MonitorError::BlockUnavailable {
            block_number,
            reason: "block not found".to_string(),
        })
    }

    async fn price_pair(
        &self,
        pair: &TrackedPair,
        header: &BlockHeader,
    ) -> Result<PriceSample, MonitorError> {
        let block_number = header.number;
        let state = self
            .reader
            .read(pair.pool_address, pair.pool_type, block_number)
            .await?;

        if self.checked_pools.insert(pair.pool_address)
            && !pair.matches_tokens(state.token0, state.token1)
        {
            tracing::warn!(
                pair = %pair.name,
                token0 = %format!("{:#x}", state.token0),
                token1 = %format!("{:#x}", state.token1),
                "configured token addresses do not match the pool; using on-chain order"
            );
        }

        let (symbol0, symbol1) = futures::try_join!(
            self.reader.symbol(state.token0, block_number),
            self.reader.symbol(state.token1, block_number),
        )?;

        let computation = |source: PriceError| MonitorError::Computation {
            pair: pair.name.clone(),
            block_number,
            source,
        };

        let sides = resolve_sides(
            (state.token0, symbol0.as_str()),
            (state.token1, symbol1.as_str()),
            |symbol| self.is_stable(symbol),
        )
        .map_err(computation)?;
        let price = normalize(&state, sides.base).map_err(computation)?;

        Ok(PriceSample {
            block_number,
            pool_address: pair.pool_address,
            pool_type: pair.pool_type,
            pair_name: pair.name.clone(),
            price_base_in_quote: price,
            base_symbol: sides.base_symbol,
            quote_symbol: sides.quote_symbol,
            timestamp: header.timestamp,
        })
    }

    fn publish_price(&self, sample: &PriceSample) {
        match sample.price_base_in_quote.to_f64() {
            Some(value) => self.metrics.set_price(&sample.pair_name, value),
            None => tracing::warn!(
                pair = %sample.pair_name,
                "price not representable as f64; gauge not updated"
            ),
        }
    }

    fn persist(&self, block_number: u64, result: &ProcessResult) -> Result<(), MonitorError> {
        let persistence = |source| MonitorError::Persistence {
            block_number,
            source,
        };

        if !result.samples.is_empty() {
            self.sink
                .upsert_prices(&result.samples)
                .map_err(persistence)?;
        }
        if !result.deviations.is_empty() {
            self.sink
                .upsert_deviations(&result.deviations)
                .map_err(persistence)?;
        }
        Ok(())
    }
}
