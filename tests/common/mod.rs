//! Shared test doubles for the integration tests.
//!
//! [`MockChain`] answers `eth_call` by function selector with hand-encoded ABI
//! words, so tests exercise the real decoding path in `PoolReader`.

#![allow(dead_code)]

use alloy::primitives::{address, Address, Bytes, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use pricemon_core::abi::{IERC20Metadata, IUniswapV2Pair, IUniswapV3Pool};
use pricemon_core::{BlockProcessor, MetricsSink, PriceSink, RetryPolicy};
use pricemon_data::{
    BlockHeader, ChainClient, ChainError, DeviationSample, PoolType, PriceSample, Store,
    StoreError, TrackedPair,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const WBNB: Address = address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
pub const USDT: Address = address!("55d398326f99059fF775485246999027B3197955");
pub const BUSD: Address = address!("e9e7CEA3DedcA5984780Bafc599bD69ADd087D56");
pub const CAKE: Address = address!("0E09FaBB73Bd3Ade0a17ECC321fD13a19e81cE82");

/// Timestamp of block 0 on the mock chain (2024-02-22 16:00:00 UTC); 3s blocks.
pub const GENESIS_TIMESTAMP: u64 = 1_708_617_600;

pub const STABLE_COINS: [&str; 2] = ["USDT", "BUSD"];

/// Deterministic pool address `0x00..00{n}`.
pub fn pool(n: u8) -> Address {
    Address::with_last_byte(n)
}

pub fn q96() -> U256 {
    U256::from(1u64) << 96
}

pub fn tracked(name: &str, pool_address: Address, pool_type: PoolType) -> TrackedPair {
    TrackedPair {
        name: name.to_string(),
        pool_address,
        pool_type,
        token0_address: None,
        token1_address: None,
    }
}

/// Creates an in-memory SQLite Store.
///
/// # Panics
/// Panics if the in-memory database cannot be created (should never happen).
pub fn test_store() -> Store {
    Store::new(":memory:").expect("in-memory store should always open")
}

#[derive(Clone, Debug)]
enum MockReserves {
    V2 { reserve0: u128, reserve1: u128 },
    V3 { sqrt_price_x96: U256 },
}

#[derive(Clone, Debug)]
struct MockPool {
    token0: Address,
    token1: Address,
    default: MockReserves,
    by_block: HashMap<u64, MockReserves>,
}

#[derive(Clone, Debug)]
enum MockSymbol {
    String(String),
    Bytes32(String),
}

/// In-memory [`ChainClient`].
#[derive(Default)]
pub struct MockChain {
    pools: HashMap<Address, MockPool>,
    symbols: HashMap<Address, MockSymbol>,
    missing_blocks: HashSet<u64>,
    failing_calls: HashSet<(Address, u64)>,
    transient_failures: AtomicUsize,
    heads: Mutex<VecDeque<Option<u64>>>,
    last_head: Mutex<u64>,
    cancel_when_heads_exhausted: Option<CancellationToken>,

    header_requests: Mutex<Vec<u64>>,
    call_log: Mutex<Vec<(Address, [u8; 4], u64)>>,
    head_requests: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard fixture: WBNB, USDT, BUSD and CAKE with their symbols.
    pub fn with_default_tokens() -> Self {
        Self::new()
            .with_symbol(WBNB, "WBNB")
            .with_symbol(USDT, "USDT")
            .with_symbol(BUSD, "BUSD")
            .with_symbol(CAKE, "CAKE")
    }

    pub fn with_symbol(mut self, token: Address, symbol: &str) -> Self {
        self.symbols
            .insert(token, MockSymbol::String(symbol.to_string()));
        self
    }

    pub fn with_bytes32_symbol(mut self, token: Address, symbol: &str) -> Self {
        self.symbols
            .insert(token, MockSymbol::Bytes32(symbol.to_string()));
        self
    }

    pub fn with_v2_pool(
        mut self,
        pool: Address,
        token0: Address,
        token1: Address,
        reserve0: u128,
        reserve1: u128,
    ) -> Self {
        self.pools.insert(
            pool,
            MockPool {
                token0,
                token1,
                default: MockReserves::V2 { reserve0, reserve1 },
                by_block: HashMap::new(),
            },
        );
        self
    }

    pub fn with_v3_pool(
        mut self,
        pool: Address,
        token0: Address,
        token1: Address,
        sqrt_price_x96: U256,
    ) -> Self {
        self.pools.insert(
            pool,
            MockPool {
                token0,
                token1,
                default: MockReserves::V3 { sqrt_price_x96 },
                by_block: HashMap::new(),
            },
        );
        self
    }

    /// Overrides a V2 pool's reserves at one block.
    pub fn with_v2_reserves_at(
        mut self,
        pool: Address,
        block_number: u64,
        reserve0: u128,
        reserve1: u128,
    ) -> Self {
        if let Some(entry) = self.pools.get_mut(&pool) {
            entry
                .by_block
                .insert(block_number, MockReserves::V2 { reserve0, reserve1 });
        }
        self
    }

    /// Every call to `address` at `block_number` reverts.
    pub fn with_failing_call(mut self, address: Address, block_number: u64) -> Self {
        self.failing_calls.insert((address, block_number));
        self
    }

    /// The next `count` calls fail regardless of target.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// `eth_getBlockByNumber` returns null for this block.
    pub fn with_missing_block(mut self, block_number: u64) -> Self {
        self.missing_blocks.insert(block_number);
        self
    }

    /// Successive `eth_blockNumber` answers; `None` is an RPC failure. Once
    /// exhausted the last head repeats.
    pub fn with_heads(self, heads: impl IntoIterator<Item = Option<u64>>) -> Self {
        if let Ok(mut queue) = self.heads.lock() {
            queue.extend(heads);
        }
        self
    }

    /// Cancels `token` on the first head request after the scripted heads ran out.
    pub fn cancel_when_heads_exhausted(mut self, token: CancellationToken) -> Self {
        self.cancel_when_heads_exhausted = Some(token);
        self
    }

    pub fn header_requests(&self) -> Vec<u64> {
        self.header_requests.lock().expect("lock").clone()
    }

    pub fn head_requests(&self) -> usize {
        self.head_requests.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().expect("lock").len()
    }

    /// Number of calls made with `selector`.
    pub fn calls_with_selector(&self, selector: [u8; 4]) -> usize {
        self.call_log
            .lock()
            .expect("lock")
            .iter()
            .filter(|(_, s, _)| *s == selector)
            .count()
    }

    /// Distinct block numbers any `eth_call` was pinned to.
    pub fn call_blocks(&self) -> Vec<u64> {
        let mut blocks: Vec<u64> = self
            .call_log
            .lock()
            .expect("lock")
            .iter()
            .map(|(_, _, b)| *b)
            .collect();
        blocks.sort_unstable();
        blocks.dedup();
        blocks
    }

    fn reverted() -> ChainError {
        ChainError::Rpc {
            method: "eth_call",
            code: -32000,
            message: "execution reverted".to_string(),
        }
    }

    fn answer_pool(pool: &MockPool, selector: [u8; 4], block_number: u64) -> Option<Vec<u8>> {
        if selector == IUniswapV2Pair::token0Call::SELECTOR {
            return Some(address_word(pool.token0).to_vec());
        }
        if selector == IUniswapV2Pair::token1Call::SELECTOR {
            return Some(address_word(pool.token1).to_vec());
        }

        let reserves = pool.by_block.get(&block_number).unwrap_or(&pool.default);
        match reserves {
            MockReserves::V2 { reserve0, reserve1 }
                if selector == IUniswapV2Pair::getReservesCall::SELECTOR =>
            {
                let timestamp = GENESIS_TIMESTAMP + block_number * 3;
                Some(words(&[
                    U256::from(*reserve0),
                    U256::from(*reserve1),
                    U256::from(timestamp),
                ]))
            }
            MockReserves::V3 { sqrt_price_x96 }
                if selector == IUniswapV3Pool::slot0Call::SELECTOR =>
            {
                Some(words(&[
                    *sqrt_price_x96,
                    U256::ZERO,
                    U256::ZERO,
                    U256::from(1u64),
                    U256::from(1u64),
                    U256::ZERO,
                    U256::from(1u64),
                ]))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.head_requests.fetch_add(1, Ordering::SeqCst);
        let next = self.heads.lock().expect("lock").pop_front();
        let mut last = self.last_head.lock().expect("lock");
        match next {
            Some(Some(head)) => {
                *last = head;
                Ok(head)
            }
            Some(None) => Err(ChainError::Status {
                method: "eth_blockNumber",
                status: 503,
            }),
            None => {
                if let Some(token) = &self.cancel_when_heads_exhausted {
                    token.cancel();
                }
                Ok(*last)
            }
        }
    }

    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>, ChainError> {
        self.header_requests.lock().expect("lock").push(number);
        if self.missing_blocks.contains(&number) {
            return Ok(None);
        }
        Ok(Some(BlockHeader {
            number,
            hash: Some(format!("0x{number:064x}")),
            timestamp: GENESIS_TIMESTAMP + number * 3,
        }))
    }

    async fn call(&self, to: Address, data: Bytes, block_number: u64) -> Result<Bytes, ChainError> {
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(Self::reverted)?;
        self.call_log
            .lock()
            .expect("lock")
            .push((to, selector, block_number));

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ChainError::Status {
                method: "eth_call",
                status: 429,
            });
        }
        if self.failing_calls.contains(&(to, block_number)) {
            return Err(Self::reverted());
        }

        if let Some(pool) = self.pools.get(&to) {
            return Self::answer_pool(pool, selector, block_number)
                .map(Bytes::from)
                .ok_or_else(Self::reverted);
        }

        match self.symbols.get(&to) {
            Some(symbol) if selector == IERC20Metadata::symbolCall::SELECTOR => {
                let encoded = match symbol {
                    MockSymbol::String(s) => string_return(s),
                    MockSymbol::Bytes32(s) => bytes32_word(s).to_vec(),
                };
                Ok(Bytes::from(encoded))
            }
            _ => Err(Self::reverted()),
        }
    }
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn words(values: &[U256]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| v.to_be_bytes::<32>())
        .collect()
}

fn bytes32_word(text: &str) -> [u8; 32] {
    let mut word = [0u8; 32];
    let bytes = text.as_bytes();
    word[..bytes.len()].copy_from_slice(bytes);
    word
}

/// ABI encoding of a single `string` return: offset, length, padded data.
fn string_return(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = words(&[U256::from(32u64), U256::from(bytes.len())]);
    out.extend_from_slice(bytes);
    let padding = (32 - bytes.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

/// [`PriceSink`] that keeps every batch in memory.
#[derive(Default)]
pub struct RecordingSink {
    pub prices: Mutex<Vec<PriceSample>>,
    pub deviations: Mutex<Vec<DeviationSample>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    pub fn prices(&self) -> Vec<PriceSample> {
        self.prices.lock().expect("lock").clone()
    }

    pub fn deviations(&self) -> Vec<DeviationSample> {
        self.deviations.lock().expect("lock").clone()
    }
}

impl PriceSink for RecordingSink {
    fn upsert_prices(&self, samples: &[PriceSample]) -> Result<usize, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.prices.lock().expect("lock").extend_from_slice(samples);
        Ok(samples.len())
    }

    fn upsert_deviations(&self, deviations: &[DeviationSample]) -> Result<usize, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.deviations
            .lock()
            .expect("lock")
            .extend_from_slice(deviations);
        Ok(deviations.len())
    }
}

/// [`MetricsSink`] that records the last value per label and every update.
#[derive(Default)]
pub struct RecordingMetrics {
    pub prices: Mutex<BTreeMap<String, f64>>,
    pub price_updates: Mutex<Vec<(String, f64)>>,
    pub deviations: Mutex<BTreeMap<String, f64>>,
    pub blocks: Mutex<Vec<u64>>,
    pub failures: Mutex<Vec<(String, String)>>,
}

impl RecordingMetrics {
    pub fn price(&self, pair_name: &str) -> Option<f64> {
        self.prices.lock().expect("lock").get(pair_name).copied()
    }

    pub fn deviation(&self, label: &str) -> Option<f64> {
        self.deviations.lock().expect("lock").get(label).copied()
    }

    pub fn deviation_labels(&self) -> Vec<String> {
        self.deviations.lock().expect("lock").keys().cloned().collect()
    }

    pub fn failures(&self) -> Vec<(String, String)> {
        self.failures.lock().expect("lock").clone()
    }

    pub fn blocks(&self) -> Vec<u64> {
        self.blocks.lock().expect("lock").clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn set_price(&self, pair_name: &str, price: f64) {
        self.prices
            .lock()
            .expect("lock")
            .insert(pair_name.to_string(), price);
        self.price_updates
            .lock()
            .expect("lock")
            .push((pair_name.to_string(), price));
    }

    fn set_deviation(&self, label: &str, deviation_pct: f64) {
        self.deviations
            .lock()
            .expect("lock")
            .insert(label.to_string(), deviation_pct);
    }

    fn record_block(&self, block_number: u64) {
        self.blocks.lock().expect("lock").push(block_number);
    }

    fn record_pair_failure(&self, pair_name: &str, reason: &str) {
        self.failures
            .lock()
            .expect("lock")
            .push((pair_name.to_string(), reason.to_string()));
    }
}

/// Processor wired to `chain` and the given sinks with the default stable set
/// and no retries.
pub fn processor(
    chain: Arc<MockChain>,
    sink: Arc<dyn PriceSink>,
    metrics: Arc<dyn MetricsSink>,
) -> BlockProcessor {
    BlockProcessor::new(
        chain,
        STABLE_COINS.iter().map(|s| s.to_string()),
        sink,
        metrics,
        RetryPolicy::none(),
    )
}
