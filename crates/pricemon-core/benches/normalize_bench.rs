//! Benchmarks for price normalization and deviation.
//!
//! Pure in-memory math, no RPC.
//! Run with: `cargo bench --package pricemon-core`

use alloy::primitives::{address, U256};
use bigdecimal::BigDecimal;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pricemon_core::{deviations_for, normalize, PoolReserves, PoolState};
use std::collections::BTreeMap;
use std::str::FromStr;

fn pool(reserves: PoolReserves) -> PoolState {
    PoolState {
        token0: address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"),
        token1: address!("55d398326f99059fF775485246999027B3197955"),
        reserves,
    }
}

fn bench_normalize_v2(c: &mut Criterion) {
    let state = pool(PoolReserves::V2 {
        reserve0: U256::from(12_345_678_901_234_567_890_123u128),
        reserve1: U256::from(3_876_543_210_987_654_321_098_765u128),
    });
    let base = state.token0;
    c.bench_function("normalize_v2", |b| {
        b.iter(|| normalize(black_box(&state), black_box(base)))
    });
}

fn bench_normalize_v3(c: &mut Criterion) {
    let sqrt = U256::from_str("1980748370727476291426587553792").unwrap_or(U256::from(1u64) << 96);
    let state = pool(PoolReserves::V3 {
        sqrt_price_x96: sqrt,
    });
    let token0 = state.token0;
    let token1 = state.token1;

    c.bench_function("normalize_v3_token0_base", |b| {
        b.iter(|| normalize(black_box(&state), black_box(token0)))
    });
    c.bench_function("normalize_v3_token1_base", |b| {
        b.iter(|| normalize(black_box(&state), black_box(token1)))
    });
}

/// Ten pairs gives 45 combinations per block.
fn bench_deviations_10_pairs(c: &mut Criterion) {
    let prices: BTreeMap<String, BigDecimal> = (0..10)
        .map(|i| (format!("PAIR-{i}"), BigDecimal::from(2000 + i)))
        .collect();
    c.bench_function("deviations_10_pairs", |b| {
        b.iter(|| deviations_for(black_box(1), black_box(&prices)))
    });
}

criterion_group!(
    benches,
    bench_normalize_v2,
    bench_normalize_v3,
    bench_deviations_10_pairs
);
criterion_main!(benches);
