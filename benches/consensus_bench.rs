//! Consensus Benchmarks - Hot-Path Performance Validation
//!
//! Benchmarks the per-tick work of a market price service and the
//! aggregator's store reads.
//!
//! Run with: cargo bench --bench consensus_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use market_price_oracle::adapters::feeds::PriceStore;
use market_price_oracle::domain::consensus::{median, ConsensusState};
use market_price_oracle::domain::price::PriceTime;

/// Median over a typical number of sources plus the previous price.
fn bench_median(c: &mut Criterion) {
    let values = [1345.6, 1344.6, 1346.1, 1345.9, 1343.8, 1345.2, 1345.0];

    c.bench_function("median_7_sources", |b| {
        b.iter(|| median(black_box(&values)));
    });
}

/// Full consensus evaluation of an agreeing tick.
fn bench_evaluate_consistent(c: &mut Criterion) {
    let tick = [1345.6, 1344.6, 1346.1, 1345.9, 1343.8];
    let mut state = ConsensusState::new();
    let _ = state.evaluate(&tick);

    c.bench_function("consensus_evaluate_5_sources", |b| {
        b.iter(|| state.evaluate(black_box(&tick)));
    });
}

/// Consensus evaluation falling back to the new samples only.
fn bench_evaluate_outlier_previous(c: &mut Criterion) {
    // previous price plus tick has no consistent pair, the tick alone has
    let tick = [1345.6, 1346.1, 1098.3];

    c.bench_function("consensus_evaluate_second_pass", |b| {
        b.iter(|| {
            let mut state = ConsensusState::new();
            let _ = state.evaluate(&[1210.0]);
            state.evaluate(black_box(&tick))
        });
    });
}

/// Store write with an unchanged price followed by a read.
fn bench_price_store(c: &mut Criterion) {
    let store = PriceStore::new("bench");
    let sample = PriceTime::now(36000.0);
    store.store("BTC-USDT", sample);

    c.bench_function("price_store_duplicate_and_load", |b| {
        b.iter(|| {
            store.store(black_box("BTC-USDT"), sample);
            store.load(black_box("BTC-USDT"))
        });
    });
}

criterion_group!(
    benches,
    bench_median,
    bench_evaluate_consistent,
    bench_evaluate_outlier_previous,
    bench_price_store,
);
criterion_main!(benches);
