//! Work partitioning benchmark
//!
//! Sharding runs once per harvest cycle over the whole instrument universe,
//! so it has to stay cheap even for a full exchange board (~800 tickers).
//! Measures contiguous partitioning at the worker counts we actually run
//! with, plus row flattening for a fully successful run.

use chrono::Utc;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use depth_harvest_lib::domain::{DepthLevel, InstrumentSet, OrderBookSnapshot, Side};
use depth_harvest_lib::harvesting::partition;

/// Synthetic four-letter codes, enough for a full board
fn board(size: usize) -> InstrumentSet {
    let codes: Vec<String> = (0..size).map(|i| format!("TK{i:03}")).collect();
    InstrumentSet::from_codes(codes)
}

fn full_ladder(code: &str) -> OrderBookSnapshot {
    let mut levels = Vec::with_capacity(20);
    for rank in 1..=10u32 {
        levels.push(DepthLevel {
            side: Side::Bid,
            rank,
            price: Some(10_000 - i64::from(rank) * 25),
            size: Some(1_500),
        });
        levels.push(DepthLevel {
            side: Side::Ask,
            rank,
            price: Some(10_000 + i64::from(rank) * 25),
            size: Some(900),
        });
    }
    OrderBookSnapshot::new(code.into(), Utc::now(), levels)
}

fn partition_full_board(c: &mut Criterion) {
    let instruments = board(800);

    let mut group = c.benchmark_group("partition_800_instruments");
    for workers in [2usize, 4, 8] {
        group.bench_function(format!("{workers}_workers"), |b| {
            b.iter(|| black_box(partition(black_box(&instruments), workers)));
        });
    }
    group.finish();
}

fn flatten_successful_run(c: &mut Criterion) {
    let snapshots: Vec<OrderBookSnapshot> = (0..800)
        .map(|i| full_ladder(&format!("TK{i:03}")))
        .collect();

    c.bench_function("flatten_800_snapshots_to_rows", |b| {
        b.iter(|| {
            let rows: usize = snapshots
                .iter()
                .map(|snapshot| black_box(snapshot.to_rows()).len())
                .sum();
            black_box(rows)
        });
    });
}

criterion_group!(benches, partition_full_board, flatten_successful_run);
criterion_main!(benches);
