//! Single-lane engine throughput.
//!
//! Measures the per-tick cost of window assignment, late check, combine and
//! store commit, in memory and against the journal.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use market_simulator::{SimulatorConfig, TickGenerator};
use persistence::{JournalConfig, SyncPolicy};
use stream_processor::{AggregationEngine, EngineConfig, InMemoryStore, JournaledStore, ProcessorMetrics};
use tempfile::TempDir;
use types::tick::StockTick;
use types::time::from_epoch_millis;

const BATCH: usize = 10_000;

/// Ticks 100ms apart in event time, so a batch crosses several windows.
fn ticks(symbols: usize) -> Vec<StockTick> {
    let config = SimulatorConfig {
        symbols: SimulatorConfig::default().symbols.into_iter().take(symbols).collect(),
        ..SimulatorConfig::default()
    };
    let mut generator = TickGenerator::new(&config).expect("simulator config");
    (0..BATCH)
        .map(|i| {
            generator
                .next_tick(from_epoch_millis(i as i64 * 100))
                .expect("generated tick")
        })
        .collect()
}

fn bench_in_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_in_memory");
    group.throughput(Throughput::Elements(BATCH as u64));
    for symbols in [1usize, 8] {
        let input = ticks(symbols);
        group.bench_with_input(BenchmarkId::from_parameter(symbols), &input, |b, input| {
            b.iter(|| {
                let mut engine = AggregationEngine::new(
                    InMemoryStore::new(),
                    EngineConfig::default(),
                    Arc::new(ProcessorMetrics::new()),
                );
                for tick in input {
                    black_box(engine.process(tick).expect("process"));
                }
            });
        });
    }
    group.finish();
}

fn bench_journaled(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_journaled");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.sample_size(10);
    let input = ticks(8);
    for (name, policy) in [("manual", SyncPolicy::Manual), ("every_64", SyncPolicy::EveryN(64))] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &input, |b, input| {
            b.iter(|| {
                let tmp = TempDir::new().expect("tempdir");
                let store = JournaledStore::open(JournalConfig {
                    sync_policy: policy,
                    ..JournalConfig::new(tmp.path())
                })
                .expect("open store");
                let mut engine =
                    AggregationEngine::new(store, EngineConfig::default(), Arc::new(ProcessorMetrics::new()));
                for tick in input {
                    black_box(engine.process(tick).expect("process"));
                }
                engine.sync().expect("sync");
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_in_memory, bench_journaled);
criterion_main!(benches);
