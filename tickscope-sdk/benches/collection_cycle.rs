use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tickscope_sdk::{FnProvider, MonitoringManager, PublishEnvelope, Snapshot};

fn manager_with(runtime: &tokio::runtime::Runtime, providers: usize, sync: bool) -> MonitoringManager {
    let manager = MonitoringManager::builder()
        .history_length(60)
        .runtime(runtime.handle().clone())
        .build()
        .unwrap();
    for i in 0..providers {
        let id = format!("provider-{}", i);
        let gather = move || Ok(json!({ "value": i, "load": 0.25 }));
        if sync {
            manager.add_provider(&id, Arc::new(FnProvider::sync(gather)));
        } else {
            manager.add_provider(&id, Arc::new(FnProvider::new(gather)));
        }
    }
    manager
}

/// Benchmark a complete cycle (sync phase, worker phase, history, listeners)
fn bench_cycle_varying_providers(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for count in [1, 5, 20, 50].iter() {
        for (label, sync) in [("async", false), ("sync", true)] {
            let manager = manager_with(&runtime, *count, sync);
            group.bench_with_input(BenchmarkId::new(label, count), count, |b, _| {
                b.iter(|| runtime.block_on(manager.tick()));
            });
            manager.close();
        }
    }
    group.finish();
}

/// Benchmark only the caller-side cost of tick() with sync providers
fn bench_trigger(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let manager = manager_with(&runtime, 5, true);

    c.bench_function("trigger_only", |b| {
        b.iter(|| drop(black_box(manager.tick())));
    });
    manager.close();
}

/// Benchmark serializing a full history for publishing
fn bench_envelope_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_json");

    for history in [10usize, 60, 600].iter() {
        let data: Vec<Snapshot> = (0..*history)
            .map(|i| {
                Snapshot::builder()
                    .time(1_700_000_000_000 + i as u64 * 5_000)
                    .entry("tps", json!({ "5s": 20.0, "10s": 19.98, "1m": 19.9 }))
                    .entry("cpu", json!({ "processCpuLoad": 0.12, "systemCpuLoad": 0.4 }))
                    .entry("memory", json!({ "process": { "resident": 1u64 << 28 } }))
                    .build()
            })
            .collect();
        let envelope = PublishEnvelope::new(data, "wss://sockets.tickscope.dev/abc");

        let json = serde_json::to_string(&envelope).unwrap();
        group.throughput(Throughput::Bytes(json.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(history), &envelope, |b, envelope| {
            b.iter(|| black_box(serde_json::to_vec(envelope).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cycle_varying_providers,
    bench_trigger,
    bench_envelope_serialization
);
criterion_main!(benches);
