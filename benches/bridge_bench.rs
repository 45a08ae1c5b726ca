//! Performance benchmarks for the co-simulation bridge.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench bridge_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cepbridge::adapter::WorkloadAdapter;
use cepbridge::config::BridgeConfigBuilder;
use cepbridge::scheduler::{CapacityScheduler, Schedulable};
use cepbridge::simulation::EventQueue;
use cepbridge::types::{EngineTime, VertexId};
use cepbridge::workload::{ExecutionRecord, Placement, WorkloadEngine};
use cepbridge::{EventSet, NetworkEvent};

// ============================================================================
// Benchmark Engines
// ============================================================================

/// An engine that does nothing (no allocation per call)
struct NullEngine;

impl WorkloadEngine for NullEngine {
    fn init(&mut self, _start_ms: EngineTime) {}

    fn run(&mut self, _instructions: u64, _start_ms: EngineTime, _capacity: f64) -> Vec<ExecutionRecord> {
        Vec::new()
    }

    fn enqueue(&mut self, _time_ms: EngineTime, _origin: VertexId, _dest: VertexId, _payload: EventSet) {}
}

/// An engine that sends one batch per run
struct ChattyEngine {
    origin: VertexId,
    dest: VertexId,
}

impl WorkloadEngine for ChattyEngine {
    fn init(&mut self, _start_ms: EngineTime) {}

    fn run(&mut self, _instructions: u64, start_ms: EngineTime, _capacity: f64) -> Vec<ExecutionRecord> {
        vec![ExecutionRecord::Sent {
            time_ms: start_ms,
            origin: self.origin,
            dest: self.dest,
            payload: EventSet::new(100.0, start_ms, 0.0),
        }]
    }

    fn enqueue(&mut self, _time_ms: EngineTime, _origin: VertexId, _dest: VertexId, _payload: EventSet) {}
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_tick");

    for num_workloads in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*num_workloads as u64));
        group.bench_with_input(
            BenchmarkId::new("workloads", num_workloads),
            num_workloads,
            |b, &num_workloads| {
                b.iter(|| {
                    let mut scheduler = CapacityScheduler::new();
                    let mut queue = EventQueue::new();
                    for i in 0..num_workloads as u64 {
                        let adapter = WorkloadAdapter::new(i, Placement::new([i], 1_000), Box::new(NullEngine));
                        let _ = scheduler.submit(adapter);
                    }

                    // 100 ticks of 0.1 s
                    for step in 1..=100 {
                        black_box(scheduler.tick(step as f64 * 0.1, &[1000.0, 1000.0], &mut queue).ok());
                    }
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Adapter Benchmarks
// ============================================================================

fn bench_adapter_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("adapter_drain");

    for num_events in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*num_events as u64));
        group.bench_with_input(
            BenchmarkId::new("events", num_events),
            num_events,
            |b, &num_events| {
                b.iter(|| {
                    let mut adapter = WorkloadAdapter::new(1, Placement::new([1], 1_000), Box::new(NullEngine));
                    // Reverse insertion order: worst case for the heap.
                    for i in (0..num_events).rev() {
                        let at = i as f64 * 0.001;
                        adapter.enqueue(NetworkEvent::new(at, 2, at + 0.05, 1, EventSet::default()));
                    }
                    black_box(adapter.on_tick(1_000, 101.0, 100.0, 1000.0).ok());
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// End-to-end Benchmarks
// ============================================================================

fn bench_networked_deployment(c: &mut Criterion) {
    let mut group = c.benchmark_group("deployment");
    group.sample_size(20);

    for num_pairs in [1, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::new("pairs", num_pairs), num_pairs, |b, &num_pairs| {
            b.iter(|| {
                let mut builder = BridgeConfigBuilder::new().end_time(10.0).network_delay(0.05);
                for host in 0..num_pairs as u32 * 2 {
                    builder = builder.add_host(host % 2 + 1, host + 1, vec![1000.0]);
                }
                let mut deployment = match builder.build().and_then(|config| config.build()) {
                    Ok(deployment) => deployment,
                    Err(_) => return,
                };

                for pair in 0..num_pairs as u64 {
                    let (origin, dest) = (pair * 2 + 1, pair * 2 + 2);
                    deployment.queue(
                        origin,
                        Placement::new([origin], 5).on_host(origin as u32),
                        Box::new(ChattyEngine { origin, dest }),
                    );
                    deployment.queue(dest, Placement::new([dest], 5).on_host(dest as u32), Box::new(NullEngine));
                }

                black_box(deployment.run().ok());
            });
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(
    benches,
    bench_scheduler_tick,
    bench_adapter_drain,
    bench_networked_deployment,
);

criterion_main!(benches);
