//! Criterion benchmarks of the two dispatch strategies on the host backend.
//!
//! Times one strategy run per iteration (upload, dispatch, sampled
//! read-back and verification), the same unit the CLI reports.

use clflops_core::dispatch::DispatchEngine;
use clflops_core::verify::Verifier;
use clflops_core::{ComputeBackend, HostBackend, Stager, Strategy, enumerate};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn bench_strategies(c: &mut Criterion) {
    let backend = HostBackend::default();
    let device = enumerate(&backend).expect("host platform").remove(0);
    let program =
        backend.build(&device, clflops_core::kernels::VECTOROPS_SRC).expect("host build");
    let engine = DispatchEngine::new(&backend, &program, &device, Verifier::default());

    let mut group = c.benchmark_group("host_dispatch");
    for elements in [1usize << 14, 1 << 18, 1 << 22] {
        let workload = Stager::default().generate(elements as u64 * 4).expect("workload");
        group.throughput(Throughput::Elements(elements as u64));
        for strategy in Strategy::ALL {
            group.bench_with_input(
                BenchmarkId::new(strategy.kernel_name(), elements),
                &workload,
                |b, w| b.iter(|| black_box(engine.run(strategy, w).expect("dispatch"))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
