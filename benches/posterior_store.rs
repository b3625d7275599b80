//! Posterior archive benchmarks
//!
//! - Saving a sampled trace to Parquet
//! - Loading it back
//! - Kernel cell throughput for a small notebook fragment

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tess_atlas::kernel::Kernel;
use tess_atlas::{load_posteriors, save_posteriors, PosteriorTrace, SampleIndex};

/// Trace shaped like a sampler result: `chains x draws` rows, `vars` columns
#[allow(clippy::cast_precision_loss)]
fn create_trace(chains: u32, draws: u32, vars: usize) -> PosteriorTrace {
    let rows = (chains * draws) as usize;
    let mut trace = PosteriorTrace::with_index(SampleIndex::grid(chains, draws)).unwrap();
    for v in 0..vars {
        let values = (0..rows).map(|i| (i * (v + 1)) as f64 * 1e-4).collect();
        trace.push_column(format!("depth_{v}"), values).unwrap();
    }
    trace
}

fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_posteriors");
    let dir = tempfile::tempdir().unwrap();

    for draws in [200u32, 2000] {
        let trace = create_trace(4, draws, 3);
        let path = dir.path().join(format!("save_{draws}.parquet"));
        group.bench_with_input(BenchmarkId::from_parameter(draws), &trace, |b, trace| {
            b.iter(|| save_posteriors(black_box(trace), &path).unwrap());
        });
    }

    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_posteriors");
    let dir = tempfile::tempdir().unwrap();

    for draws in [200u32, 2000] {
        let path = dir.path().join(format!("load_{draws}.parquet"));
        save_posteriors(&create_trace(4, draws, 3), &path).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(draws), &path, |b, path| {
            b.iter(|| black_box(load_posteriors(path).unwrap()));
        });
    }

    group.finish();
}

fn bench_kernel_cell(c: &mut Criterion) {
    let source = "total = 0\nfor i in range(1000) {\n    total = total + i * i\n}";
    c.bench_function("kernel_loop_cell", |b| {
        b.iter(|| {
            let mut kernel = Kernel::new();
            black_box(kernel.execute_cell(black_box(source)))
        });
    });
}

criterion_group!(benches, bench_save, bench_load, bench_kernel_cell);
criterion_main!(benches);
