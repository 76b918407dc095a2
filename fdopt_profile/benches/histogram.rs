//! Histogram operation benchmarks: build, cross, overlap, quantile.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fdopt_profile::Histogram;

fn filled(bins: u32, samples: usize) -> Histogram {
    let mut h = Histogram::new();
    for i in 0..samples {
        // deterministic spread over (0, 1]
        let v = ((i * 7919) % 1000) as f64 / 1000.0 + 0.001;
        h.add_to_list(v, 1.0 + (i % 3) as f64);
    }
    h.build_from_list(bins, samples as f64 * 2.0, None);
    h
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("build_from_list_10k", |b| {
        b.iter(|| {
            let mut h = Histogram::new();
            for i in 0..10_000 {
                h.add_to_list(((i % 997) as f64 + 1.0) / 997.0, 1.0);
            }
            h.build_from_list(black_box(20), 10_000.0, None);
            black_box(h.coverage())
        })
    });
}

fn bench_cross(c: &mut Criterion) {
    let a = filled(20, 1000);
    let b = filled(20, 1000);
    c.bench_function("cross_20x20", |bench| {
        bench.iter(|| black_box(a.cross(black_box(&b)).mean(false)))
    });
}

fn bench_overlap(c: &mut Criterion) {
    let a = filled(20, 1000);
    let b = filled(30, 1000);
    c.bench_function("overlap_rebinned", |bench| {
        bench.iter(|| black_box(a.overlap(black_box(&b), true)))
    });
    c.bench_function("earth_mover_rebinned", |bench| {
        bench.iter(|| black_box(a.earth_mover(black_box(&b))))
    });
}

fn bench_quantile(c: &mut Criterion) {
    let a = filled(50, 5000);
    c.bench_function("quantile_sweep", |bench| {
        bench.iter(|| {
            let mut acc = 0.0;
            for i in 0..=100 {
                acc += a.quantile(i as f64 / 100.0);
            }
            black_box(acc)
        })
    });
}

criterion_group!(benches, bench_build, bench_cross, bench_overlap, bench_quantile);
criterion_main!(benches);
