//! Criterion benchmarks for the Gaussian mixture reduction kernels.
//!
//! Run with: cargo bench
//! Run a specific group: cargo bench -- prune_and_merge

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use nalgebra::{DMatrix, DVector};

use canopus::common::{Scope, VariableId};
use canopus::factors::{GaussianMixture, ReductionParams};

fn dense_mixture(num_components: usize, dim: usize) -> GaussianMixture {
    let scope = Scope::new((0..dim as u32).map(VariableId).collect());
    let params = ReductionParams {
        max_components: 4,
        prune_log_threshold: 1e-3_f64.ln(),
        merge_distance: 5.0,
    };
    // Deterministic spread of means and weights; clusters of nearby
    // components so the merge pass has real work to do.
    let items: Vec<_> = (0..num_components)
        .map(|i| {
            let center = (i / 3) as f64 * 10.0;
            let offset = (i % 3) as f64 * 0.4;
            let weight = 1.0 / (1 + i % 5) as f64;
            (
                weight,
                DVector::from_element(dim, center + offset),
                DMatrix::identity(dim, dim),
            )
        })
        .collect();
    GaussianMixture::from_weighted_moments(scope, &items, params).unwrap()
}

fn bench_prune_and_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("prune_and_merge");
    for &n in &[8usize, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mixture = dense_mixture(n, 6);
            b.iter_batched(
                || mixture.clone(),
                |mut m| {
                    m.prune_and_merge();
                    m
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_moment_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("moment_match");
    for &n in &[4usize, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mixture = dense_mixture(n, 6);
            b.iter(|| mixture.moment_match().unwrap());
        });
    }
    group.finish();
}

fn bench_absorb(c: &mut Criterion) {
    let mut group = c.benchmark_group("absorb");
    let left = dense_mixture(4, 6);
    let right = dense_mixture(4, 6);
    group.bench_function("4x4_cross_product", |b| {
        b.iter(|| left.absorb(&right).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_prune_and_merge, bench_moment_match, bench_absorb);
criterion_main!(benches);
