//! Graph build and search benchmarks.
//!
//! Run with: `cargo bench --bench search_benchmark`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use proxima_core::{
    Bits, DenseVectorSource, GraphBuilder, GraphSearcher, RandomAccessScoreProvider,
    VectorSimilarity,
};

/// Deterministic pseudo-random vector for benchmarking.
fn generate_vector(dim: usize, seed: u64) -> Vec<f32> {
    (0..dim)
        .map(|i| ((seed as f32 * 0.1 + i as f32 * 0.01).sin() + 1.0) / 2.0)
        .collect()
}

fn build_index(
    count: usize,
    dim: usize,
) -> (GraphBuilder, Arc<RandomAccessScoreProvider>, Vec<Vec<f32>>) {
    let rows: Vec<Vec<f32>> = (0..count).map(|i| generate_vector(dim, i as u64)).collect();
    let source = Arc::new(DenseVectorSource::from_rows(&rows, dim).unwrap());
    let provider = Arc::new(RandomAccessScoreProvider::new(
        source.clone(),
        VectorSimilarity::Euclidean,
    ));
    let builder = GraphBuilder::new(provider.clone(), 16, 100, 1.2, 1.2, false).unwrap();
    builder.build(source.as_ref()).unwrap();
    (builder, provider, rows)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    group.sample_size(10);

    for count in [1000usize] {
        let dim = 64;
        let rows: Vec<Vec<f32>> = (0..count).map(|i| generate_vector(dim, i as u64)).collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &rows, |b, rows| {
            b.iter(|| {
                let source = Arc::new(DenseVectorSource::from_rows(rows, dim).unwrap());
                let provider = Arc::new(RandomAccessScoreProvider::new(
                    source.clone(),
                    VectorSimilarity::Euclidean,
                ));
                let builder =
                    GraphBuilder::new(provider, 16, 100, 1.2, 1.2, false).unwrap();
                builder.build(source.as_ref()).unwrap();
                black_box(builder.graph().size(0))
            });
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_search");

    let (builder, provider, _) = build_index(5000, 64);
    let query = generate_vector(64, 987_654);

    for ef in [32usize, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(ef), &ef, |b, &ef| {
            let mut searcher = GraphSearcher::new();
            b.iter(|| {
                let ssp = provider.search_provider_for(&query).unwrap();
                let result = searcher.search(builder.graph(), &ssp, 10, ef, &Bits::All);
                black_box(result.node_scores.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
