//! Radius query benchmarks: linear scan vs LSH
//!
//! Run with: cargo bench --bench retrieval

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use facevault::{Collection, Linear, Lsh, LshParams, Retrieval, Settings};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DIM: usize = 128;

fn random_collection(n: usize) -> Collection {
    let mut rng = StdRng::seed_from_u64(42);
    let mut collection = Collection::empty();
    for _ in 0..n {
        let v: Vec<f64> = (0..DIM).map(|_| rng.gen::<f64>() * 0.2 - 0.1).collect();
        collection.append_point(v, Default::default()).unwrap();
    }
    collection
}

fn bench_query(c: &mut Criterion) {
    let settings = Settings::default();
    let mut group = c.benchmark_group("query");
    group.sample_size(20);

    for n in [1_000, 10_000] {
        let data = random_collection(n);
        let query = data.vector(0).unwrap().to_vec();

        let mut linear = Linear::in_memory(&settings);
        linear.append(data.clone(), None).unwrap();
        group.bench_with_input(BenchmarkId::new("linear", n), &query, |b, q| {
            b.iter(|| linear.query(black_box(q), settings.recognition_threshold))
        });

        let mut lsh = Lsh::in_memory(LshParams::random().with_seed(42), &settings);
        lsh.append(data, None).unwrap();
        group.bench_with_input(BenchmarkId::new("lsh", n), &query, |b, q| {
            b.iter(|| lsh.query(black_box(q), settings.recognition_threshold))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_query);
criterion_main!(benches);
