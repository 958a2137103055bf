//! Insert / search / consolidate throughput on random Gaussian data.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use starling::{IndexParams, Metric, StreamingIndex};

const DIM: usize = 64;

fn gaussian_rows(rng: &mut StdRng, n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| (0..DIM).map(|_| StandardNormal.sample(rng)).collect())
        .collect()
}

fn params() -> IndexParams {
    IndexParams {
        max_degree: 32,
        beam_width: 64,
        alpha: 1.2,
        candidate_cap: 500,
        num_frozen: 1,
    }
}

fn built_index(rows: &[Vec<f32>], capacity: usize) -> StreamingIndex<f32> {
    let aligned = starling::store::aligned_dim(DIM);
    let index = StreamingIndex::new(Metric::L2, DIM, capacity, params()).unwrap();
    let mut data = vec![0.0f32; rows.len() * aligned];
    for (i, row) in rows.iter().enumerate() {
        data[i * aligned..i * aligned + DIM].copy_from_slice(row);
    }
    let tags: Vec<u32> = (1..=rows.len() as u32).collect();
    index.build(&data, rows.len(), &tags).unwrap();
    index
}

fn bench_insert(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let base = gaussian_rows(&mut rng, 4000);
    let extra = gaussian_rows(&mut rng, 200_000);

    let mut group = c.benchmark_group("insert");
    // Bound total iterations below the slot budget above.
    group.sample_size(20);
    group.warm_up_time(std::time::Duration::from_millis(500));
    group.measurement_time(std::time::Duration::from_secs(2));
    group.bench_function(BenchmarkId::new("point", 4000), |b| {
        let index = built_index(&base, 4000 + extra.len());
        let mut next = 0usize;
        b.iter(|| {
            let row = &extra[next % extra.len()];
            index
                .insert_point(row, (4001 + next) as u32)
                .expect("bench slot budget exhausted");
            next += 1;
        });
    });
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    let base = gaussian_rows(&mut rng, 10_000);
    let queries = gaussian_rows(&mut rng, 256);
    let index = built_index(&base, 10_000);

    let mut group = c.benchmark_group("search");
    for l in [32usize, 64, 128] {
        group.bench_with_input(BenchmarkId::new("beam", l), &l, |b, &l| {
            let mut next = 0usize;
            b.iter(|| {
                let hits = index.search(&queries[next % queries.len()], 10, l).unwrap();
                next += 1;
                hits
            });
        });
    }
    group.finish();
}

fn bench_consolidate(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let base = gaussian_rows(&mut rng, 5000);

    let mut group = c.benchmark_group("consolidate");
    group.sample_size(10);
    group.bench_function("delete_10pct_and_consolidate", |b| {
        b.iter_batched(
            || {
                let index = built_index(&base, 5000);
                for tag in 1..=500u32 {
                    index.lazy_delete(tag).unwrap();
                }
                index
            },
            |index| index.consolidate_deletes().unwrap(),
            criterion::BatchSize::PerIteration,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_search, bench_consolidate);
criterion_main!(benches);
