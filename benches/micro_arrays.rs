#![forbid(unsafe_code)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_collections::arrays::{merge_sort, HugeLongArray};
use sombra_collections::bitset::HugeAtomicBitSet;
use sombra_collections::idmap::{ShardedLongIdMap, SparseIdMap};
use sombra_collections::Concurrency;

const ELEMENTS: usize = 1 << 20;

fn random_values(len: usize, seed: u64) -> Vec<i64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(0..(len as i64) * 4)).collect()
}

fn micro_sort(c: &mut Criterion) {
    let values = random_values(ELEMENTS, 7);
    let mut group = c.benchmark_group("micro/merge_sort");
    group.sample_size(20);
    group.throughput(Throughput::Elements(ELEMENTS as u64));
    for workers in [1, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter_batched(
                || {
                    let mut array = HugeLongArray::new_paged(values.len());
                    array.copy_from_slice(0, &values);
                    array
                },
                |mut array| merge_sort(&mut array, Concurrency::new(workers)),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn micro_access(c: &mut Criterion) {
    let indices: Vec<usize> = random_values(4_096, 11)
        .into_iter()
        .map(|v| v as usize % ELEMENTS)
        .collect();
    let mut group = c.benchmark_group("micro/huge_array");
    group.throughput(Throughput::Elements(indices.len() as u64));
    for paged in [false, true] {
        let mut array = if paged {
            HugeLongArray::new_paged(ELEMENTS)
        } else {
            HugeLongArray::new_single(ELEMENTS)
        };
        array.set_all(|i| i as i64);
        let label = if paged { "paged" } else { "single" };
        group.bench_function(BenchmarkId::new("random_get", label), |b| {
            b.iter(|| indices.iter().map(|&i| array.get(i)).sum::<i64>());
        });
    }
    group.finish();
}

fn micro_bitset(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/bitset");
    group.throughput(Throughput::Elements(ELEMENTS as u64));
    group.bench_function("set_range_cardinality", |b| {
        let bits = HugeAtomicBitSet::new(ELEMENTS);
        b.iter(|| {
            bits.clear_all();
            bits.set_range(3, ELEMENTS - 5);
            bits.cardinality()
        });
    });
    group.finish();
}

fn micro_idmap(c: &mut Criterion) {
    let ids = random_values(100_000, 23);
    let mut group = c.benchmark_group("micro/idmap");
    group.sample_size(20);
    group.throughput(Throughput::Elements(ids.len() as u64));
    group.bench_function("sparse_build", |b| {
        b.iter(|| {
            let builder = SparseIdMap::builder(ids.len() * 4);
            builder.set_parallel(&ids, Concurrency::new(4));
            builder.build()
        });
    });
    group.bench_function("sharded_build", |b| {
        b.iter(|| {
            let builder = ShardedLongIdMap::builder(Concurrency::new(4));
            for id in &ids {
                builder.add_node(id);
            }
            builder.build()
        });
    });
    group.finish();
}

criterion_group!(benches, micro_sort, micro_access, micro_bitset, micro_idmap);
criterion_main!(benches);
