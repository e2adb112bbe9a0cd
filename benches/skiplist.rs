use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;
use towermap::SkipListMap;

const DATASET_SIZE: u64 = 10_000;
const OPS_PER_THREAD: u64 = 100;
const NUM_THREADS: usize = 32;

type IntMap = SkipListMap<u64, u64, fn(&u64, &u64) -> bool>;

fn less(a: &u64, b: &u64) -> bool {
    a < b
}

/// Pre-populates a map with a fixed set of keys.
fn setup_map() -> Arc<IntMap> {
    let map: IntMap = SkipListMap::new(less);
    for i in 0..DATASET_SIZE {
        map.put(i, i * 2);
    }
    Arc::new(map)
}

/// --- Concurrent Reads Benchmark (32 threads) ---
fn bench_concurrent_reads_32(c: &mut Criterion) {
    let map = setup_map();

    let mut group = c.benchmark_group("Concurrent Reads (32 Threads)");
    group.throughput(Throughput::Elements(OPS_PER_THREAD * NUM_THREADS as u64));

    group.bench_with_input(
        BenchmarkId::from_parameter(NUM_THREADS),
        &NUM_THREADS,
        |b, &threads| {
            b.iter(|| {
                let barrier = Arc::new(Barrier::new(threads));
                let mut handles = Vec::new();

                for i in 0..threads {
                    let map = map.clone();
                    let barrier = barrier.clone();
                    handles.push(thread::spawn(move || {
                        let mut rng = StdRng::seed_from_u64(i as u64);
                        barrier.wait();
                        for _ in 0..OPS_PER_THREAD {
                            let key = rng.random_range(0..DATASET_SIZE);
                            black_box(map.get(&key));
                        }
                    }));
                }

                for handle in handles {
                    handle.join().unwrap();
                }
            });
        },
    );
    group.finish();
}

/// --- Concurrent Writes Benchmark (32 threads) ---
fn bench_concurrent_writes_32(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Writes (32 Threads)");
    group.throughput(Throughput::Elements(OPS_PER_THREAD * NUM_THREADS as u64));

    group.bench_with_input(
        BenchmarkId::from_parameter(NUM_THREADS),
        &NUM_THREADS,
        |b, &threads| {
            b.iter(|| {
                // A fresh map per iteration so it does not grow unboundedly.
                let map: Arc<IntMap> = Arc::new(SkipListMap::new(less));
                let barrier = Arc::new(Barrier::new(threads));
                let mut handles = Vec::new();

                for i in 0..threads {
                    let map = map.clone();
                    let barrier = barrier.clone();
                    handles.push(thread::spawn(move || {
                        let mut rng = StdRng::seed_from_u64(i as u64);
                        barrier.wait();
                        for _ in 0..OPS_PER_THREAD {
                            let key = rng.random_range(0..DATASET_SIZE);
                            let value = rng.random::<u64>();
                            black_box(map.put(key, value));
                        }
                    }));
                }

                for handle in handles {
                    handle.join().unwrap();
                }
            });
        },
    );
    group.finish();
}

/// --- Mixed workload with deletes (32 threads) ---
fn bench_concurrent_mixed_32(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Mixed (32 Threads)");
    group.throughput(Throughput::Elements(OPS_PER_THREAD * NUM_THREADS as u64));

    group.bench_with_input(
        BenchmarkId::from_parameter(NUM_THREADS),
        &NUM_THREADS,
        |b, &threads| {
            b.iter(|| {
                let map = setup_map();
                let barrier = Arc::new(Barrier::new(threads));
                let mut handles = Vec::new();

                for i in 0..threads {
                    let map = map.clone();
                    let barrier = barrier.clone();
                    handles.push(thread::spawn(move || {
                        let mut rng = StdRng::seed_from_u64(i as u64);
                        barrier.wait();
                        for _ in 0..OPS_PER_THREAD {
                            let key = rng.random_range(0..DATASET_SIZE);
                            match rng.random_range(0..4) {
                                0 => {
                                    black_box(map.put(key, key));
                                }
                                1 => {
                                    black_box(map.remove(&key));
                                }
                                _ => {
                                    black_box(map.get(&key));
                                }
                            }
                        }
                    }));
                }

                for handle in handles {
                    handle.join().unwrap();
                }
            });
        },
    );
    group.finish();
}

/// --- Full iteration over a populated map ---
fn bench_iteration(c: &mut Criterion) {
    let map = setup_map();

    let mut group = c.benchmark_group("Iteration");
    group.throughput(Throughput::Elements(DATASET_SIZE));
    group.bench_function(BenchmarkId::from_parameter(DATASET_SIZE), |b| {
        b.iter(|| {
            let mut it = map.iter();
            let mut count = 0u64;
            while it.next() {
                count += 1;
            }
            black_box(count)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_concurrent_reads_32,
    bench_concurrent_writes_32,
    bench_concurrent_mixed_32,
    bench_iteration
);
criterion_main!(benches);
