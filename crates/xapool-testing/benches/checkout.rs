//! Checkout path benchmarks.
//!
//! - `checkout/local`: uncontended checkout + check-in of a pooled connection
//! - `checkout/transaction`: begin, checkout (enlist), commit, return
//! - `checkout/contended`: several threads sharing a small pool
//!
//! ## Running
//!
//! ```bash
//! cargo bench -p xapool-testing --bench checkout
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use xapool::PoolConfig;
use xapool_testing::Fixture;

fn local_checkout(c: &mut Criterion) {
    let f = Fixture::new(PoolConfig::new().max_pool_size(4));
    // Warm the free list so the loop measures reuse, not open.
    f.pool.check_out().unwrap().close();

    let mut group = c.benchmark_group("checkout");
    group.throughput(Throughput::Elements(1));

    group.bench_function("local", |b| {
        b.iter(|| {
            let conn = f.pool.check_out().unwrap();
            black_box(conn.id());
        });
    });

    group.bench_function("local_validated", |b| {
        let f = Fixture::new(PoolConfig::new().validation_query("SELECT 1"));
        f.pool.check_out().unwrap().close();
        b.iter(|| {
            let conn = f.pool.check_out().unwrap();
            black_box(conn.id());
        });
    });

    group.bench_function("transaction", |b| {
        let f = Fixture::new(PoolConfig::new());
        b.iter(|| {
            f.tm.begin().unwrap();
            let conn = f.pool.check_out().unwrap();
            black_box(conn.id());
            drop(conn);
            f.tm.commit().unwrap();
        });
    });

    group.finish();
}

fn contended_checkout(c: &mut Criterion) {
    const ROUNDS: usize = 100;

    let mut group = c.benchmark_group("checkout/contended");
    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * ROUNDS) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let f = Fixture::new(PoolConfig::new().max_pool_size(2));
            b.iter(|| {
                let barrier = Arc::new(Barrier::new(threads));
                let workers: Vec<_> = (0..threads)
                    .map(|_| {
                        let pool = f.pool.clone();
                        let barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            barrier.wait();
                            for _ in 0..ROUNDS {
                                let conn = pool.check_out().unwrap();
                                black_box(conn.id());
                            }
                        })
                    })
                    .collect();
                for worker in workers {
                    worker.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, local_checkout, contended_checkout);
criterion_main!(benches);
