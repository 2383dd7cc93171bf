// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, Criterion};
use twoslot_stm::TxGroup;

/// Single-thread commit cost: no competing committers, no retries.
fn bench_no_contention(c: &mut Criterion) {
    let group = TxGroup::new();
    let cell = group.create(0u64);

    c.bench_function("uncontended_rw_commit", |b| {
        b.iter(|| {
            group
                .atomic(|tx| {
                    *cell.open_rw(tx)? += 1;
                    Ok(())
                })
                .expect("uncontended commit failed")
        })
    });

    c.bench_function("uncontended_read", |b| {
        b.iter(|| {
            group
                .atomic(|tx| Ok(*cell.open_r(tx)?))
                .expect("uncontended read failed")
        })
    });
}

/// Commit cost with two background committers hammering the same pair of
/// cells, so most attempts pay for conflicts and retries.
fn bench_read_write_contention(c: &mut Criterion) {
    let group = TxGroup::new();
    let a = group.create(0i64);
    let b = group.create(0i64);
    let stop = Arc::new(AtomicBool::new(false));

    let mut workers = Vec::new();
    for _ in 0..2 {
        let group = group.clone();
        let a = a.clone();
        let b = b.clone();
        let stop = stop.clone();
        workers.push(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                group
                    .atomic(|tx| {
                        *a.open_rw(tx)? += 1;
                        *b.open_rw(tx)? -= 1;
                        Ok(())
                    })
                    .expect("background commit failed");
            }
        }));
    }

    c.bench_function("contended_rw_commit", |bench| {
        bench.iter(|| {
            group
                .atomic(|tx| {
                    *a.open_rw(tx)? += 1;
                    *b.open_rw(tx)? -= 1;
                    Ok(())
                })
                .expect("contended commit failed")
        })
    });

    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        worker.join().expect("worker panicked");
    }
}

criterion_group!(benches, bench_no_contention, bench_read_write_contention);
criterion_main!(benches);
