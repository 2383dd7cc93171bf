// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::thread;
use std::time::Duration;

use twoslot_stm::{TxError, TxGroup};

fn assert_counters_clean(cells: &[&twoslot_stm::TCell<i32>]) {
    for cell in cells {
        assert_eq!(cell.reader_count(0), 0);
        assert_eq!(cell.reader_count(1), 0);
    }
}

fn run_clean_rollback(open_read: bool, open_write: bool) {
    let group = TxGroup::new();
    let a = group.create(0i32);
    let b = group.create(0i32);

    let mut attempts = 0;
    let result = group.atomic(|tx| {
        attempts += 1;
        if attempts > 5 {
            return Ok(());
        }
        if open_read {
            a.open_r(tx)?;
        }
        if open_write {
            *b.open_rw(tx)? = 42;
        }
        // force a rollback; outside an orelse this retries like a conflict
        tx.retry()
    });

    assert!(result.is_ok());
    assert_eq!(attempts, 6);
    assert_eq!(a.read_atomic(), 0);
    assert_eq!(b.read_atomic(), 0);
    assert_counters_clean(&[&a, &b]);
}

#[test]
fn test_clean_rollback_r() {
    run_clean_rollback(true, false);
}

#[test]
fn test_clean_rollback_w() {
    run_clean_rollback(false, true);
}

#[test]
fn test_clean_rollback_rw() {
    run_clean_rollback(true, true);
}

#[test]
fn test_abort_rolls_everything_back() {
    let group = TxGroup::new();
    let a = group.create(1i32);
    let b = group.create(2i32);

    let result: Result<(), TxError> = group.atomic(|tx| {
        *a.open_rw(tx)? = 100;
        *b.open_rw(tx)? = 200;
        tx.abort()
    });

    assert!(matches!(result, Err(TxError::Aborted)));
    assert_eq!(a.read_atomic(), 1);
    assert_eq!(b.read_atomic(), 2);
    assert_counters_clean(&[&a, &b]);
    assert_eq!(group.stats().commits, 2); // only the two read_atomic calls
}

#[test]
fn test_retry_unblocked_by_concurrent_writer() {
    let group = TxGroup::new();
    let flag = group.create(0i32);

    let writer = {
        let group = group.clone();
        let flag = flag.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            group
                .atomic(|tx| {
                    *flag.open_rw(tx)? = 1;
                    Ok(())
                })
                .expect("writer failed");
        })
    };

    // spins (with backoff) until the writer's commit becomes visible
    let seen = group
        .atomic(|tx| {
            if *flag.open_r(tx)? == 0 {
                return tx.retry();
            }
            Ok(*flag.open_r(tx)?)
        })
        .expect("reader failed");

    writer.join().expect("writer panicked");
    assert_eq!(seen, 1);
    assert_counters_clean(&[&flag]);
}

#[test]
fn test_user_error_surfaces_after_commit() {
    let group = TxGroup::new();
    let cell = group.create(0i32);

    let result: Result<(), TxError> = group.atomic(|tx| {
        *cell.open_rw(tx)? = 7;
        Err(TxError::user("ledger closed"))
    });

    match result {
        Err(TxError::User(err)) => assert_eq!(err.to_string(), "ledger closed"),
        other => panic!("expected the user error back, got {other:?}"),
    }
    // the write landed before the error surfaced
    assert_eq!(cell.read_atomic(), 7);
    assert_counters_clean(&[&cell]);
}

#[test]
fn test_rollback_is_invisible_to_other_threads() {
    let group = TxGroup::new();
    let cell = group.create(10i32);

    let result: Result<(), TxError> = group.atomic(|tx| {
        *cell.open_rw(tx)? = 99;
        // another thread reads the committed state mid-transaction
        let observer = {
            let group = group.clone();
            let cell = cell.clone();
            thread::spawn(move || {
                group
                    .atomic(|tx| Ok(*cell.open_r(tx)?))
                    .expect("observer failed")
            })
        };
        assert_eq!(observer.join().expect("observer panicked"), 10);
        tx.abort()
    });

    assert!(matches!(result, Err(TxError::Aborted)));
    assert_eq!(cell.read_atomic(), 10);
    assert_counters_clean(&[&cell]);
}

// With the fixed arena a transaction that outgrows the buffer must fail
// cleanly and leave the thread reusable.
#[cfg(feature = "fixed-buffer")]
#[test]
fn test_fixed_buffer_exhaustion_is_clean() {
    use twoslot_stm::config::FIXED_BUFFER_BYTES;

    let group = TxGroup::new();
    let big = group.create(vec![0u8; 64]);

    // each open_rw copies one page-sized block into the arena; a pile of
    // distinct cells overflows it
    let cells: Vec<_> = (0..(FIXED_BUFFER_BYTES / 64))
        .map(|_| group.create([0u64; 8]))
        .collect();

    let result: Result<(), TxError> = group.atomic(|tx| {
        big.open_rw(tx)?;
        for cell in &cells {
            cell.open_rw(tx)?;
        }
        Ok(())
    });
    assert!(matches!(result, Err(TxError::BufferExhausted)));

    // the thread stays usable afterwards
    group
        .atomic(|tx| {
            big.open_rw(tx)?.push(1);
            Ok(())
        })
        .expect("buffer must be rolled back and reusable");
    assert_eq!(big.read_atomic().len(), 65);
}
