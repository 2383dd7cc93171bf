// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use twoslot_stm::{atomic, orelse, TCell, TxError, TxGroup};

#[test]
fn test_nested_commit_propagates_to_outer() {
    let group = TxGroup::new();
    let a = group.create(0i32);
    let b = group.create(0i32);

    group
        .atomic(|tx| {
            *a.open_rw(tx)? = 1;
            tx.nested(|tx| {
                *a.open_rw(tx)? = 2;
                *b.open_rw(tx)? = 3;
                Ok(())
            })?;
            // the nested values are visible in the outer transaction
            assert_eq!(*a.open_r(tx)?, 2);
            assert_eq!(*b.open_r(tx)?, 3);
            Ok(())
        })
        .unwrap();

    assert_eq!(a.read_atomic(), 2);
    assert_eq!(b.read_atomic(), 3);
}

#[test]
fn test_outer_rollback_discards_nested_commit() {
    let group = TxGroup::new();
    let a = group.create(0i32);
    let b = group.create(0i32);

    let result: Result<(), TxError> = group.atomic(|tx| {
        *a.open_rw(tx)? = 1;
        tx.nested(|tx| {
            *a.open_rw(tx)? = 2;
            *b.open_rw(tx)? = 3;
            Ok(())
        })?;
        tx.abort()
    });

    assert!(matches!(result, Err(TxError::Aborted)));
    assert_eq!(a.read_atomic(), 0);
    assert_eq!(b.read_atomic(), 0);
    for cell in [&a, &b] {
        assert_eq!(cell.reader_count(0), 0);
        assert_eq!(cell.reader_count(1), 0);
    }
}

#[test]
fn test_nested_rollback_keeps_outer_state() {
    let group = TxGroup::new();
    let a = group.create(0i32);
    let b = group.create(0i32);

    group
        .atomic(|tx| {
            *a.open_rw(tx)? = 1;
            let nested: Result<(), TxError> = tx.nested(|tx| {
                *a.open_rw(tx)? = 77;
                *b.open_rw(tx)? = 88;
                tx.abort()
            });
            assert!(matches!(nested, Err(TxError::Aborted)));

            // the nested writes are gone, the outer one survived
            assert_eq!(*a.open_r(tx)?, 1);
            assert_eq!(*b.open_r(tx)?, 0);
            Ok(())
        })
        .unwrap();

    assert_eq!(a.read_atomic(), 1);
    assert_eq!(b.read_atomic(), 0);
}

#[test]
fn test_orelse_switches_to_alternative() {
    let a = TCell::new(0i32);
    let b = TCell::new(0i32);

    atomic(|tx| {
        tx.orelse(
            |tx| {
                a.open_r(tx)?;
                tx.retry()
            },
            |tx| {
                *b.open_rw(tx)? = 7;
                Ok(())
            },
        )
    })
    .unwrap();

    assert_eq!(a.read_atomic(), 0);
    assert_eq!(b.read_atomic(), 7);
    assert_eq!(a.reader_count(0), 0);
    assert_eq!(a.reader_count(1), 0);
}

#[test]
fn test_orelse_both_retry_reruns_whole_transaction() {
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

    let picked = group
        .atomic(|tx| {
            tx.orelse(
                |tx| {
                    if *flag.open_r(tx)? == 0 {
                        return tx.retry();
                    }
                    Ok("first")
                },
                |tx| {
                    if *flag.open_r(tx)? == 0 {
                        return tx.retry();
                    }
                    Ok("second")
                },
            )
        })
        .expect("orelse failed");

    writer.join().expect("writer panicked");
    assert_eq!(picked, "first");
}

#[test]
fn test_orelse_flag_tracks_combinator() {
    let cell = TCell::new(0i32);

    atomic(|tx| {
        assert!(!tx.in_orelse());
        tx.orelse(
            |tx| {
                assert!(tx.in_orelse());
                *cell.open_rw(tx)? = 1;
                Ok(())
            },
            |tx| tx.retry(),
        )?;
        assert!(!tx.in_orelse());
        Ok(())
    })
    .unwrap();

    assert_eq!(cell.read_atomic(), 1);
}

#[test]
fn test_free_orelse_composes() {
    let b = TCell::new(0i32);

    atomic(orelse(
        |tx: &mut twoslot_stm::Transaction| tx.retry::<i32>(),
        |tx| {
            *b.open_rw(tx)? = 5;
            Ok(5)
        },
    ))
    .unwrap();

    assert_eq!(b.read_atomic(), 5);
}

#[test]
fn test_snapshot_applies_with_commit() {
    let group = TxGroup::new();
    let cell = group.create(1i32);
    let saved = Arc::new(Mutex::new(0i32));

    group
        .atomic(|tx| {
            *cell.open_rw(tx)? = 9;
            tx.snapshot(&cell, &saved);
            // later speculative writes are part of the snapshot
            *cell.open_rw(tx)? = 10;
            Ok(())
        })
        .unwrap();

    assert_eq!(*saved.lock().unwrap(), 10);
    assert_eq!(cell.read_atomic(), 10);
}

#[test]
fn test_snapshot_of_unopened_cell_sees_committed_value() {
    let group = TxGroup::new();
    let cell = group.create(4i32);
    let other = group.create(0i32);
    let saved = Arc::new(Mutex::new(0i32));

    group
        .atomic(|tx| {
            *other.open_rw(tx)? = 1;
            tx.snapshot(&cell, &saved);
            Ok(())
        })
        .unwrap();

    assert_eq!(*saved.lock().unwrap(), 4);
}

#[test]
fn test_snapshot_dropped_on_rollback() {
    let group = TxGroup::new();
    let cell = group.create(1i32);
    let saved = Arc::new(Mutex::new(-1i32));

    let result: Result<(), TxError> = group.atomic(|tx| {
        *cell.open_rw(tx)? = 9;
        tx.snapshot(&cell, &saved);
        tx.abort()
    });

    assert!(matches!(result, Err(TxError::Aborted)));
    assert_eq!(*saved.lock().unwrap(), -1, "snapshot must apply iff commit");
}

#[test]
fn test_nested_first_open_merges_into_parent() {
    let group = TxGroup::new();
    let cell = group.create(0i32);

    group
        .atomic(|tx| {
            // the cell is first opened inside the nested transaction
            tx.nested(|tx| {
                *cell.open_rw(tx)? = 21;
                Ok(())
            })?;
            // ...and the merged entry is now the outer speculative copy
            *cell.open_rw(tx)? *= 2;
            Ok(())
        })
        .unwrap();

    assert_eq!(cell.read_atomic(), 42);
}
