// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The atomic driver: runs user closures in a retry loop and maps the
//! error taxonomy onto it.
//!
//! Conflicts never leave the outermost frame — they roll the transaction
//! back, back off briefly and rerun the closure against a fresh snapshot.
//! Nested frames hand every failure to their enclosing frame instead, so
//! the decision is always made at the outermost level, exactly once.

use std::sync::atomic::Ordering;
use std::thread;

use lazy_static::lazy_static;
use log::debug;

use crate::breaker::BusyBreaker;
use crate::error::{CommitFailure, TxError};
use crate::group::TxGroup;
use crate::manager;
use crate::tx::Transaction;

lazy_static! {
    static ref DEFAULT_GROUP: TxGroup = TxGroup::new();
}

/// The process-wide default transaction group, used by [`atomic`] and
/// [`TCell::new`](crate::TCell::new).
pub fn default_group() -> TxGroup {
    DEFAULT_GROUP.clone()
}

/// Runs `f` as a transaction against the default group and returns its
/// result once a commit succeeds.
///
/// The closure may run any number of times; conflicting attempts are
/// rolled back and retried transparently. See [`TxGroup::atomic`] for the
/// full error contract.
pub fn atomic<R, F>(f: F) -> Result<R, TxError>
where
    F: FnMut(&mut Transaction) -> Result<R, TxError>,
{
    default_group().atomic(f)
}

/// Composes two closures into an orelse transaction: run `first`; when it
/// signals retry, run `second`; commit whichever completes.
///
/// ```
/// use twoslot_stm::{atomic, orelse, TCell};
///
/// let a = TCell::new(0usize);
/// let b = TCell::new(0usize);
/// atomic(orelse(
///     |tx| {
///         a.open_r(tx)?;
///         tx.retry()
///     },
///     |tx| {
///         *b.open_rw(tx)? = 7;
///         Ok(())
///     },
/// ))
/// .unwrap();
///
/// assert_eq!(b.read_atomic(), 7);
/// ```
pub fn orelse<R, A, B>(
    mut first: A,
    mut second: B,
) -> impl FnMut(&mut Transaction) -> Result<R, TxError>
where
    A: FnMut(&mut Transaction) -> Result<R, TxError>,
    B: FnMut(&mut Transaction) -> Result<R, TxError>,
{
    move |tx| tx.orelse(&mut first, &mut second)
}

impl TxGroup {
    /// Runs `f` as an outermost transaction against this group.
    ///
    /// Returns `Ok` with the closure's value once an attempt commits.
    /// `Err(Aborted)` reports a user abort, `Err(User)` a user error
    /// (committed first so the caller observes consistent state),
    /// `Err(BufferExhausted)` / `Err(VersionOverflow)` unrecoverable
    /// resource exhaustion. Conflict and retry signals are consumed by
    /// the loop and never returned.
    ///
    /// # Panics
    ///
    /// Panics when called while a transaction is already running on this
    /// thread; nest with [`Transaction::nested`] or
    /// [`Transaction::orelse`] instead.
    pub fn atomic<R, F>(&self, mut f: F) -> Result<R, TxError>
    where
        F: FnMut(&mut Transaction) -> Result<R, TxError>,
    {
        assert_eq!(
            manager::with(|mgr| mgr.depth()),
            0,
            "`atomic` cannot nest; use Transaction::nested or Transaction::orelse"
        );

        let breaker = BusyBreaker::default();
        loop {
            let mut tx = Transaction::begin(self, false);
            debug!(
                "tx({:?}): start at version {}",
                thread::current().id(),
                tx.version()
            );

            match f(&mut tx) {
                Ok(value) => match manager::with(|mgr| tx.commit_in(mgr)) {
                    Ok(()) => {
                        self.record(|s| {
                            s.commits.fetch_add(1, Ordering::SeqCst);
                        });
                        return Ok(value);
                    }
                    Err(TxError::ConflictOnCommit(kind)) => {
                        self.record_commit_conflict(kind);
                        debug!("tx({:?}): commit conflict ({kind}), retrying", thread::current().id());
                    }
                    Err(err) => return Err(err),
                },
                Err(TxError::ConflictOnOpen) => {
                    self.record(|s| {
                        s.open_conflicts.fetch_add(1, Ordering::SeqCst);
                    });
                    debug!("tx({:?}): open conflict, retrying", thread::current().id());
                }
                // a nested frame already failed its commit
                Err(TxError::ConflictOnCommit(kind)) => {
                    self.record_commit_conflict(kind);
                }
                Err(TxError::Retry) => {
                    // outside an orelse a retry is an ordinary conflict
                    self.record(|s| {
                        s.user_rollbacks.fetch_add(1, Ordering::SeqCst);
                    });
                }
                Err(TxError::Aborted) => {
                    self.record(|s| {
                        s.user_rollbacks.fetch_add(1, Ordering::SeqCst);
                    });
                    return Err(TxError::Aborted);
                }
                Err(err @ (TxError::BufferExhausted | TxError::VersionOverflow)) => {
                    return Err(err);
                }
                Err(user @ TxError::User(_)) => {
                    // commit so the caller observes consistent state
                    match manager::with(|mgr| tx.commit_in(mgr)) {
                        Ok(()) => {
                            self.record(|s| {
                                s.commits.fetch_add(1, Ordering::SeqCst);
                            });
                            return Err(user);
                        }
                        Err(TxError::ConflictOnCommit(kind)) => {
                            self.record_commit_conflict(kind);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }

            // rolled back; back off before the next attempt
            drop(tx);
            if !breaker.spin() {
                thread::yield_now();
                breaker.reset();
            }
        }
    }

    fn record_commit_conflict(&self, kind: CommitFailure) {
        self.record(|s| match kind {
            CommitFailure::LockFailed => {
                s.lock_conflicts.fetch_add(1, Ordering::SeqCst);
            }
            CommitFailure::ValidateFailed => {
                s.validate_conflicts.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
}

/// Runs one nested transaction frame. Single attempt: every failure is
/// the enclosing frame's problem (the outermost loop is the only place
/// that retries).
pub(crate) fn run_nested<R, F>(group: &TxGroup, mut f: F, is_orelse: bool) -> Result<R, TxError>
where
    F: FnMut(&mut Transaction) -> Result<R, TxError>,
{
    let mut tx = Transaction::begin(group, is_orelse);
    match f(&mut tx) {
        Ok(value) => {
            manager::with(|mgr| tx.commit_in(mgr))?;
            Ok(value)
        }
        Err(user @ TxError::User(_)) => {
            // nested commit cannot conflict; fold so the outer frame sees
            // the consistent speculative state
            manager::with(|mgr| tx.commit_in(mgr))?;
            Err(user)
        }
        Err(err) => Err(err),
    }
}
