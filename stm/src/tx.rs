// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The per-invocation transaction record and the commit/rollback
//! protocol.
//!
//! A [`Transaction`] captures the state of the thread's manager at begin
//! time: snapshot version, buffer position, snapshot-log offset. Commit
//! and rollback restore exactly that state; the drop implementation rolls
//! back when the record leaves scope still live, so conflicts, user
//! errors and panics all unwind to a clean buffer.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::buffer::{entry_payload, BufferPosition};
use crate::cell::TCell;
use crate::config::VersionField;
use crate::error::{CommitFailure, TxError};
use crate::group::TxGroup;
use crate::manager::{self, Manager, SnapshotVal};
use crate::version::valid_in_tx;

/// A running transaction.
///
/// Handed to the closure of [`atomic`](crate::atomic) by mutable
/// reference. Opening cells goes through
/// [`TCell::open_r`]/[`TCell::open_rw`]; composition through
/// [`nested`](Self::nested) and [`orelse`](Self::orelse). The record is
/// tied to its thread.
pub struct Transaction {
    version: VersionField,
    start: BufferPosition,
    snapshot_offset: usize,
    is_orelse: bool,
    live: bool,
    pub(crate) group: TxGroup,
    _not_send: PhantomData<*mut ()>,
}

impl Transaction {
    /// Opens a new nesting level on the thread's manager.
    pub(crate) fn begin(group: &TxGroup, is_orelse: bool) -> Transaction {
        manager::with(|mgr| {
            let version = if mgr.depth() == 0 {
                mgr.bind_group(group);
                let version = group.current_version();
                mgr.last_version = version;
                version
            } else {
                assert!(
                    mgr.group_is(group),
                    "nested transaction belongs to a different group"
                );
                mgr.last_version
            };

            if is_orelse {
                mgr.orelse_depth += 1;
            }
            let start = mgr.buffer.position();
            let snapshot_offset = mgr.snapshots.len();
            mgr.lookup.push_level();

            Transaction {
                version,
                start,
                snapshot_offset,
                is_orelse,
                live: true,
                group: group.clone(),
                _not_send: PhantomData,
            }
        })
    }

    /// The snapshot version this transaction validates against.
    pub fn version(&self) -> VersionField {
        self.version
    }

    /// True while an [`orelse`](Self::orelse) combinator is on the stack.
    /// There, [`retry`](Self::retry) switches to the alternative instead
    /// of rerunning the outermost transaction.
    pub fn in_orelse(&self) -> bool {
        manager::with(|mgr| mgr.is_orelse())
    }

    /// Signals that the transaction wants to run again from the top.
    /// Inside an [`orelse`](Self::orelse) the alternative runs instead.
    ///
    /// ```
    /// # use twoslot_stm::{atomic, TCell};
    /// # let ready = TCell::new(true);
    /// atomic(|tx| {
    ///     if !*ready.open_r(tx)? {
    ///         return tx.retry();
    ///     }
    ///     Ok(())
    /// })
    /// .unwrap();
    /// ```
    pub fn retry<R>(&self) -> Result<R, TxError> {
        Err(TxError::Retry)
    }

    /// Unconditionally aborts the transaction. The rollback happens when
    /// the error reaches the driver; it is never retried.
    pub fn abort<R>(&self) -> Result<R, TxError> {
        Err(TxError::Aborted)
    }

    /// Queues a commit-time copy of `src`'s value into `dst`.
    ///
    /// The copy is taken between validation and publication, so it sees
    /// the exact state the commit makes visible — the speculative value if
    /// this transaction wrote the cell, the committed value otherwise. If
    /// the transaction rolls back, `dst` is left untouched.
    pub fn snapshot<T>(&self, src: &TCell<T>, dst: &Arc<Mutex<T>>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let cell = src.clone();
        let dst = dst.clone();
        manager::with(move |mgr| {
            mgr.snapshots.push(SnapshotVal {
                apply: Box::new(move |mgr: &Manager| {
                    let value = match mgr.lookup.find(cell.id()) {
                        Some(entry) => unsafe { (*entry_payload::<T>(entry)).clone() },
                        // no committer can publish while we hold the clock
                        None => {
                            let slot = cell.core_ref().active_slot();
                            unsafe { (*cell.slot_ptr(slot)).clone() }
                        }
                    };
                    let mut guard = match dst.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    *guard = value;
                }),
            });
        });
    }

    /// Runs `f` as a nested transaction sharing this thread's buffer.
    ///
    /// A nested commit folds the speculative state into this transaction;
    /// a nested conflict, retry or abort comes back as the error, which
    /// callers normally pass upward with `?` so the outermost driver can
    /// handle it.
    pub fn nested<R, F>(&mut self, f: F) -> Result<R, TxError>
    where
        F: FnMut(&mut Transaction) -> Result<R, TxError>,
    {
        let group = self.group.clone();
        crate::driver::run_nested(&group, f, false)
    }

    /// Runs `first`; if it signals retry, runs `second` instead. The
    /// winner commits into this transaction.
    pub fn orelse<R, A, B>(&mut self, mut first: A, mut second: B) -> Result<R, TxError>
    where
        A: FnMut(&mut Transaction) -> Result<R, TxError>,
        B: FnMut(&mut Transaction) -> Result<R, TxError>,
    {
        let group = self.group.clone();
        match crate::driver::run_nested(&group, &mut first, true) {
            Err(TxError::Retry) => crate::driver::run_nested(&group, &mut second, true),
            other => other,
        }
    }

    /// Commits this transaction: the full protocol for the outermost
    /// level, the fold-into-parent for nested levels.
    pub(crate) fn commit_in(&mut self, mgr: &mut Manager) -> Result<(), TxError> {
        if mgr.depth() == 1 {
            self.full_commit_in(mgr)
        } else {
            self.nested_commit_in(mgr);
            Ok(())
        }
    }

    /// The outermost commit. Lock order is the sorted lookup sub-range, so
    /// competing committers always lock in the same order.
    fn full_commit_in(&mut self, mgr: &mut Manager) -> Result<(), TxError> {
        let range = mgr.lookup.current_range();

        // 1. reserve the inactive slot of every written cell
        for (locked, index) in range.clone().enumerate() {
            let entry = mgr.lookup.entry_at(index);
            let core = unsafe { (*entry).cell.core() };
            if !core.lock_for_commit(self.version) {
                for prior in range.clone().take(locked) {
                    let entry = mgr.lookup.entry_at(prior);
                    unsafe { (*entry).cell.core().release_unchanged() };
                }
                self.rollback_in(mgr);
                return Err(TxError::ConflictOnCommit(CommitFailure::LockFailed));
            }
        }

        // 2. reserve the commit version under the exclusive clock lock
        let group = self.group.clone();
        let guard = match group.lock_commit() {
            Ok(guard) => guard,
            Err(err) => {
                for index in range.clone() {
                    let entry = mgr.lookup.entry_at(index);
                    unsafe { (*entry).cell.core().release_unchanged() };
                }
                self.rollback_in(mgr);
                return Err(err);
            }
        };
        let commit_version = guard.version();

        // 3. revalidate everything opened since the snapshot
        let reads_valid = mgr.validate_reads(&self.start, self.version);
        let writes_valid = range.clone().all(|index| {
            let entry = mgr.lookup.entry_at(index);
            unsafe { valid_in_tx((*entry).cell.core().header(), self.version) }
        });
        if !(reads_valid && writes_valid) {
            drop(guard); // clock untouched
            for index in range.clone() {
                let entry = mgr.lookup.entry_at(index);
                unsafe { (*entry).cell.core().release_unchanged() };
            }
            self.rollback_in(mgr);
            return Err(TxError::ConflictOnCommit(CommitFailure::ValidateFailed));
        }

        // guaranteed completion from here on

        // 4. snapshots first: publication below moves values destructively
        let snapshots = mgr.snapshots.split_off(self.snapshot_offset);
        for snapshot in snapshots {
            (snapshot.apply)(mgr);
        }

        // 5. move speculative values into the reserved slots and flip
        for index in range.clone() {
            let entry = mgr.lookup.entry_at(index);
            unsafe {
                ((*entry).assign)(entry);
                (*entry).cell.core().update_version_and_flip(commit_version);
            }
        }

        // 6. drop the slot reservations
        for index in range.clone() {
            let entry = mgr.lookup.entry_at(index);
            unsafe { (*entry).cell.core().release_updated(commit_version) };
        }

        // 7. publish the new clock value
        guard.confirm();

        mgr.release_readers(&self.start, self.version);
        mgr.destroy_current_entries();
        mgr.lookup.truncate_current();
        mgr.buffer.release(&self.start);
        self.live = false;

        trace!("commit at version {}", commit_version);
        Ok(())
    }

    /// Nested commit: no clock, no cell traffic. Entries that shadow an
    /// enclosing copy dissolve into it; first-opens merge into the parent
    /// sub-range. Readers stay registered — they belong to the outer read
    /// set now.
    fn nested_commit_in(&mut self, mgr: &mut Manager) {
        let range = mgr.lookup.current_range();
        let mut survivors = false;

        for index in range {
            let entry = mgr.lookup.entry_at(index);
            unsafe {
                if (*entry).outer.is_null() {
                    survivors = true;
                } else {
                    ((*entry).assign)(entry);
                    ((*entry).destroy)(entry);
                    mgr.lookup.mark_removed(index);
                }
            }
        }

        if !survivors {
            mgr.buffer.release_writes(&self.start);
        }
        mgr.lookup.merge_into_parent();
        self.live = false;
    }

    /// Restores the manager to its begin-time state.
    pub(crate) fn rollback_in(&mut self, mgr: &mut Manager) {
        mgr.destroy_current_entries();
        mgr.lookup.truncate_current();
        mgr.release_readers(&self.start, self.version);
        mgr.snapshots.truncate(self.snapshot_offset);
        mgr.buffer.release(&self.start);
        self.live = false;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        manager::with(|mgr| {
            if self.live {
                trace!("transaction dropped live, rolling back");
                self.rollback_in(mgr);
            }
            mgr.lookup.pop_level();
            if self.is_orelse {
                mgr.orelse_depth -= 1;
            }
            if mgr.depth() == 0 {
                mgr.unbind_group();
            }
        });
    }
}
