// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The transaction group: one version clock per set of cells that may
//! transact together.
//!
//! Snapshot reads take the clock lock shared; the single committer takes
//! it exclusively between validation and publication. The clock word
//! itself is atomic, and is only advanced by [`CommitGuard::confirm`] — a
//! guard that goes out of scope without confirming leaves the clock
//! untouched, so no error path can leak a half-published version.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cell::TCell;
use crate::config::{VersionField, MAX_VERSION};
use crate::error::TxError;
use crate::stats::{TxStats, TxStatsSnapshot};
use crate::sync;

struct GroupInner {
    clock: AtomicU64,
    commit_lock: sync::RwLock<()>,
    stats: TxStats,
}

/// Handle to a transaction group. Clones share the same clock.
#[derive(Clone)]
pub struct TxGroup {
    inner: Arc<GroupInner>,
}

impl TxGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                clock: AtomicU64::new(0),
                commit_lock: sync::RwLock::new(()),
                stats: TxStats::default(),
            }),
        }
    }

    /// Creates a cell owned by this group.
    pub fn create<T>(&self, value: T) -> TCell<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        TCell::with_group(value, self.clone())
    }

    /// Current clock value; the snapshot version of a starting outermost
    /// transaction. Waits for an in-flight commit to finish publishing.
    pub fn current_version(&self) -> VersionField {
        let _shared = sync::read(&self.inner.commit_lock);
        self.inner.clock.load(Ordering::SeqCst)
    }

    /// Diagnostics counters of this group.
    pub fn stats(&self) -> TxStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub(crate) fn same_as(&self, other: &TxGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn record(&self, f: impl FnOnce(&TxStats)) {
        f(&self.inner.stats);
    }

    /// Takes the clock exclusively and reserves the next version for a
    /// commit. The reservation is only published by
    /// [`CommitGuard::confirm`].
    pub(crate) fn lock_commit(&self) -> Result<CommitGuard<'_>, TxError> {
        let guard = sync::write(&self.inner.commit_lock);
        let current = self.inner.clock.load(Ordering::SeqCst);
        if current >= MAX_VERSION {
            return Err(TxError::VersionOverflow);
        }
        Ok(CommitGuard {
            _exclusive: guard,
            clock: &self.inner.clock,
            version: current + 1,
        })
    }
}

impl Default for TxGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive ownership of a group's clock for the duration of one commit.
pub(crate) struct CommitGuard<'g> {
    _exclusive: sync::RwLockWriteGuard<'g, ()>,
    clock: &'g AtomicU64,
    version: VersionField,
}

impl CommitGuard<'_> {
    /// The version this commit publishes under.
    pub(crate) fn version(&self) -> VersionField {
        self.version
    }

    /// Advances the clock to the reserved version and releases it.
    pub(crate) fn confirm(self) {
        self.clock.store(self.version, Ordering::SeqCst);
    }
}
