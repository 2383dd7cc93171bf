// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-group diagnostics counters, bumped once per driver attempt.
#[derive(Default)]
pub(crate) struct TxStats {
    pub(crate) commits: AtomicU64,
    pub(crate) open_conflicts: AtomicU64,
    pub(crate) lock_conflicts: AtomicU64,
    pub(crate) validate_conflicts: AtomicU64,
    pub(crate) user_rollbacks: AtomicU64,
}

impl TxStats {
    pub(crate) fn snapshot(&self) -> TxStatsSnapshot {
        TxStatsSnapshot {
            commits: self.commits.load(Ordering::SeqCst),
            open_conflicts: self.open_conflicts.load(Ordering::SeqCst),
            lock_conflicts: self.lock_conflicts.load(Ordering::SeqCst),
            validate_conflicts: self.validate_conflicts.load(Ordering::SeqCst),
            user_rollbacks: self.user_rollbacks.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of a group's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStatsSnapshot {
    /// Successfully committed transactions.
    pub commits: u64,
    /// Attempts that failed while opening a cell.
    pub open_conflicts: u64,
    /// Attempts that failed to reserve a commit lock.
    pub lock_conflicts: u64,
    /// Attempts whose read set went stale before publication.
    pub validate_conflicts: u64,
    /// Rollbacks requested by user code (retry and abort).
    pub user_rollbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_copies_counters() {
        let stats = TxStats::default();
        stats.commits.fetch_add(3, Ordering::SeqCst);
        stats.validate_conflicts.fetch_add(1, Ordering::SeqCst);

        let snap = stats.snapshot();
        assert_eq!(snap.commits, 3);
        assert_eq!(snap.validate_conflicts, 1);
        assert_eq!(snap.open_conflicts, 0);
    }
}
