// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Sorted index from cell identity to buffer entry.
//!
//! One flat vector of `(cell id, entry)` pairs, cut into sub-ranges by a
//! delimiter stack — one sub-range per active nesting level, each kept
//! sorted by id. Binary search answers "is this cell already open, and in
//! which level"; the sort order doubles as the canonical commit-lock order.

use crate::buffer::EntryHeader;

pub(crate) struct BufferLookup {
    entries: Vec<(usize, *mut EntryHeader)>,
    delims: Vec<usize>,
}

impl BufferLookup {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            delims: Vec::new(),
        }
    }

    /// Current nesting depth; zero means no transaction is running.
    pub(crate) fn depth(&self) -> usize {
        self.delims.len()
    }

    /// Starts a new nesting level.
    pub(crate) fn push_level(&mut self) {
        self.delims.push(self.entries.len());
    }

    /// Ends the innermost level. Its sub-range must already be empty
    /// (rolled back) or merged into the parent.
    pub(crate) fn pop_level(&mut self) {
        let delim = self.delims.pop().expect("no level to pop");
        debug_assert_eq!(delim, self.entries.len());
    }

    fn current_start(&self) -> usize {
        *self.delims.last().expect("no transaction running")
    }

    /// Bounds of the innermost sub-range.
    pub(crate) fn current_range(&self) -> std::ops::Range<usize> {
        self.current_start()..self.entries.len()
    }

    pub(crate) fn entry_at(&self, index: usize) -> *mut EntryHeader {
        self.entries[index].1
    }

    fn search(&self, lo: usize, hi: usize, id: usize) -> Result<usize, usize> {
        self.entries[lo..hi]
            .binary_search_by(|(entry_id, _)| entry_id.cmp(&id))
            .map(|i| lo + i)
            .map_err(|i| lo + i)
    }

    /// Binary search in the innermost sub-range only.
    pub(crate) fn find_in_current(&self, id: usize) -> Option<*mut EntryHeader> {
        let lo = self.current_start();
        self.search(lo, self.entries.len(), id)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Searches the enclosing levels, innermost outward.
    pub(crate) fn find_in_parents(&self, id: usize) -> Option<*mut EntryHeader> {
        let levels = self.delims.len();
        for level in (0..levels.saturating_sub(1)).rev() {
            let lo = self.delims[level];
            let hi = self.delims[level + 1];
            if let Ok(i) = self.search(lo, hi, id) {
                return Some(self.entries[i].1);
            }
        }
        None
    }

    /// Searches every level, innermost outward.
    pub(crate) fn find(&self, id: usize) -> Option<*mut EntryHeader> {
        self.find_in_current(id).or_else(|| self.find_in_parents(id))
    }

    /// Inserts into the innermost sub-range, keeping it sorted. The id
    /// must not already be present there.
    pub(crate) fn insert_current(&mut self, id: usize, entry: *mut EntryHeader) {
        let lo = self.current_start();
        match self.search(lo, self.entries.len(), id) {
            Ok(_) => unreachable!("cell already open in this level"),
            Err(at) => self.entries.insert(at, (id, entry)),
        }
    }

    /// Marks an entry of the innermost sub-range as dissolved into its
    /// parent; `merge_into_parent` drops it.
    pub(crate) fn mark_removed(&mut self, index: usize) {
        self.entries[index].1 = std::ptr::null_mut();
    }

    /// Folds the innermost sub-range into its parent: dissolved entries
    /// are dropped, the survivors (already sorted) are merged with the
    /// parent sub-range in O(n + m).
    pub(crate) fn merge_into_parent(&mut self) {
        let levels = self.delims.len();
        assert!(levels >= 2, "merge requires an enclosing level");

        let current = self.delims[levels - 1];
        let parent = self.delims[levels - 2];

        let mut inner = self.entries.split_off(current);
        inner.retain(|(_, entry)| !entry.is_null());

        let outer = self.entries.split_off(parent);
        let merged = merge_sorted(outer, inner);
        self.entries.extend(merged);

        // the level itself is popped by the transaction going out of scope
        *self.delims.last_mut().expect("level present") = self.entries.len();
    }

    /// Drops the innermost sub-range (rollback). Destructors of the
    /// dropped entries must already have run.
    pub(crate) fn truncate_current(&mut self) {
        let start = self.current_start();
        self.entries.truncate(start);
    }
}

fn merge_sorted(
    lhs: Vec<(usize, *mut EntryHeader)>,
    rhs: Vec<(usize, *mut EntryHeader)>,
) -> Vec<(usize, *mut EntryHeader)> {
    let mut merged = Vec::with_capacity(lhs.len() + rhs.len());
    let mut lhs = lhs.into_iter().peekable();
    let mut rhs = rhs.into_iter().peekable();

    loop {
        match (lhs.peek(), rhs.peek()) {
            (Some(l), Some(r)) => {
                if l.0 <= r.0 {
                    merged.push(lhs.next().expect("peeked"));
                } else {
                    merged.push(rhs.next().expect("peeked"));
                }
            }
            (Some(_), None) => merged.push(lhs.next().expect("peeked")),
            (None, Some(_)) => merged.push(rhs.next().expect("peeked")),
            (None, None) => break,
        }
    }
    merged
}
