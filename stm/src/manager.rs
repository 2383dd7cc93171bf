// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Per-thread transaction infrastructure.
//!
//! Every thread owns exactly one [`Manager`], lazily constructed on first
//! use and living for the thread's lifetime. All transactions of a thread
//! — nested ones included — share its buffer, lookup and snapshot log.
//! Access goes through short-lived borrows in [`with`], which keeps the
//! manager reachable from drop glue and from nested driver frames without
//! holding a long-lived exclusive borrow anywhere.

use std::cell::RefCell;

use crate::buffer::{Buffer, BufferPosition};
use crate::config::{DefaultArena, VersionField};
use crate::group::TxGroup;
use crate::lookup::BufferLookup;
use crate::version::valid_in_tx;

/// A queued commit-time copy. Applied between validation and the write
/// publication of the outermost commit.
pub(crate) struct SnapshotVal {
    pub(crate) apply: Box<dyn FnOnce(&Manager)>,
}

pub(crate) struct Manager {
    pub(crate) buffer: Buffer<DefaultArena>,
    pub(crate) lookup: BufferLookup,
    pub(crate) snapshots: Vec<SnapshotVal>,
    /// Nesting depth of orelse combinators currently on the stack.
    pub(crate) orelse_depth: usize,
    /// Snapshot version of the running outermost transaction; nested
    /// transactions inherit it.
    pub(crate) last_version: VersionField,
    /// Group of the running outermost transaction.
    group: Option<TxGroup>,
}

impl Manager {
    fn new() -> Self {
        Self {
            buffer: Buffer::new(DefaultArena::default()),
            lookup: BufferLookup::new(),
            snapshots: Vec::new(),
            orelse_depth: 0,
            last_version: 0,
            group: None,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.lookup.depth()
    }

    pub(crate) fn is_orelse(&self) -> bool {
        self.orelse_depth > 0
    }

    /// Binds the manager to a group for the duration of an outermost
    /// transaction.
    pub(crate) fn bind_group(&mut self, group: &TxGroup) {
        debug_assert!(self.group.is_none());
        self.group = Some(group.clone());
    }

    pub(crate) fn unbind_group(&mut self) {
        self.group = None;
    }

    pub(crate) fn group_is(&self, group: &TxGroup) -> bool {
        self.group.as_ref().map(|g| g.same_as(group)).unwrap_or(false)
    }

    /// True iff no cell opened since the marker has moved past the
    /// snapshot. Covers the read records; the caller checks its write
    /// entries separately through the lookup.
    pub(crate) fn validate_reads(&self, pos: &BufferPosition, snapshot: VersionField) -> bool {
        self.buffer
            .all_reads_since(pos, |cell| valid_in_tx(cell.core().header(), snapshot))
    }

    /// Releases every reader registered since the marker.
    pub(crate) fn release_readers(&self, pos: &BufferPosition, snapshot: VersionField) {
        self.buffer.for_each_read_since(pos, |cell| {
            let core = cell.core();
            core.release_reader(core.reader_registered_slot(snapshot));
        });
    }

    /// Runs the destructor of every write entry in the innermost lookup
    /// sub-range.
    pub(crate) fn destroy_current_entries(&mut self) {
        for index in self.lookup.current_range() {
            let entry = self.lookup.entry_at(index);
            if !entry.is_null() {
                unsafe { ((*entry).destroy)(entry) };
            }
        }
    }
}

thread_local! {
    static MANAGER: RefCell<Manager> = RefCell::new(Manager::new());
}

/// Runs `f` with the thread's manager. Borrows are scoped to the call, so
/// transaction operations, nested driver frames and drop glue can each
/// take their own turn.
pub(crate) fn with<R>(f: impl FnOnce(&mut Manager) -> R) -> R {
    MANAGER.with(|mgr| f(&mut mgr.borrow_mut()))
}
