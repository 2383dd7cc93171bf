// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Transactional cells.
//!
//! A [`TCell`] owns a packed header word, two payload slots and two reader
//! counters. The slot named by the header's active bit holds the last
//! committed value; the other slot is scratch space for the next commit.
//! Readers pin their slot with a counter so a later committer cannot
//! reclaim it under them, and committers reserve the inactive slot with a
//! 0 → 1 CAS on its counter before writing into it.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::{entry_payload, Entry, EntryHeader};
use crate::config::{VersionField, COMMIT_ACQUIRE_RETRIES};
use crate::error::TxError;
use crate::group::TxGroup;
use crate::manager;
use crate::tx::Transaction;
use crate::version::{
    active_offset, inactive_offset, make_header, set_version_and_flip, valid_in_tx, version_of,
    SlotId,
};

/// The untyped half of a cell: header and reader counters, and the whole
/// open/release protocol. Everything here is a single atomic word or a
/// counter op, so `&CellCore` is freely shared between threads.
pub(crate) struct CellCore {
    header: AtomicU64,
    readers: [AtomicI32; 2],
}

impl CellCore {
    pub(crate) fn new() -> Self {
        // fresh cells start at version 0 and are valid in every snapshot
        Self {
            header: AtomicU64::new(make_header(0, 0)),
            readers: [AtomicI32::new(0), AtomicI32::new(0)],
        }
    }

    #[inline]
    pub(crate) fn header(&self) -> VersionField {
        self.header.load(Ordering::SeqCst)
    }

    pub(crate) fn version(&self) -> VersionField {
        version_of(self.header())
    }

    pub(crate) fn active_slot(&self) -> SlotId {
        active_offset(self.header())
    }

    pub(crate) fn reader_count(&self, slot: SlotId) -> i32 {
        self.readers[slot].load(Ordering::SeqCst)
    }

    /// Registers a reader on the active slot.
    ///
    /// The slot is guessed from a first header load; if the header moved
    /// while the counter was incremented the registration is undone and
    /// the open fails, because the guessed slot may already be scratch
    /// space for a committer.
    pub(crate) fn acquire_for_read(&self, snapshot: VersionField) -> Result<SlotId, TxError> {
        let hdr = self.header();
        if !valid_in_tx(hdr, snapshot) {
            return Err(TxError::ConflictOnOpen);
        }

        let active = active_offset(hdr);
        self.readers[active].fetch_add(1, Ordering::SeqCst);

        if self.header() != hdr {
            self.readers[active].fetch_sub(1, Ordering::SeqCst);
            return Err(TxError::ConflictOnOpen);
        }

        Ok(active)
    }

    pub(crate) fn release_reader(&self, slot: SlotId) {
        self.readers[slot].fetch_sub(1, Ordering::SeqCst);
    }

    /// Recovers the slot a reader registered on. While a reader counter is
    /// held at most one flip can happen (the next committer would need the
    /// reader's slot and fails its CAS), so the registered slot is the
    /// active one if the version still fits the snapshot, the inactive one
    /// otherwise.
    pub(crate) fn reader_registered_slot(&self, snapshot: VersionField) -> SlotId {
        let hdr = self.header();
        if valid_in_tx(hdr, snapshot) {
            active_offset(hdr)
        } else {
            inactive_offset(hdr)
        }
    }

    /// Reserves the inactive slot for a commit: CAS its counter 0 → 1.
    ///
    /// Bounded spin; another thread may hold the counter only briefly (a
    /// reader that is about to fail its own double-check), so a couple of
    /// attempts are worthwhile before the whole transaction retries.
    pub(crate) fn lock_for_commit(&self, snapshot: VersionField) -> bool {
        let hdr = self.header();
        if !valid_in_tx(hdr, snapshot) {
            return false;
        }

        let target = inactive_offset(hdr);
        for _ in 0..COMMIT_ACQUIRE_RETRIES {
            if self.readers[target]
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if self.header() != hdr {
                    self.readers[target].fetch_sub(1, Ordering::SeqCst);
                    return false;
                }
                return true;
            }
            core::hint::spin_loop();
        }
        false
    }

    /// Undoes `lock_for_commit` on a rollback path: the header never
    /// moved, so the reservation still sits on the inactive slot.
    pub(crate) fn release_unchanged(&self) {
        let slot = inactive_offset(self.header());
        self.readers[slot].fetch_sub(1, Ordering::SeqCst);
    }

    /// Drops the reservation after a successful flip. The reserved slot
    /// became the active one; if a later committer flipped again it is
    /// inactive once more.
    pub(crate) fn release_updated(&self, commit_version: VersionField) {
        let hdr = self.header();
        let slot = if version_of(hdr) != commit_version {
            inactive_offset(hdr)
        } else {
            active_offset(hdr)
        };
        self.readers[slot].fetch_sub(1, Ordering::SeqCst);
    }

    /// Publishes the inactive slot: installs the commit version and
    /// toggles the active bit in one store. `SeqCst` orders the preceding
    /// payload write before the flip, so no reader can observe the new
    /// header with the old slot contents.
    pub(crate) fn update_version_and_flip(&self, version: VersionField) {
        let hdr = self.header();
        self.header
            .store(set_version_and_flip(hdr, version), Ordering::SeqCst);
    }
}

/// Erased view of a cell used by read records and buffer entries, so one
/// buffer can hold cells of many payload types. Holding the `Arc` keeps
/// the cell alive for as long as any transaction references it.
pub(crate) trait CellBase: Send + Sync {
    fn core(&self) -> &CellCore;
}

pub(crate) struct CellInner<T>
where
    T: Clone,
{
    pub(crate) core: CellCore,
    slots: [UnsafeCell<T>; 2],
    group: TxGroup,
}

impl<T> CellInner<T>
where
    T: Clone,
{
    #[inline]
    pub(crate) fn slot_ptr(&self, slot: SlotId) -> *mut T {
        self.slots[slot].get()
    }
}

// Slot payloads are only touched under the cell protocol: readers pin a
// slot before dereferencing it, committers own the inactive slot via the
// counter CAS and the group's exclusive clock lock.
unsafe impl<T> Send for CellInner<T> where T: Clone + Send + Sync {}
unsafe impl<T> Sync for CellInner<T> where T: Clone + Send + Sync {}

impl<T> CellBase for CellInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn core(&self) -> &CellCore {
        &self.core
    }
}

/// A transactional memory cell.
///
/// Handles are cheap to clone and share the same underlying storage; the
/// pointer identity of that storage orders cells during commit.
///
/// # Example
/// ```
/// use twoslot_stm::{atomic, TCell};
///
/// let cell = TCell::new(21usize);
/// atomic(|tx| {
///     let doubled = *cell.open_r(tx)? * 2;
///     *cell.open_rw(tx)? = doubled;
///     Ok(())
/// })
/// .expect("transaction failed");
///
/// assert_eq!(cell.read_atomic(), 42);
/// ```
pub struct TCell<T>
where
    T: Clone,
{
    inner: Arc<CellInner<T>>,
}

impl<T> TCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a cell in the process-wide default transaction group. The
    /// initial value populates both slots.
    pub fn new(value: T) -> Self {
        Self::with_group(value, crate::driver::default_group())
    }

    pub(crate) fn with_group(value: T, group: TxGroup) -> Self {
        Self {
            inner: Arc::new(CellInner {
                core: CellCore::new(),
                slots: [UnsafeCell::new(value.clone()), UnsafeCell::new(value)],
                group,
            }),
        }
    }

    /// The transaction group this cell belongs to.
    pub fn group(&self) -> &TxGroup {
        &self.inner.group
    }

    /// Identity of the cell: the address of its shared storage. Stable for
    /// the cell's lifetime and the canonical commit-lock order.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Opens the cell for reading.
    ///
    /// Returns the speculative value if this or an enclosing transaction
    /// already has the cell open, otherwise pins the active slot and
    /// returns the committed value. Fails with
    /// [`TxError::ConflictOnOpen`] when the cell has moved past the
    /// transaction's snapshot.
    pub fn open_r<'t>(&self, tx: &'t Transaction) -> Result<&'t T, TxError> {
        let ptr = manager::with(|mgr| {
            assert!(
                mgr.group_is(&self.inner.group),
                "cell belongs to a different transaction group"
            );

            if let Some(entry) = mgr.lookup.find(self.id()) {
                return Ok(entry_payload::<T>(entry) as *const T);
            }

            let slot = self.inner.core.acquire_for_read(tx.version())?;
            // register before anything else can fail, so rollback releases it
            mgr.buffer.push_read(self.inner.clone());
            Ok(self.inner.slot_ptr(slot) as *const T)
        })?;

        Ok(unsafe { &*ptr })
    }

    /// Opens the cell for writing and returns the speculative copy.
    ///
    /// The first open in a transaction copies the committed value (or the
    /// enclosing transaction's speculative value) into the thread buffer;
    /// later opens return the same copy.
    pub fn open_rw<'t>(&self, tx: &'t mut Transaction) -> Result<&'t mut T, TxError> {
        let ptr = manager::with(|mgr| {
            assert!(
                mgr.group_is(&self.inner.group),
                "cell belongs to a different transaction group"
            );

            if let Some(entry) = mgr.lookup.find_in_current(self.id()) {
                return Ok(entry_payload::<T>(entry));
            }

            if let Some(outer) = mgr.lookup.find_in_parents(self.id()) {
                let value = unsafe { (*entry_payload::<T>(outer)).clone() };
                let target = unsafe { (*outer).target_slot };
                let entry = mgr.buffer.push_entry::<T>(
                    self.inner.clone(),
                    outer,
                    target,
                    assign_outer::<T>,
                    destroy_entry::<T>,
                    value,
                )?;
                mgr.lookup.insert_current(self.id(), entry);
                return Ok(entry_payload::<T>(entry));
            }

            let slot = self.inner.core.acquire_for_read(tx.version())?;
            let value = {
                // release the transient reader even if the clone panics
                let _guard = ReaderGuard {
                    core: &self.inner.core,
                    slot,
                };
                unsafe { (*self.inner.slot_ptr(slot)).clone() }
            };
            let entry = mgr.buffer.push_entry::<T>(
                self.inner.clone(),
                ptr::null_mut(),
                1 - slot,
                assign_slot::<T>,
                destroy_entry::<T>,
                value,
            )?;
            mgr.lookup.insert_current(self.id(), entry);
            Ok(entry_payload::<T>(entry))
        })?;

        Ok(unsafe { &mut *ptr })
    }

    /// Reads the committed value through a one-shot transaction.
    ///
    /// Must not be called from inside a running transaction on the same
    /// thread; use [`open_r`](Self::open_r) there instead.
    pub fn read_atomic(&self) -> T {
        self.inner
            .group
            .clone()
            .atomic(|tx| Ok(self.open_r(tx)?.clone()))
            .expect("read-only transaction cannot fail")
    }

    /// Replaces the committed value through a one-shot transaction.
    ///
    /// Must not be called from inside a running transaction on the same
    /// thread; use [`open_rw`](Self::open_rw) there instead.
    pub fn write_atomic(&self, value: T) -> Result<(), TxError> {
        self.inner.group.clone().atomic(|tx| {
            *self.open_rw(tx)? = value.clone();
            Ok(())
        })
    }

    /// Committed version of the cell.
    pub fn version(&self) -> VersionField {
        self.inner.core.version()
    }

    /// Current reader/committer counter of a slot. Diagnostics only: after
    /// every terminated transaction both counters return to zero.
    pub fn reader_count(&self, slot: usize) -> i32 {
        self.inner.core.reader_count(slot)
    }

    pub(crate) fn core_ref(&self) -> &CellCore {
        &self.inner.core
    }

    pub(crate) fn slot_ptr(&self, slot: SlotId) -> *mut T {
        self.inner.slot_ptr(slot)
    }
}

struct ReaderGuard<'a> {
    core: &'a CellCore,
    slot: SlotId,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.core.release_reader(self.slot);
    }
}

/// Moves the speculative value into the slot captured at open time. The
/// displaced slot value lands in the buffer and is dropped by the entry's
/// destructor.
unsafe fn assign_slot<T>(header: *mut EntryHeader)
where
    T: Clone + Send + Sync + 'static,
{
    let entry = header as *mut Entry<T>;
    let cell = Arc::as_ptr(&*(*header).cell) as *const () as *const CellInner<T>;
    let slot = (*cell).slot_ptr((*header).target_slot);
    ptr::swap(slot, &mut *(*entry).value);
}

/// Moves the speculative value into the enclosing transaction's copy.
unsafe fn assign_outer<T>(header: *mut EntryHeader)
where
    T: Clone + Send + Sync + 'static,
{
    let entry = header as *mut Entry<T>;
    let outer = (*header).outer as *mut Entry<T>;
    ptr::swap(&mut *(*outer).value, &mut *(*entry).value);
}

unsafe fn destroy_entry<T>(header: *mut EntryHeader)
where
    T: Clone + Send + Sync + 'static,
{
    let entry = header as *mut Entry<T>;
    ManuallyDrop::drop(&mut (*entry).value);
    ManuallyDrop::drop(&mut (*header).cell);
}

impl<T> Clone for TCell<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for TCell<T>
where
    T: Clone,
{
    /// Handle identity, not value equality.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for TCell<T> where T: Clone {}

impl<T> fmt::Debug for TCell<T>
where
    T: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TCell")
            .field("version", &self.inner.core.version())
            .field("active_slot", &self.inner.core.active_slot())
            .finish()
    }
}
