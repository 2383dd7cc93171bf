// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Packed header word operations.
//!
//! Every cell carries a single word combining a monotonic version with the
//! bit selecting the currently active payload slot. Keeping both in one
//! word lets the commit protocol publish "new value + new version"
//! atomically with a single store: writers fill the inactive slot and then
//! flip the bit while installing the commit version.
//!
//! The slot bit lives in the least significant position; the version
//! occupies the remaining 63 bits.

use crate::config::VersionField;

/// Index of a payload slot, 0 or 1.
pub(crate) type SlotId = usize;

/// Extracts the active slot from a header word.
#[inline(always)]
pub(crate) fn active_offset(hdr: VersionField) -> SlotId {
    (hdr & 1) as SlotId
}

/// Extracts the inactive slot from a header word.
#[inline(always)]
pub(crate) fn inactive_offset(hdr: VersionField) -> SlotId {
    1 - active_offset(hdr)
}

/// Extracts the version from a header word.
#[inline(always)]
pub(crate) fn version_of(hdr: VersionField) -> VersionField {
    hdr >> 1
}

/// Builds a header word from an active slot and a version.
#[inline(always)]
pub(crate) fn make_header(active: SlotId, version: VersionField) -> VersionField {
    (version << 1) | active as VersionField
}

/// Produces the header a commit publishes: the new version with the slot
/// bit toggled, exposing the freshly written slot.
#[inline(always)]
pub(crate) fn set_version_and_flip(hdr: VersionField, version: VersionField) -> VersionField {
    (version << 1) | ((hdr & 1) ^ 1)
}

/// True iff a cell with this header may be observed by a transaction with
/// the given snapshot version.
#[inline(always)]
pub(crate) fn valid_in_tx(hdr: VersionField, snapshot: VersionField) -> bool {
    version_of(hdr) <= snapshot
}
