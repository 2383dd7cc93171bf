// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Compile-time configuration of the runtime.
//!
//! The constants here are deliberately not runtime-tunable; they are part
//! of the protocol contract (lock spin bounds) or sizing decisions that a
//! deployment fixes once (buffer shape and size).

/// The type backing the packed cell header and the group version clock.
///
/// The header packs the version into the upper 63 bits and the active-slot
/// bit into the least significant bit, so the usable version range is
/// `0..=MAX_VERSION`.
pub type VersionField = u64;

/// Largest version the clock can hand out before overflowing the header.
pub const MAX_VERSION: VersionField = VersionField::MAX >> 1;

/// How many times a committer retries the reservation CAS on the inactive
/// slot before giving up and rolling the transaction back. Another thread
/// may hold the counter only transiently, so a couple of extra attempts
/// are worth it before paying for a full retry.
pub(crate) const COMMIT_ACQUIRE_RETRIES: usize = 3;

/// Size of the fixed arena buffer (one per thread) when the `fixed-buffer`
/// feature is enabled.
pub const FIXED_BUFFER_BYTES: usize = 64 * 1024;

/// Initial page size of the paged buffer. Later pages double in size.
pub const PAGE_BYTES: usize = 64 * 1024;

/// Alignment of arena pages. Payload types must not require more.
pub(crate) const PAGE_ALIGN: usize = 64;

#[cfg(feature = "fixed-buffer")]
pub(crate) type DefaultArena = crate::buffer::FixedArena;

#[cfg(not(feature = "fixed-buffer"))]
pub(crate) type DefaultArena = crate::buffer::PagedArena;
