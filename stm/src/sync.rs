// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Lock primitives for the commit path.
//!
//! With the `no_deadlocks` feature the commit lock is swapped for the
//! diagnosing variant, which reports wait cycles instead of hanging.

#[cfg(feature = "no_deadlocks")]
pub(crate) use no_deadlocks::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(not(feature = "no_deadlocks"))]
pub(crate) use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquires a shared lock, recovering from poisoning. A poisoned lock only
/// means some thread panicked while holding it; the protected clock word
/// is a plain atomic and stays consistent.
pub(crate) fn read(lock: &RwLock<()>) -> RwLockReadGuard<'_, ()> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Acquires the exclusive lock, recovering from poisoning.
pub(crate) fn write(lock: &RwLock<()>) -> RwLockWriteGuard<'_, ()> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
