// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # twoslot-stm
//!
//! Software transactional memory over versioned two-slot cells.
//!
//! Shared values live in [`TCell`]s. Each cell keeps two copies of its
//! value and a packed header selecting the active one; committers fill
//! the inactive slot and publish it with a single header store, so
//! readers are never blocked and never see a torn value. Transactions
//! run speculatively against a thread-local buffer, validate their read
//! set against a global version clock at commit, and retry transparently
//! on conflict. Committed transactions are serialisable in clock order.
//!
//! ```
//! use twoslot_stm::{atomic, TCell};
//!
//! let account_a = TCell::new(100i64);
//! let account_b = TCell::new(0i64);
//!
//! atomic(|tx| {
//!     let amount = 30;
//!     *account_a.open_rw(tx)? -= amount;
//!     *account_b.open_rw(tx)? += amount;
//!     Ok(())
//! })
//! .expect("transfer failed");
//!
//! assert_eq!(account_a.read_atomic(), 70);
//! assert_eq!(account_b.read_atomic(), 30);
//! ```
//!
//! Transactions compose: [`Transaction::nested`] folds a child
//! transaction into its parent, and [`orelse`] runs an alternative when
//! the first branch signals [`Transaction::retry`].

pub mod config;
pub mod error;

mod breaker;
mod buffer;
mod cell;
mod driver;
mod group;
mod lookup;
mod manager;
mod stats;
mod sync;
mod tx;
mod version;

pub use cell::TCell;
pub use driver::{atomic, default_group, orelse};
pub use error::{CommitFailure, TxError};
pub use group::TxGroup;
pub use stats::TxStatsSnapshot;
pub use tx::Transaction;
