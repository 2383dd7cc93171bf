// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error as DeriveError;

/// Which step of the commit protocol detected the conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeriveError)]
pub enum CommitFailure {
    /// The reservation CAS on a written cell's inactive slot did not
    /// succeed within the bounded spin.
    #[error("lock failed")]
    LockFailed,

    /// The read set became stale between open and commit.
    #[error("validate failed")]
    ValidateFailed,
}

/// Everything a transaction can fail with.
///
/// Conflicts are handled by the outermost driver and never escape a call
/// to [`atomic`](crate::atomic) — user code only observes them when it
/// inspects the result of a nested transaction.
#[derive(Debug, DeriveError)]
pub enum TxError {
    #[error("conflict while opening a cell")]
    ConflictOnOpen,

    #[error("conflict during commit ({0})")]
    ConflictOnCommit(CommitFailure),

    #[error("transaction requested retry")]
    Retry,

    #[error("transaction aborted")]
    Aborted,

    #[error("speculative buffer exhausted")]
    BufferExhausted,

    #[error("transactional version clock has overflown")]
    VersionOverflow,

    #[error("transaction failed with user error: {0}")]
    User(Box<dyn std::error::Error + Send + Sync>),
}

impl TxError {
    /// Wraps an application error so it can travel through the driver.
    pub fn user(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        TxError::User(err.into())
    }

    /// True for the conflict kinds the driver retries transparently.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TxError::ConflictOnOpen | TxError::ConflictOnCommit(_))
    }
}
