// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy.
//!
//! Store operations fail synchronously with [`TaskError`]. Remote calls fail
//! with [`RemoteError`], which the sync engine turns into notices instead of
//! propagating into caller code. Storage failures live next to the
//! persistence trait in [`crate::storage::traits`].

use thiserror::Error;

use crate::task::TaskId;

/// Synchronous failure of a Task Tree Store operation.
///
/// A failed operation never mutates the tree and never enqueues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The parent chain loops back on itself. The data model forbids this,
    /// so seeing it means persisted state is inconsistent.
    #[error("consistency check failed: parent chain of task {0} contains a cycle")]
    CycleDetected(TaskId),
}

impl TaskError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Failure of a remote API call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Timeout, connection loss, 5xx. Retried with backoff, order preserved.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// Non-retryable 4xx on a well-formed request. The operation is dropped.
    #[error("rejected by server (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// 401. Handled by the auth layer, never retried here.
    #[error("session is not authenticated")]
    Unauthorized,
}

impl RemoteError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP status that is not a success.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized,
            408 | 429 => Self::Transient(format!("HTTP {}: {}", status, message)),
            s if s >= 500 => Self::Transient(format!("HTTP {}: {}", status, message)),
            s => Self::Rejected { status: s, message },
        }
    }
}

/// Failure of a session transition (sign-in, sign-out).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    #[error("migration failed: {0}")]
    Migration(#[from] TaskError),

    #[error("already signed in as {0}")]
    AlreadySignedIn(String),
}
