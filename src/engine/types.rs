// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine.

use crate::oplog::SyncOperation;
use crate::task::TaskId;

/// Engine lifecycle state.
///
/// Use [`super::SyncHandle::state()`] to check the current state or
/// [`super::SyncHandle::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Log empty, waiting for work
    Idle,
    /// Sending the front operation
    Draining,
    /// Waiting out a transient failure before retrying the same operation
    Backoff,
    /// No connectivity, or parked after a 401
    Offline,
    /// Shut down; will not drain again
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Draining => write!(f, "Draining"),
            Self::Backoff => write!(f, "Backoff"),
            Self::Offline => write!(f, "Offline"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Something the UI layer should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// The server refused an operation; it was dropped from the log.
    Rejected { op: SyncOperation, status: u16, message: String },
    /// A task was removed locally because the create of its ancestor
    /// was rejected.
    Orphaned { task_id: TaskId, rejected_ancestor: TaskId },
    /// The session needs re-authentication. Draining is parked.
    Unauthorized,
    /// A temporary ID now has its server ID.
    Reconciled { temp_id: TaskId, server_id: TaskId },
}

/// What one drain attempt did to the front of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    /// The front operation left the log (applied or rejected).
    Advanced,
    /// Transient failure; same operation again after backoff.
    Retry,
    /// 401; wait for re-authentication.
    Unauthorized,
    /// Log was empty.
    Empty,
}
