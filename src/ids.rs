// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Temporary identifier allocation.
//!
//! Locally created tasks get strictly decreasing negative IDs so they can
//! never collide with server-assigned positive IDs. The counter is persisted
//! together with the task list and operation log of its namespace.

use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// First temporary ID handed out by a fresh allocator.
pub const FIRST_TEMP_ID: TaskId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempIdAllocator {
    next: TaskId,
}

impl Default for TempIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TempIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self { next: FIRST_TEMP_ID }
    }

    /// Restore from a persisted counter value.
    ///
    /// A non-negative value can only come from corruption and resets the
    /// counter to [`FIRST_TEMP_ID`].
    #[must_use]
    pub fn restore(next: TaskId) -> Self {
        if next >= 0 {
            Self::new()
        } else {
            Self { next }
        }
    }

    pub fn next_temporary_id(&mut self) -> TaskId {
        let id = self.next;
        self.next = self.next.saturating_sub(1);
        id
    }

    /// Peek at the value the next call will return.
    #[must_use]
    pub fn peek(&self) -> TaskId {
        self.next
    }

    /// Move the counter below every ID in `seen`.
    ///
    /// Used after loading so a reset counter never reissues an ID that a
    /// persisted task or queued operation still refers to.
    pub fn skip_past(&mut self, seen: impl IntoIterator<Item = TaskId>) {
        if let Some(lowest) = seen.into_iter().filter(|id| *id < 0).min() {
            if lowest <= self.next {
                self.next = lowest.saturating_sub(1);
            }
        }
    }
}
