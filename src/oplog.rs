// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync operation log.
//!
//! An ordered, persisted queue of mutations the server has not confirmed
//! yet. Insertion order is replay order. The store is the only appender and
//! the sync engine the only remover of the front.
//!
//! ```text
//!   append ──► [ seq 4 | seq 5 | seq 6 | ... ] ──► peek_front / remove_front
//!                     ▲
//!        rewrite_references(temp, server) touches every entry
//! ```

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{StatusChange, TaskId, TaskPatch, TaskPayload};

/// A pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncOperation {
    #[serde(rename_all = "camelCase")]
    CreateTask {
        temp_id: TaskId,
        /// Sent as `Idempotency-Key` so a retried create is applied once.
        client_token: Uuid,
        payload: TaskPayload,
    },
    #[serde(rename_all = "camelCase")]
    UpdateTask { id: TaskId, patch: TaskPatch },
    #[serde(rename_all = "camelCase")]
    SetStatus { id: TaskId, change: StatusChange },
    #[serde(rename_all = "camelCase")]
    DeleteTask { id: TaskId },
    #[serde(rename_all = "camelCase")]
    ReorderSubtasks { parent_id: TaskId, order: Vec<TaskId> },
}

impl SyncOperation {
    /// The task this operation acts on.
    #[must_use]
    pub fn target_id(&self) -> TaskId {
        match self {
            Self::CreateTask { temp_id, .. } => *temp_id,
            Self::UpdateTask { id, .. } | Self::SetStatus { id, .. } | Self::DeleteTask { id } => *id,
            Self::ReorderSubtasks { parent_id, .. } => *parent_id,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTask { .. } => "create",
            Self::UpdateTask { .. } => "update",
            Self::SetStatus { .. } => "set_status",
            Self::DeleteTask { .. } => "delete",
            Self::ReorderSubtasks { .. } => "reorder",
        }
    }

    /// Whether `id` appears anywhere in this operation, target or payload.
    #[must_use]
    pub fn references(&self, id: TaskId) -> bool {
        if self.target_id() == id {
            return true;
        }
        match self {
            Self::CreateTask { payload, .. } => {
                payload.parent_id == Some(id) || payload.subtask_order.contains(&id)
            }
            Self::UpdateTask { patch, .. } => {
                patch.parent_id == Some(Some(id))
                    || patch.subtask_order.as_ref().is_some_and(|o| o.contains(&id))
            }
            Self::ReorderSubtasks { order, .. } => order.contains(&id),
            Self::SetStatus { .. } | Self::DeleteTask { .. } => false,
        }
    }

    /// Strip references to `gone` tasks from an operation on a surviving task.
    ///
    /// Returns false if nothing meaningful is left: the operation targets a
    /// gone task, or it was an update whose only change pointed at one. A
    /// create or update that names a gone parent loses that parent; the later
    /// queued update that moved the task away supplies the live one.
    pub fn detach(&mut self, gone: &HashSet<TaskId>) -> bool {
        if gone.contains(&self.target_id()) {
            return false;
        }
        match self {
            Self::CreateTask { payload, .. } => {
                if payload.parent_id.is_some_and(|p| gone.contains(&p)) {
                    payload.parent_id = None;
                }
                payload.subtask_order.retain(|c| !gone.contains(c));
                true
            }
            Self::UpdateTask { patch, .. } => {
                if matches!(patch.parent_id, Some(Some(p)) if gone.contains(&p)) {
                    patch.parent_id = None;
                }
                if let Some(order) = patch.subtask_order.as_mut() {
                    order.retain(|c| !gone.contains(c));
                }
                !patch.is_empty()
            }
            Self::ReorderSubtasks { order, .. } => {
                order.retain(|c| !gone.contains(c));
                true
            }
            Self::SetStatus { .. } | Self::DeleteTask { .. } => true,
        }
    }

    /// Replace every occurrence of `from` with `to`. Returns whether anything changed.
    pub fn rewrite(&mut self, from: TaskId, to: TaskId) -> bool {
        let mut changed = false;
        let mut swap = |slot: &mut TaskId| {
            if *slot == from {
                *slot = to;
                changed = true;
            }
        };

        match self {
            Self::CreateTask { temp_id, payload, .. } => {
                swap(temp_id);
                if let Some(parent) = payload.parent_id.as_mut() {
                    swap(parent);
                }
                payload.subtask_order.iter_mut().for_each(&mut swap);
            }
            Self::UpdateTask { id, patch } => {
                swap(id);
                if let Some(Some(parent)) = patch.parent_id.as_mut() {
                    swap(parent);
                }
                if let Some(order) = patch.subtask_order.as_mut() {
                    order.iter_mut().for_each(&mut swap);
                }
            }
            Self::SetStatus { id, .. } | Self::DeleteTask { id } => swap(id),
            Self::ReorderSubtasks { parent_id, order } => {
                swap(parent_id);
                order.iter_mut().for_each(&mut swap);
            }
        }
        changed
    }
}

/// A queued operation with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub seq: u64,
    pub enqueued_at: DateTime<Utc>,
    pub op: SyncOperation,
}

#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: VecDeque<QueuedOperation>,
    next_seq: u64,
}

impl OperationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries, keeping their order.
    #[must_use]
    pub fn from_entries(entries: Vec<QueuedOperation>) -> Self {
        let next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        Self { entries: entries.into(), next_seq }
    }

    pub fn append(&mut self, op: SyncOperation) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(QueuedOperation { seq, enqueued_at: Utc::now(), op });
        seq
    }

    #[must_use]
    pub fn peek_front(&self) -> Option<&QueuedOperation> {
        self.entries.front()
    }

    pub fn remove_front(&mut self) -> Option<QueuedOperation> {
        self.entries.pop_front()
    }

    /// Remove the front entry only if it is the one identified by `seq`.
    pub fn remove_front_if(&mut self, seq: u64) -> Option<QueuedOperation> {
        match self.entries.front() {
            Some(front) if front.seq == seq => self.entries.pop_front(),
            _ => None,
        }
    }

    /// Replace `temp_id` with `server_id` across the whole remaining queue.
    /// Returns the number of operations touched.
    pub fn rewrite_references(&mut self, temp_id: TaskId, server_id: TaskId) -> usize {
        self.entries
            .iter_mut()
            .map(|entry| entry.op.rewrite(temp_id, server_id))
            .filter(|changed| *changed)
            .count()
    }

    /// Forget the tasks in `gone`: drop operations that act on them and strip
    /// them from the rest. Returns the dropped operations.
    pub fn detach(&mut self, gone: &HashSet<TaskId>) -> Vec<QueuedOperation> {
        let mut dropped = Vec::new();
        self.entries.retain_mut(|entry| {
            let original = entry.clone();
            if entry.op.detach(gone) {
                true
            } else {
                dropped.push(original);
                false
            }
        });
        dropped
    }

    #[must_use]
    pub fn references(&self, id: TaskId) -> bool {
        self.entries.iter().any(|e| e.op.references(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedOperation> {
        self.entries.iter()
    }

    /// Every task ID mentioned by a queued operation target.
    pub fn target_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.entries.iter().map(|e| e.op.target_id())
    }

    /// Sequence number the next append will get. Moves on every append.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn to_entries(&self) -> Vec<QueuedOperation> {
        self.entries.iter().cloned().collect()
    }
}
