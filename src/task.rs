// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Task data model.
//!
//! A [`Task`] is keyed by a signed integer: negative IDs are temporary and
//! issued locally by [`crate::ids::TempIdAllocator`], positive IDs are
//! assigned by the server. The wire and persisted format is camelCase JSON.
//!
//! # Example
//!
//! ```
//! use taskrank_sync::{Task, TaskStatus};
//! use chrono::Utc;
//!
//! let task = Task::new(-1, "guest", "Write report", Utc::now());
//! assert!(task.is_temporary());
//! assert_eq!(task.status, TaskStatus::Open);
//! assert!(task.completed_at.is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Task identifier. Negative = local and unsynced, positive = server-confirmed.
pub type TaskId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Pinned,
    Completed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Pinned => write!(f, "pinned"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Five-level ordinal used by all four rank attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankLevel {
    Lowest = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    Highest = 5,
}

/// How a task orders its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskSortMode {
    /// Follow the surrounding list's ordering.
    Inherit,
    /// Follow `subtask_order`.
    Manual,
}

impl Default for SubtaskSortMode {
    fn default() -> Self {
        Self::Inherit
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<RankLevel>,
    #[serde(default)]
    pub ease: Option<RankLevel>,
    #[serde(default)]
    pub enjoyment: Option<RankLevel>,
    #[serde(default)]
    pub time: Option<RankLevel>,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    /// Complete this task automatically once every child is completed.
    #[serde(default)]
    pub auto_complete: bool,
    #[serde(default)]
    pub subtask_sort_mode: SubtaskSortMode,
    /// Child IDs in display order. Only meaningful in manual mode.
    #[serde(default)]
    pub subtask_order: Vec<TaskId>,
    #[serde(default)]
    pub in_progress_accumulated_ms: u64,
    #[serde(default)]
    pub in_progress_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Status held before propagation auto-completed this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_before_auto_complete: Option<TaskStatus>,
}

impl Task {
    pub fn new(id: TaskId, owner_id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            name: name.into(),
            description: String::new(),
            status: TaskStatus::Open,
            priority: None,
            ease: None,
            enjoyment: None,
            time: None,
            parent_id: None,
            auto_complete: false,
            subtask_sort_mode: SubtaskSortMode::Inherit,
            subtask_order: Vec::new(),
            in_progress_accumulated_ms: 0,
            in_progress_started_at: None,
            created_at: now,
            completed_at: None,
            status_before_auto_complete: None,
        }
    }

    /// Build a task from content authored in the UI.
    pub fn from_content(id: TaskId, owner_id: impl Into<String>, content: TaskContent, now: DateTime<Utc>) -> Self {
        let mut task = Self::new(id, owner_id, content.name, now);
        task.description = content.description;
        task.priority = content.priority;
        task.ease = content.ease;
        task.enjoyment = content.enjoyment;
        task.time = content.time;
        task.parent_id = content.parent_id;
        task.auto_complete = content.auto_complete;
        task
    }

    /// Rebuild a task from a create payload under the given ID.
    pub fn from_payload(id: TaskId, payload: TaskPayload) -> Self {
        Self {
            id,
            owner_id: payload.owner_id,
            name: payload.name,
            description: payload.description,
            status: payload.status,
            priority: payload.priority,
            ease: payload.ease,
            enjoyment: payload.enjoyment,
            time: payload.time,
            parent_id: payload.parent_id,
            auto_complete: payload.auto_complete,
            subtask_sort_mode: payload.subtask_sort_mode,
            subtask_order: payload.subtask_order,
            in_progress_accumulated_ms: payload.in_progress_accumulated_ms,
            in_progress_started_at: payload.in_progress_started_at,
            created_at: payload.created_at,
            completed_at: payload.completed_at,
            status_before_auto_complete: payload.status_before_auto_complete,
        }
    }

    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.id < 0
    }

    #[must_use]
    pub fn payload(&self) -> TaskPayload {
        TaskPayload {
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            status: self.status,
            priority: self.priority,
            ease: self.ease,
            enjoyment: self.enjoyment,
            time: self.time,
            parent_id: self.parent_id,
            auto_complete: self.auto_complete,
            subtask_sort_mode: self.subtask_sort_mode,
            subtask_order: self.subtask_order.clone(),
            in_progress_accumulated_ms: self.in_progress_accumulated_ms,
            in_progress_started_at: self.in_progress_started_at,
            created_at: self.created_at,
            completed_at: self.completed_at,
            status_before_auto_complete: self.status_before_auto_complete,
        }
    }

    #[must_use]
    pub fn status_change(&self) -> StatusChange {
        StatusChange {
            status: self.status,
            in_progress_accumulated_ms: self.in_progress_accumulated_ms,
            in_progress_started_at: self.in_progress_started_at,
            completed_at: self.completed_at,
            status_before_auto_complete: self.status_before_auto_complete,
        }
    }

    pub fn apply_status_change(&mut self, change: &StatusChange) {
        self.status = change.status;
        self.in_progress_accumulated_ms = change.in_progress_accumulated_ms;
        self.in_progress_started_at = change.in_progress_started_at;
        self.completed_at = change.completed_at;
        self.status_before_auto_complete = change.status_before_auto_complete;
    }

    /// Merge a partial update. Validation is the caller's job.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(ease) = patch.ease {
            self.ease = ease;
        }
        if let Some(enjoyment) = patch.enjoyment {
            self.enjoyment = enjoyment;
        }
        if let Some(time) = patch.time {
            self.time = time;
        }
        if let Some(parent_id) = patch.parent_id {
            self.parent_id = parent_id;
        }
        if let Some(auto_complete) = patch.auto_complete {
            self.auto_complete = auto_complete;
        }
        if let Some(mode) = patch.subtask_sort_mode {
            self.subtask_sort_mode = mode;
        }
        if let Some(order) = &patch.subtask_order {
            self.subtask_order = order.clone();
        }
    }
}

/// What a caller supplies to create a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContent {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<RankLevel>,
    #[serde(default)]
    pub ease: Option<RankLevel>,
    #[serde(default)]
    pub enjoyment: Option<RankLevel>,
    #[serde(default)]
    pub time: Option<RankLevel>,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub auto_complete: bool,
}

impl TaskContent {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    #[must_use]
    pub fn under(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    #[must_use]
    pub fn auto_completing(mut self) -> Self {
        self.auto_complete = true;
        self
    }
}

/// Task fields minus `id`: the body of `POST /tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<RankLevel>,
    #[serde(default)]
    pub ease: Option<RankLevel>,
    #[serde(default)]
    pub enjoyment: Option<RankLevel>,
    #[serde(default)]
    pub time: Option<RankLevel>,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub auto_complete: bool,
    #[serde(default)]
    pub subtask_sort_mode: SubtaskSortMode,
    #[serde(default)]
    pub subtask_order: Vec<TaskId>,
    #[serde(default)]
    pub in_progress_accumulated_ms: u64,
    #[serde(default)]
    pub in_progress_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_before_auto_complete: Option<TaskStatus>,
}

/// Partial update: the body of `PUT /tasks/:id`.
///
/// Outer `None` leaves a field untouched. For nullable fields the inner
/// option distinguishes "set to null" from "set to value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub priority: Option<Option<RankLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub ease: Option<Option<RankLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub enjoyment: Option<Option<RankLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub time: Option<Option<RankLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub parent_id: Option<Option<TaskId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_sort_mode: Option<SubtaskSortMode>,
    /// Only written by reorder operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_order: Option<Vec<TaskId>>,
}

impl TaskPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Patch sent for a reorder: manual mode plus the new order.
    #[must_use]
    pub fn manual_order(order: Vec<TaskId>) -> Self {
        Self {
            subtask_sort_mode: Some(SubtaskSortMode::Manual),
            subtask_order: Some(order),
            ..Default::default()
        }
    }
}

/// Status transition result: the body of `PUT /tasks/:id/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: TaskStatus,
    #[serde(default)]
    pub in_progress_accumulated_ms: u64,
    #[serde(default)]
    pub in_progress_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_before_auto_complete: Option<TaskStatus>,
}

/// Present-but-null deserializes to `Some(None)` instead of `None`.
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
