// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RemoteError;
use crate::task::{StatusChange, Task, TaskId, TaskPatch, TaskPayload};

/// The task REST API.
///
/// | call          | request                     |
/// |---------------|-----------------------------|
/// | `list_tasks`  | `GET /tasks`                |
/// | `get_task`    | `GET /tasks/:id`            |
/// | `create_task` | `POST /tasks`               |
/// | `update_task` | `PUT /tasks/:id`            |
/// | `set_status`  | `PUT /tasks/:id/status`     |
/// | `delete_task` | `DELETE /tasks/:id`         |
///
/// Implementations must not retry internally; the caller owns backoff.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<Task>, RemoteError>;

    async fn get_task(&self, id: TaskId) -> Result<Task, RemoteError>;

    /// Create a task. A repeated `idempotency_key` returns the task created
    /// by the first request instead of creating another.
    async fn create_task(&self, payload: &TaskPayload, idempotency_key: Uuid) -> Result<Task, RemoteError>;

    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, RemoteError>;

    async fn set_status(&self, id: TaskId, change: &StatusChange) -> Result<Task, RemoteError>;

    async fn delete_task(&self, id: TaskId) -> Result<(), RemoteError>;
}
