// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process fake of the task REST API.
//!
//! Behaves like the real service for CRUD: positive IDs, idempotent creates,
//! 404 for unknown IDs, 422 for unknown parents. Faults can be scripted per
//! request and every call is journaled for assertions.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::RemoteApi;
use crate::error::RemoteError;
use crate::task::{StatusChange, Task, TaskId, TaskPatch, TaskPayload};

/// A scripted failure for the next matching request.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Answer with this error.
    Fail(RemoteError),
    /// Sleep before answering normally. Long enough, this trips the
    /// caller's request timeout.
    Stall(Duration),
}

/// One journaled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// `list`, `get`, `create`, `update`, `set_status` or `delete`.
    pub kind: &'static str,
    pub id: Option<TaskId>,
    /// Whether the call reached the data (false for injected failures).
    pub applied: bool,
}

#[derive(Default)]
struct Inner {
    tasks: BTreeMap<TaskId, Task>,
    next_id: TaskId,
    idempotency: HashMap<Uuid, TaskId>,
    faults: VecDeque<(Option<&'static str>, Fault)>,
    offline: bool,
    journal: Vec<RecordedRequest>,
}

pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { next_id: 1, ..Default::default() }),
        }
    }

    /// Start with existing server-side tasks.
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let remote = Self::new();
        {
            let mut inner = remote.inner.lock();
            for task in tasks {
                inner.next_id = inner.next_id.max(task.id + 1);
                inner.tasks.insert(task.id, task);
            }
        }
        remote
    }

    /// Fail the next request of any kind.
    pub fn push_fault(&self, fault: Fault) {
        self.inner.lock().faults.push_back((None, fault));
    }

    /// Fail the next request of `kind`.
    pub fn push_fault_for(&self, kind: &'static str, fault: Fault) {
        self.inner.lock().faults.push_back((Some(kind), fault));
    }

    /// While offline every request fails as transient.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    #[must_use]
    pub fn tasks(&self) -> BTreeMap<TaskId, Task> {
        self.inner.lock().tasks.clone()
    }

    #[must_use]
    pub fn journal(&self) -> Vec<RecordedRequest> {
        self.inner.lock().journal.clone()
    }

    /// Journaled calls that changed server data, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<RecordedRequest> {
        self.journal().into_iter().filter(|r| r.applied && r.kind != "list" && r.kind != "get").collect()
    }

    /// Take a scripted fault for `kind`, journaling the call if it fails.
    async fn gate(&self, kind: &'static str, id: Option<TaskId>) -> Result<(), RemoteError> {
        let fault = {
            let mut inner = self.inner.lock();
            if inner.offline {
                inner.journal.push(RecordedRequest { kind, id, applied: false });
                return Err(RemoteError::Transient("network unreachable".into()));
            }
            let position = inner.faults.iter().position(|(k, _)| k.map_or(true, |k| k == kind));
            position.and_then(|p| inner.faults.remove(p)).map(|(_, f)| f)
        };

        match fault {
            Some(Fault::Fail(err)) => {
                self.inner.lock().journal.push(RecordedRequest { kind, id, applied: false });
                Err(err)
            }
            Some(Fault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn not_found(id: TaskId) -> RemoteError {
    RemoteError::Rejected { status: 404, message: format!("task {} not found", id) }
}

fn unknown_parent(parent: TaskId) -> RemoteError {
    RemoteError::Rejected { status: 422, message: format!("parent {} does not exist", parent) }
}

impl Inner {
    fn record(&mut self, kind: &'static str, id: Option<TaskId>) {
        self.journal.push(RecordedRequest { kind, id, applied: true });
    }

    fn check_parent(&self, parent: Option<TaskId>) -> Result<(), RemoteError> {
        match parent {
            Some(p) if !self.tasks.contains_key(&p) => Err(unknown_parent(p)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn list_tasks(&self) -> Result<Vec<Task>, RemoteError> {
        self.gate("list", None).await?;
        let mut inner = self.inner.lock();
        inner.record("list", None);
        Ok(inner.tasks.values().cloned().collect())
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, RemoteError> {
        self.gate("get", Some(id)).await?;
        let mut inner = self.inner.lock();
        inner.record("get", Some(id));
        inner.tasks.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    async fn create_task(&self, payload: &TaskPayload, idempotency_key: Uuid) -> Result<Task, RemoteError> {
        self.gate("create", None).await?;
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.idempotency.get(&idempotency_key).copied() {
            if let Some(task) = inner.tasks.get(&existing).cloned() {
                return Ok(task);
            }
        }
        if payload.name.trim().is_empty() {
            return Err(RemoteError::Rejected { status: 422, message: "name must not be blank".into() });
        }
        inner.check_parent(payload.parent_id)?;

        let id = inner.next_id;
        inner.next_id += 1;
        let task = Task::from_payload(id, payload.clone());
        inner.tasks.insert(id, task.clone());
        inner.idempotency.insert(idempotency_key, id);
        inner.record("create", Some(id));
        Ok(task)
    }

    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, RemoteError> {
        self.gate("update", Some(id)).await?;
        let mut inner = self.inner.lock();

        if !inner.tasks.contains_key(&id) {
            return Err(not_found(id));
        }
        if let Some(parent) = patch.parent_id {
            inner.check_parent(parent)?;
        }
        let task = inner.tasks.get_mut(&id).ok_or_else(|| not_found(id))?;
        let old_parent = task.parent_id;
        task.apply_patch(patch);
        let updated = task.clone();

        if updated.parent_id != old_parent {
            if let Some(old) = old_parent.and_then(|p| inner.tasks.get_mut(&p)) {
                old.subtask_order.retain(|c| *c != id);
            }
        }
        inner.record("update", Some(id));
        Ok(updated)
    }

    async fn set_status(&self, id: TaskId, change: &StatusChange) -> Result<Task, RemoteError> {
        self.gate("set_status", Some(id)).await?;
        let mut inner = self.inner.lock();

        let task = inner.tasks.get_mut(&id).ok_or_else(|| not_found(id))?;
        task.apply_status_change(change);
        let updated = task.clone();
        inner.record("set_status", Some(id));
        Ok(updated)
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), RemoteError> {
        self.gate("delete", Some(id)).await?;
        let mut inner = self.inner.lock();

        inner.tasks.remove(&id).ok_or_else(|| not_found(id))?;
        for task in inner.tasks.values_mut() {
            task.subtask_order.retain(|c| *c != id);
        }
        inner.record("delete", Some(id));
        Ok(())
    }
}

impl MemoryRemote {
    /// Insert a task directly, as another device would.
    pub fn insert_foreign(&self, name: &str, owner_id: &str) -> Task {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let task = Task::new(id, owner_id, name, Utc::now());
        inner.tasks.insert(id, task.clone());
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn payload(name: &str, parent: Option<TaskId>) -> TaskPayload {
        let mut task = Task::new(-1, "u1", name, Utc::now());
        task.parent_id = parent;
        task.payload()
    }

    #[tokio::test]
    async fn test_create_assigns_positive_ids() {
        let remote = MemoryRemote::new();
        let a = remote.create_task(&payload("a", None), Uuid::new_v4()).await.unwrap();
        let b = remote.create_task(&payload("b", Some(a.id)), Uuid::new_v4()).await.unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(b.parent_id, Some(1));
    }

    #[tokio::test]
    async fn test_idempotent_create() {
        let remote = MemoryRemote::new();
        let key = Uuid::new_v4();
        let first = remote.create_task(&payload("a", None), key).await.unwrap();
        let again = remote.create_task(&payload("a", None), key).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(remote.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_parent_rejected() {
        let remote = MemoryRemote::new();
        let err = remote.create_task(&payload("a", Some(-4)), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 422, .. }));
    }

    #[tokio::test]
    async fn test_scripted_fault_hits_matching_kind_only() {
        let remote = MemoryRemote::new();
        remote.push_fault_for("delete", Fault::Fail(RemoteError::Transient("boom".into())));

        let task = remote.create_task(&payload("a", None), Uuid::new_v4()).await.unwrap();
        let change = StatusChange {
            status: TaskStatus::Completed,
            in_progress_accumulated_ms: 0,
            in_progress_started_at: None,
            completed_at: Some(Utc::now()),
            status_before_auto_complete: None,
        };
        remote.set_status(task.id, &change).await.unwrap();

        assert!(remote.delete_task(task.id).await.is_err());
        remote.delete_task(task.id).await.unwrap();
        assert!(remote.tasks().is_empty());

        let kinds: Vec<_> = remote.applied().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec!["create", "set_status", "delete"]);
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        assert!(remote.list_tasks().await.unwrap_err().is_retryable());
        remote.set_offline(false);
        assert!(remote.list_tasks().await.unwrap().is_empty());
    }
}
