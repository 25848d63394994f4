// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Task Tree Store.
//!
//! The [`TaskStore`] owns the ID → Task map, the [`OperationLog`] and the
//! [`TempIdAllocator`] of one storage namespace. Every public mutation
//! validates first, then applies to the map and appends to the log in the
//! same call, then persists. Nothing suspends in between, so no observer
//! sees a tree without its matching log entry.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use taskrank_sync::{TaskStore, TaskContent, TaskStatus, MemoryKv, Namespace};
//!
//! let kv = Arc::new(MemoryKv::new());
//! let mut store = TaskStore::open(kv, Namespace::Authenticated, "user-1").unwrap();
//!
//! let parent = store.create_task(TaskContent::named("Move house")).unwrap();
//! let child = store.create_task(TaskContent::named("Book van").under(parent.id)).unwrap();
//! assert!(child.id < 0);
//!
//! store.set_task_status(child.id, TaskStatus::Completed).unwrap();
//! assert_eq!(store.log().len(), 3);
//! ```

mod status;
pub mod tree;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::ids::TempIdAllocator;
use crate::oplog::{OperationLog, QueuedOperation, SyncOperation};
use crate::storage::{KeyValueStore, Namespace, NamespaceSnapshot, StorageError};
use crate::task::{Task, TaskContent, TaskId, TaskPatch, TaskStatus};

pub use tree::TaskNode;

/// A store shared between the caller and the sync engine.
///
/// The single lock is the one logical writer: every mutation runs to
/// completion under it, and it is never held across an `.await`.
pub type SharedStore = Arc<Mutex<TaskStore>>;

/// Result of swapping a temporary ID for a server ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub temp_id: TaskId,
    pub server_id: TaskId,
    /// Queued operations rewritten to the server ID.
    pub rewritten: usize,
}

/// Result of dropping a rejected operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discarded {
    pub op: SyncOperation,
    /// Local descendants removed because their ancestor can never exist.
    pub orphans: Vec<TaskId>,
    /// Further queued operations dropped with them.
    pub purged: usize,
}

pub struct TaskStore {
    namespace: Namespace,
    owner_id: String,
    kv: Arc<dyn KeyValueStore>,
    tasks: BTreeMap<TaskId, Task>,
    log: OperationLog,
    ids: TempIdAllocator,
    demo_ids: BTreeSet<TaskId>,
    revision: watch::Sender<u64>,
}

impl TaskStore {
    /// Load a namespace. Corrupted persisted state resets the namespace.
    pub fn open(
        kv: Arc<dyn KeyValueStore>,
        namespace: Namespace,
        owner_id: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let (snapshot, reset) = NamespaceSnapshot::load_or_reset(kv.as_ref(), namespace)?;
        let NamespaceSnapshot { tasks, log, mut ids, demo_ids } = snapshot;

        let tasks: BTreeMap<TaskId, Task> = tasks.into_iter().map(|t| (t.id, t)).collect();
        let log = OperationLog::from_entries(log);
        ids.skip_past(tasks.keys().copied().chain(log.target_ids()));

        info!(
            namespace = %namespace,
            tasks = tasks.len(),
            pending = log.len(),
            reset,
            "Task store opened"
        );

        let (revision, _) = watch::channel(0);
        Ok(Self {
            namespace,
            owner_id: owner_id.into(),
            kv,
            tasks,
            log,
            ids,
            demo_ids,
            revision,
        })
    }

    #[must_use]
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[must_use]
    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    #[must_use]
    pub fn children_of(&self, parent_id: TaskId) -> Vec<TaskId> {
        tree::children_of(&self.tasks, parent_id)
    }

    #[must_use]
    pub fn demo_ids(&self) -> &BTreeSet<TaskId> {
        &self.demo_ids
    }

    #[must_use]
    pub fn is_demo(&self, id: TaskId) -> bool {
        self.demo_ids.contains(&id)
    }

    /// Derive the display forest from the flat map.
    pub fn build_tree(&self) -> Result<Vec<TaskNode>, TaskError> {
        tree::build_forest(&self.tasks)
    }

    /// Revision counter bumped after every committed mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub fn create_task(&mut self, content: TaskContent) -> Result<Task, TaskError> {
        self.create_task_at(content, Utc::now())
    }

    pub fn create_task_at(&mut self, content: TaskContent, now: DateTime<Utc>) -> Result<Task, TaskError> {
        self.validate_content(&content)?;

        let chain = self.parent_chain(content.parent_id)?;

        let id = self.ids.next_temporary_id();
        let task = Task::from_content(id, self.owner_id.clone(), content, now);
        self.tasks.insert(id, task.clone());
        self.log.append(SyncOperation::CreateTask {
            temp_id: id,
            client_token: Uuid::new_v4(),
            payload: task.payload(),
        });
        self.propagate(chain, now);

        debug!(id, parent = ?task.parent_id, "Task created");
        self.commit();
        Ok(task)
    }

    pub fn update_task(&mut self, id: TaskId, patch: TaskPatch) -> Result<Task, TaskError> {
        let current = self.tasks.get(&id).ok_or(TaskError::NotFound(id))?;
        let old_parent = current.parent_id;

        if patch.is_empty() {
            return Err(TaskError::validation("update carries no fields"));
        }
        if patch.subtask_order.is_some() {
            return Err(TaskError::validation("subtask order changes go through reorder_subtasks"));
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(TaskError::validation("name must not be blank"));
            }
        }
        if let Some(Some(new_parent)) = patch.parent_id {
            if !self.tasks.contains_key(&new_parent) {
                return Err(TaskError::validation(format!("parent {} does not exist", new_parent)));
            }
            if tree::is_within(&self.tasks, new_parent, id)? {
                return Err(TaskError::validation(format!(
                    "moving {} under {} would create a cycle",
                    id, new_parent
                )));
            }
        }

        let moves = matches!(patch.parent_id, Some(p) if p != old_parent);
        let (old_chain, new_chain) = if moves {
            (self.parent_chain(old_parent)?, self.parent_chain(patch.parent_id.flatten())?)
        } else {
            (Vec::new(), Vec::new())
        };

        let task = self.tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        task.apply_patch(&patch);
        let updated = task.clone();

        if updated.parent_id != old_parent {
            if let Some(old) = old_parent.and_then(|p| self.tasks.get_mut(&p)) {
                old.subtask_order.retain(|child| *child != id);
            }
        }

        self.log.append(SyncOperation::UpdateTask { id, patch });
        let now = Utc::now();
        self.propagate(new_chain, now);
        self.propagate(old_chain, now);
        debug!(id, "Task updated");
        self.commit();
        Ok(updated)
    }

    pub fn set_task_status(&mut self, id: TaskId, status: TaskStatus) -> Result<Task, TaskError> {
        self.set_task_status_at(id, status, Utc::now())
    }

    /// Change status and propagate through auto-completing ancestors.
    ///
    /// Enqueues one SetStatus for `id`, then one per ancestor that changed.
    pub fn set_task_status_at(
        &mut self,
        id: TaskId,
        next: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task, TaskError> {
        let current = self.tasks.get(&id).ok_or(TaskError::NotFound(id))?;
        if current.status == next {
            debug!(id, status = %next, "Status unchanged, nothing to enqueue");
            return Ok(current.clone());
        }
        // Walk the chain before touching anything so a cycle aborts cleanly.
        let chain = tree::ancestors(&self.tasks, id)?;

        let task = self.tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        status::transition(task, next, now);
        task.status_before_auto_complete = None;

        let change = task.status_change();
        self.log.append(SyncOperation::SetStatus { id, change });
        self.propagate(chain, now);
        let result = self.tasks.get(&id).cloned().ok_or(TaskError::NotFound(id))?;
        self.commit();
        Ok(result)
    }

    /// Remove the subtree rooted at `id`.
    ///
    /// Returns the removed tasks deepest-first; one DeleteTask is enqueued
    /// per task in that order.
    pub fn delete_task(&mut self, id: TaskId) -> Result<Vec<Task>, TaskError> {
        let doomed = tree::subtree_deepest_first(&self.tasks, id)?;
        let doomed_set: HashSet<TaskId> = doomed.iter().copied().collect();
        let chain = self.parent_chain(self.tasks.get(&id).and_then(|t| t.parent_id))?;

        let removed: Vec<Task> = doomed.iter().filter_map(|d| self.tasks.remove(d)).collect();
        for task in self.tasks.values_mut() {
            task.subtask_order.retain(|child| !doomed_set.contains(child));
        }
        for d in &doomed {
            self.demo_ids.remove(d);
            self.log.append(SyncOperation::DeleteTask { id: *d });
        }
        self.propagate(chain, Utc::now());

        debug!(id, removed = removed.len(), "Subtree deleted");
        self.commit();
        Ok(removed)
    }

    /// Set a manual child order. `ordered` must be exactly the current child set.
    pub fn reorder_subtasks(&mut self, parent_id: TaskId, ordered: Vec<TaskId>) -> Result<Task, TaskError> {
        if !self.tasks.contains_key(&parent_id) {
            return Err(TaskError::NotFound(parent_id));
        }

        let actual: HashSet<TaskId> = self.children_of(parent_id).into_iter().collect();
        let provided: HashSet<TaskId> = ordered.iter().copied().collect();
        if provided.len() != ordered.len() {
            return Err(TaskError::validation("subtask order contains duplicates"));
        }
        if provided != actual {
            return Err(TaskError::validation(format!(
                "subtask order for {} must list exactly its {} children",
                parent_id,
                actual.len()
            )));
        }

        let parent = self.tasks.get_mut(&parent_id).ok_or(TaskError::NotFound(parent_id))?;
        parent.subtask_sort_mode = crate::task::SubtaskSortMode::Manual;
        parent.subtask_order = ordered.clone();
        let updated = parent.clone();

        self.log.append(SyncOperation::ReorderSubtasks { parent_id, order: ordered });
        self.commit();
        Ok(updated)
    }

    /// Insert seed tasks into the guest namespace without enqueuing.
    pub fn seed_demo_tasks(&mut self, contents: Vec<TaskContent>) -> Result<Vec<Task>, TaskError> {
        if self.namespace != Namespace::Guest {
            return Err(TaskError::validation("demo tasks only exist in the guest namespace"));
        }
        let now = Utc::now();
        let mut seeded = Vec::with_capacity(contents.len());
        for content in contents {
            self.validate_content(&content)?;
            let id = self.ids.next_temporary_id();
            let task = Task::from_content(id, self.owner_id.clone(), content, now);
            self.tasks.insert(id, task.clone());
            self.demo_ids.insert(id);
            seeded.push(task);
        }
        self.commit();
        Ok(seeded)
    }

    /// Last-writer-wins refresh from the server's task list.
    ///
    /// Server-confirmed tasks are replaced by the server copy unless a
    /// queued operation still targets them. Temporary tasks are kept.
    /// Returns how many tasks were taken from the server.
    pub fn hydrate(&mut self, server_tasks: Vec<Task>) -> usize {
        let server_ids: HashSet<TaskId> = server_tasks.iter().map(|t| t.id).collect();
        let log = &self.log;
        let before = self.tasks.len();
        self.tasks
            .retain(|id, _| *id < 0 || log.references(*id) || server_ids.contains(id));
        let dropped = before - self.tasks.len();

        let mut taken = 0;
        for task in server_tasks {
            if task.id <= 0 || self.log.references(task.id) {
                continue;
            }
            self.tasks.insert(task.id, task);
            taken += 1;
        }

        info!(taken, dropped, pending = self.log.len(), "Hydrated from server");
        self.commit();
        taken
    }

    /// Wipe tasks, log, counter and seed markers.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.log.clear();
        self.demo_ids.clear();
        self.ids = TempIdAllocator::new();
        info!(namespace = %self.namespace, "Task store cleared");
        self.commit();
    }

    // ------------------------------------------------------------------
    // Sync engine and migration hooks
    // ------------------------------------------------------------------

    pub(crate) fn front(&self) -> Option<QueuedOperation> {
        self.log.peek_front().cloned()
    }

    /// The create at the front succeeded: adopt the server ID everywhere.
    pub(crate) fn reconcile_created(&mut self, seq: u64, server_task: &Task) -> Option<Reconciled> {
        let temp_id = match self.log.peek_front() {
            Some(QueuedOperation { seq: s, op: SyncOperation::CreateTask { temp_id, .. }, .. }) if *s == seq => {
                *temp_id
            }
            _ => return None,
        };
        let server_id = server_task.id;
        self.log.remove_front_if(seq);

        if let Some(mut local) = self.tasks.remove(&temp_id) {
            local.id = server_id;
            local.owner_id = server_task.owner_id.clone();
            self.tasks.insert(server_id, local);
        }
        for task in self.tasks.values_mut() {
            if task.parent_id == Some(temp_id) {
                task.parent_id = Some(server_id);
            }
            for child in task.subtask_order.iter_mut().filter(|c| **c == temp_id) {
                *child = server_id;
            }
        }
        let rewritten = self.log.rewrite_references(temp_id, server_id);

        debug!(temp_id, server_id, rewritten, "Temporary ID reconciled");
        self.commit();
        Some(Reconciled { temp_id, server_id, rewritten })
    }

    /// The front operation was applied by the server.
    pub(crate) fn acknowledge(&mut self, seq: u64) -> bool {
        let removed = self.log.remove_front_if(seq).is_some();
        if removed {
            self.commit();
        }
        removed
    }

    /// The front operation can never succeed: drop it.
    ///
    /// A rejected create also removes the task's current local subtree and
    /// every queued operation acting on it. Tasks that were created under it
    /// but have since moved elsewhere survive; their queued operations lose
    /// the reference.
    pub(crate) fn discard_rejected(&mut self, seq: u64) -> Option<Discarded> {
        let entry = self.log.remove_front_if(seq)?;

        let mut orphans = Vec::new();
        let mut purged = 0;
        if let SyncOperation::CreateTask { temp_id, .. } = &entry.op {
            let temp_id = *temp_id;
            let subtree = tree::subtree_deepest_first(&self.tasks, temp_id).unwrap_or_else(|e| {
                if !matches!(e, TaskError::NotFound(_)) {
                    error!(temp_id, error = %e, "Subtree walk failed while discarding create");
                }
                vec![temp_id]
            });
            let doomed: HashSet<TaskId> = subtree.iter().copied().chain([temp_id]).collect();

            for d in &subtree {
                self.tasks.remove(d);
            }
            for task in self.tasks.values_mut() {
                task.subtask_order.retain(|c| !doomed.contains(c));
            }
            purged = self.log.detach(&doomed).len();
            orphans = subtree.into_iter().filter(|d| *d != temp_id).collect();

            if !orphans.is_empty() {
                warn!(temp_id, orphans = ?orphans, purged, "Rejected create orphaned queued descendants");
            }
        }

        self.commit();
        Some(Discarded { op: entry.op, orphans, purged })
    }

    pub(crate) fn allocate_temp_id(&mut self) -> TaskId {
        self.ids.next_temporary_id()
    }

    /// Merge prepared tasks and operations in one commit.
    pub(crate) fn absorb(&mut self, tasks: Vec<Task>, ops: Vec<SyncOperation>) {
        for task in tasks {
            self.tasks.insert(task.id, task);
        }
        for op in ops {
            self.log.append(op);
        }
        self.commit();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// `parent` followed by its ancestors, nearest first.
    fn parent_chain(&self, parent: Option<TaskId>) -> Result<Vec<TaskId>, TaskError> {
        match parent {
            Some(p) if self.tasks.contains_key(&p) => {
                let mut chain = vec![p];
                chain.extend(tree::ancestors(&self.tasks, p)?);
                Ok(chain)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Re-evaluate auto-completing tasks along `chain`, stopping at the first
    /// one that keeps its status. Queues a SetStatus per change.
    fn propagate(&mut self, chain: Vec<TaskId>, now: DateTime<Utc>) {
        let mut changed = Vec::new();
        for ancestor in chain {
            if !status::reevaluate_parent(&mut self.tasks, ancestor, now) {
                break;
            }
            if let Some(task) = self.tasks.get(&ancestor) {
                self.log.append(SyncOperation::SetStatus { id: ancestor, change: task.status_change() });
            }
            changed.push(ancestor);
        }
        if !changed.is_empty() {
            debug!(propagated = ?changed, "Auto-complete status propagated");
        }
    }

    fn validate_content(&self, content: &TaskContent) -> Result<(), TaskError> {
        if content.name.trim().is_empty() {
            return Err(TaskError::validation("name must not be blank"));
        }
        if let Some(parent) = content.parent_id {
            if !self.tasks.contains_key(&parent) {
                return Err(TaskError::validation(format!("parent {} does not exist", parent)));
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> NamespaceSnapshot {
        NamespaceSnapshot {
            tasks: self.tasks.values().cloned().collect(),
            log: self.log.to_entries(),
            ids: self.ids,
            demo_ids: self.demo_ids.clone(),
        }
    }

    /// Persist and notify. A failed write keeps the in-memory state; the
    /// next successful commit writes everything again.
    fn commit(&mut self) {
        if let Err(e) = self.snapshot().save(self.kv.as_ref(), self.namespace) {
            error!(namespace = %self.namespace, error = %e, "Failed to persist task store");
            crate::metrics::record_persist_error(self.namespace.prefix());
        }
        if self.namespace == Namespace::Authenticated {
            crate::metrics::set_queue_depth(self.log.len());
        }
        self.revision.send_modify(|rev| *rev += 1);
    }
}
