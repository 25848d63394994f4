// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Guest-to-account migration.
//!
//! At sign-in every non-demo guest task is re-created in the authenticated
//! store under a fresh temporary ID, parents strictly before children, and
//! one CreateTask is queued per task. Manual child orders follow as
//! ReorderSubtasks once every create is queued. The guest namespace is then
//! cleared.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::TaskError;
use crate::oplog::SyncOperation;
use crate::store::tree;
use crate::store::TaskStore;
use crate::task::{Task, TaskId};

/// What a migration did, for the sign-in confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migrated_count: usize,
    pub discarded_demo_count: usize,
    /// Guest ID → ID in the target store.
    pub id_map: BTreeMap<TaskId, TaskId>,
}

/// Move the guest store's user tasks into `target`.
///
/// Fails without touching either store if the guest tree is inconsistent.
#[instrument(skip_all, fields(guest_tasks = guest.len()))]
pub fn migrate_guest_tasks(guest: &mut TaskStore, target: &mut TaskStore) -> Result<MigrationReport, TaskError> {
    let demo = guest.demo_ids().clone();
    let (demo_tasks, user_tasks): (Vec<&Task>, Vec<&Task>) = guest.tasks().partition(|t| demo.contains(&t.id));
    let discarded_demo_count = demo_tasks.len();

    // Depth among the tasks being migrated; a parent that stays behind
    // makes its child a depth-0 task here.
    let user_map: tree::TaskMap = user_tasks.iter().map(|t| (t.id, (*t).clone())).collect();
    let mut ordered: Vec<(usize, Task)> = Vec::with_capacity(user_map.len());
    for task in user_map.values() {
        let depth = tree::ancestors(&user_map, task.id)?.len();
        ordered.push((depth, task.clone()));
    }
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.created_at.cmp(&b.1.created_at)).then(a.1.id.cmp(&b.1.id)));

    let mut id_map: HashMap<TaskId, TaskId> = HashMap::with_capacity(ordered.len());
    for (_, task) in &ordered {
        id_map.insert(task.id, target.allocate_temp_id());
    }

    let owner = target.owner_id().to_string();
    let mut migrated = Vec::with_capacity(ordered.len());
    let mut ops = Vec::with_capacity(ordered.len());
    let mut reorders = Vec::new();
    for (_, task) in ordered {
        let mut moved = task;
        let old_id = moved.id;
        moved.id = id_map[&old_id];
        moved.owner_id = owner.clone();
        moved.parent_id = moved.parent_id.and_then(|p| match id_map.get(&p) {
            Some(mapped) => Some(*mapped),
            None if target.get(p).is_some() => Some(p),
            None => {
                debug!(task = old_id, parent = p, "Parent not migrated, task becomes a root");
                None
            }
        });
        moved.subtask_order = moved.subtask_order.iter().filter_map(|c| id_map.get(c).copied()).collect();

        // Children do not exist on the server yet: create with an empty
        // order and set it once they have been queued.
        let mut payload = moved.payload();
        payload.subtask_order.clear();
        if !moved.subtask_order.is_empty() {
            reorders.push(SyncOperation::ReorderSubtasks {
                parent_id: moved.id,
                order: moved.subtask_order.clone(),
            });
        }

        ops.push(SyncOperation::CreateTask { temp_id: moved.id, client_token: Uuid::new_v4(), payload });
        migrated.push(moved);
    }
    ops.extend(reorders);

    let migrated_count = migrated.len();
    target.absorb(migrated, ops);
    guest.clear();

    crate::metrics::record_migration(migrated_count, discarded_demo_count);
    info!(migrated = migrated_count, discarded_demo = discarded_demo_count, "Guest tasks migrated");

    Ok(MigrationReport {
        migrated_count,
        discarded_demo_count,
        id_map: id_map.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStore, MemoryKv, Namespace};
    use crate::task::TaskContent;
    use std::sync::Arc;

    fn stores() -> (TaskStore, TaskStore) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
        let guest = TaskStore::open(kv.clone(), Namespace::Guest, "guest").unwrap();
        let target = TaskStore::open(kv, Namespace::Authenticated, "u1").unwrap();
        (guest, target)
    }

    #[test]
    fn test_demo_tasks_discarded_and_children_remapped() {
        let (mut guest, mut target) = stores();
        guest.seed_demo_tasks(vec![TaskContent::named("Try me"), TaskContent::named("Drag me")]).unwrap();
        let parent = guest.create_task(TaskContent::named("Groceries")).unwrap();
        let child = guest.create_task(TaskContent::named("Milk").under(parent.id)).unwrap();
        guest.create_task(TaskContent::named("Call mum")).unwrap();

        let report = migrate_guest_tasks(&mut guest, &mut target).unwrap();
        assert_eq!(report.migrated_count, 3);
        assert_eq!(report.discarded_demo_count, 2);

        let new_parent = report.id_map[&parent.id];
        let new_child = report.id_map[&child.id];
        assert_ne!(new_parent, parent.id);
        assert_eq!(target.get(new_child).unwrap().parent_id, Some(new_parent));
        assert!(guest.is_empty());
        assert!(guest.demo_ids().is_empty());
    }

    #[test]
    fn test_creates_queued_parents_first() {
        let (mut guest, mut target) = stores();
        let a = guest.create_task(TaskContent::named("a")).unwrap();
        let b = guest.create_task(TaskContent::named("b").under(a.id)).unwrap();
        let c = guest.create_task(TaskContent::named("c").under(b.id)).unwrap();
        // Created last, but still queued ahead of its children.
        let late_root = guest.create_task(TaskContent::named("late")).unwrap();
        guest.update_task(a.id, crate::task::TaskPatch { parent_id: Some(Some(late_root.id)), ..Default::default() }).unwrap();

        let report = migrate_guest_tasks(&mut guest, &mut target).unwrap();
        let creates: Vec<(TaskId, Option<TaskId>)> = target
            .log()
            .iter()
            .filter_map(|e| match &e.op {
                SyncOperation::CreateTask { temp_id, payload, .. } => Some((*temp_id, payload.parent_id)),
                _ => None,
            })
            .collect();

        assert_eq!(creates.len(), 4);
        assert_eq!(creates[0], (report.id_map[&late_root.id], None));
        assert_eq!(creates[1], (report.id_map[&a.id], Some(report.id_map[&late_root.id])));
        assert_eq!(creates[2], (report.id_map[&b.id], Some(report.id_map[&a.id])));
        assert_eq!(creates[3], (report.id_map[&c.id], Some(report.id_map[&b.id])));
    }

    #[test]
    fn test_manual_order_queued_after_children() {
        let (mut guest, mut target) = stores();
        let parent = guest.create_task(TaskContent::named("Packing")).unwrap();
        let a = guest.create_task(TaskContent::named("Socks").under(parent.id)).unwrap();
        let b = guest.create_task(TaskContent::named("Charger").under(parent.id)).unwrap();
        guest.reorder_subtasks(parent.id, vec![b.id, a.id]).unwrap();

        let report = migrate_guest_tasks(&mut guest, &mut target).unwrap();
        let (new_parent, new_a, new_b) = (report.id_map[&parent.id], report.id_map[&a.id], report.id_map[&b.id]);
        assert_eq!(target.get(new_parent).unwrap().subtask_order, vec![new_b, new_a]);

        let ops: Vec<SyncOperation> = target.log().iter().map(|e| e.op.clone()).collect();
        assert_eq!(ops.len(), 4);
        match &ops[0] {
            SyncOperation::CreateTask { temp_id, payload, .. } => {
                assert_eq!(*temp_id, new_parent);
                assert!(payload.subtask_order.is_empty());
            }
            other => panic!("expected parent create first, got {:?}", other),
        }
        assert_eq!(ops[3], SyncOperation::ReorderSubtasks { parent_id: new_parent, order: vec![new_b, new_a] });
    }

    #[test]
    fn test_child_of_demo_becomes_root() {
        let (mut guest, mut target) = stores();
        let demo = guest.seed_demo_tasks(vec![TaskContent::named("Demo")]).unwrap();
        let mine = guest.create_task(TaskContent::named("Mine").under(demo[0].id)).unwrap();

        let report = migrate_guest_tasks(&mut guest, &mut target).unwrap();
        let moved = target.get(report.id_map[&mine.id]).unwrap();
        assert_eq!(moved.parent_id, None);
        assert_eq!(moved.owner_id, "u1");
    }

    #[test]
    fn test_merges_with_existing_target_tasks() {
        let (mut guest, mut target) = stores();
        let existing = target.create_task(TaskContent::named("Already here")).unwrap();
        let guest_task = guest.create_task(TaskContent::named("From guest")).unwrap();

        let report = migrate_guest_tasks(&mut guest, &mut target).unwrap();
        assert_eq!(target.len(), 2);
        assert!(target.get(existing.id).is_some());
        // Fresh ID in the target's own numbering.
        assert_eq!(report.id_map[&guest_task.id], -2);
        assert_eq!(target.log().len(), 2);
    }

    #[test]
    fn test_empty_guest_migrates_nothing() {
        let (mut guest, mut target) = stores();
        let report = migrate_guest_tasks(&mut guest, &mut target).unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(target.log().is_empty());
    }
}
