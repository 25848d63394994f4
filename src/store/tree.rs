// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tree derivation over the flat ID → Task map.
//!
//! The tree is never stored. Every walk here carries a visited set so a
//! corrupted parent chain fails with [`TaskError::CycleDetected`] instead of
//! looping.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::error::TaskError;
use crate::task::{SubtaskSortMode, Task, TaskId};

/// A task with its children attached, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskNode {
    pub task: Task,
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    /// Number of nodes in this subtree, including self.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TaskNode::size).sum::<usize>()
    }
}

pub(crate) type TaskMap = BTreeMap<TaskId, Task>;

/// Parent → children, keyed by `None` for roots.
///
/// A task whose parent is missing from the map is indexed as a root.
pub(crate) fn children_index(tasks: &TaskMap) -> HashMap<Option<TaskId>, Vec<TaskId>> {
    let mut index: HashMap<Option<TaskId>, Vec<TaskId>> = HashMap::new();
    for task in tasks.values() {
        let parent = task.parent_id.filter(|p| tasks.contains_key(p));
        index.entry(parent).or_default().push(task.id);
    }
    index
}

pub(crate) fn children_of(tasks: &TaskMap, parent_id: TaskId) -> Vec<TaskId> {
    tasks
        .values()
        .filter(|t| t.parent_id == Some(parent_id))
        .map(|t| t.id)
        .collect()
}

/// Ancestors of `id`, nearest first. Stops at a root or at a missing parent.
pub(crate) fn ancestors(tasks: &TaskMap, id: TaskId) -> Result<Vec<TaskId>, TaskError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut current = tasks.get(&id).ok_or(TaskError::NotFound(id))?.parent_id;

    while let Some(parent_id) = current {
        let Some(parent) = tasks.get(&parent_id) else {
            break;
        };
        if !seen.insert(parent_id) {
            return Err(TaskError::CycleDetected(id));
        }
        chain.push(parent_id);
        current = parent.parent_id;
    }
    Ok(chain)
}

/// Whether `candidate` lies inside the subtree rooted at `root` (inclusive).
pub(crate) fn is_within(tasks: &TaskMap, candidate: TaskId, root: TaskId) -> Result<bool, TaskError> {
    if candidate == root {
        return Ok(true);
    }
    Ok(ancestors(tasks, candidate)?.contains(&root))
}

/// The subtree rooted at `root`, deepest nodes first and `root` last.
pub(crate) fn subtree_deepest_first(tasks: &TaskMap, root: TaskId) -> Result<Vec<TaskId>, TaskError> {
    if !tasks.contains_key(&root) {
        return Err(TaskError::NotFound(root));
    }
    let index = children_index(tasks);

    let mut seen = HashSet::new();
    let mut by_depth: Vec<(usize, TaskId)> = Vec::new();
    let mut queue = VecDeque::from([(0usize, root)]);

    while let Some((depth, id)) = queue.pop_front() {
        if !seen.insert(id) {
            return Err(TaskError::CycleDetected(id));
        }
        by_depth.push((depth, id));
        for child in index.get(&Some(id)).into_iter().flatten() {
            queue.push_back((depth + 1, *child));
        }
    }

    // Stable: siblings keep breadth-first order within a depth.
    by_depth.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(by_depth.into_iter().map(|(_, id)| id).collect())
}

fn display_order<'a>(parent: Option<&Task>, mut kids: Vec<&'a Task>) -> Vec<&'a Task> {
    kids.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    if let Some(parent) = parent.filter(|p| p.subtask_sort_mode == SubtaskSortMode::Manual) {
        let position: HashMap<TaskId, usize> =
            parent.subtask_order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        kids.sort_by_key(|t| position.get(&t.id).copied().unwrap_or(usize::MAX));
    }
    kids
}

/// Derive the display forest. Fails if any parent chain is cyclic.
pub fn build_forest(tasks: &BTreeMap<TaskId, Task>) -> Result<Vec<TaskNode>, TaskError> {
    let index = children_index(tasks);
    let mut visited = HashSet::new();

    fn attach(
        task: &Task,
        tasks: &TaskMap,
        index: &HashMap<Option<TaskId>, Vec<TaskId>>,
        visited: &mut HashSet<TaskId>,
    ) -> Result<TaskNode, TaskError> {
        if !visited.insert(task.id) {
            return Err(TaskError::CycleDetected(task.id));
        }
        let kids: Vec<&Task> = index
            .get(&Some(task.id))
            .into_iter()
            .flatten()
            .filter_map(|id| tasks.get(id))
            .collect();
        let children = display_order(Some(task), kids)
            .into_iter()
            .map(|child| attach(child, tasks, index, visited))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TaskNode { task: task.clone(), children })
    }

    let roots: Vec<&Task> = index
        .get(&None)
        .into_iter()
        .flatten()
        .filter_map(|id| tasks.get(id))
        .collect();

    let forest = display_order(None, roots)
        .into_iter()
        .map(|root| attach(root, tasks, &index, &mut visited))
        .collect::<Result<Vec<_>, _>>()?;

    // Anything unreached hangs off a cycle that never touches a root.
    if let Some(stray) = tasks.keys().find(|id| !visited.contains(id)) {
        return Err(TaskError::CycleDetected(*stray));
    }
    Ok(forest)
}
