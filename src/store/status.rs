// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Status transitions and auto-complete propagation.

use chrono::{DateTime, Utc};

use super::tree::{children_of, TaskMap};
use crate::task::{Task, TaskId, TaskStatus};

/// Move `task` to `next`, applying timing side effects.
///
/// - leaving `in_progress` folds elapsed time into the accumulator
/// - entering `in_progress` stamps the start time
/// - `completed_at` is set iff the new status is `completed`
///
/// Returns false if the task already had that status.
pub(crate) fn transition(task: &mut Task, next: TaskStatus, now: DateTime<Utc>) -> bool {
    if task.status == next {
        return false;
    }

    if task.status == TaskStatus::InProgress {
        if let Some(started) = task.in_progress_started_at.take() {
            let elapsed = (now - started).num_milliseconds().max(0) as u64;
            task.in_progress_accumulated_ms = task.in_progress_accumulated_ms.saturating_add(elapsed);
        }
    }
    if next == TaskStatus::InProgress {
        task.in_progress_started_at = Some(now);
    }

    task.completed_at = if next == TaskStatus::Completed { Some(now) } else { None };
    task.status = next;
    true
}

/// Re-evaluate one auto-completing parent after a child changed.
///
/// Completes the parent when every child is completed, remembering its prior
/// status. Restores that prior status when a child is reopened. A parent
/// completed by hand is left alone, and so is a parent with no children.
/// Returns whether the parent changed.
pub(crate) fn reevaluate_parent(tasks: &mut TaskMap, parent_id: TaskId, now: DateTime<Utc>) -> bool {
    let kids = children_of(tasks, parent_id);
    // A parent left with no children keeps whatever status it has.
    if kids.is_empty() {
        return false;
    }
    let all_done = kids
        .iter()
        .all(|id| tasks.get(id).is_some_and(|t| t.status == TaskStatus::Completed));

    let Some(parent) = tasks.get_mut(&parent_id) else {
        return false;
    };
    if !parent.auto_complete {
        return false;
    }

    if all_done && parent.status != TaskStatus::Completed {
        let prior = parent.status;
        transition(parent, TaskStatus::Completed, now);
        parent.status_before_auto_complete = Some(prior);
        return true;
    }

    if !all_done && parent.status == TaskStatus::Completed {
        if let Some(prior) = parent.status_before_auto_complete.take() {
            transition(parent, prior, now);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_in_progress_time_accumulates() {
        let t0 = Utc::now();
        let mut task = Task::new(1, "u1", "focus", t0);

        assert!(transition(&mut task, TaskStatus::InProgress, t0));
        assert_eq!(task.in_progress_started_at, Some(t0));

        transition(&mut task, TaskStatus::Pinned, t0 + Duration::milliseconds(1500));
        assert_eq!(task.in_progress_accumulated_ms, 1500);
        assert!(task.in_progress_started_at.is_none());

        transition(&mut task, TaskStatus::InProgress, t0 + Duration::seconds(10));
        transition(&mut task, TaskStatus::Open, t0 + Duration::seconds(11));
        assert_eq!(task.in_progress_accumulated_ms, 2500);
    }

    #[test]
    fn test_completed_at_tracks_status() {
        let now = Utc::now();
        let mut task = Task::new(1, "u1", "ship", now);

        transition(&mut task, TaskStatus::Completed, now);
        assert_eq!(task.completed_at, Some(now));

        transition(&mut task, TaskStatus::Open, now);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_same_status_is_noop() {
        let now = Utc::now();
        let mut task = Task::new(1, "u1", "idle", now);
        assert!(!transition(&mut task, TaskStatus::Open, now));
    }

    #[test]
    fn test_parent_without_auto_complete_is_untouched() {
        let now = Utc::now();
        let mut tasks = TaskMap::new();
        tasks.insert(1, Task::new(1, "u1", "parent", now));
        let mut child = Task::new(2, "u1", "child", now);
        child.parent_id = Some(1);
        child.status = TaskStatus::Completed;
        tasks.insert(2, child);

        assert!(!reevaluate_parent(&mut tasks, 1, now));
        assert_eq!(tasks[&1].status, TaskStatus::Open);
    }
}
