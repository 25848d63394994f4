// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for the Sync Engine
//!
//! End-to-end runs of store + engine against the in-process `MemoryRemote`.
//! The tokio clock is paused, so backoff and timeouts run instantly.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: reconciliation, ordering, refresh
//! - `failure_*` - Rejections, transient errors, 401, timeouts, shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

use taskrank_sync::{
    migrate_guest_tasks, EngineState, Fault, MemoryKv, MemoryRemote, Namespace, RemoteApi, RemoteError, SharedStore, SyncConfig,
    SyncEngine, SyncHandle, SyncNotice, SyncOperation, Task, TaskContent, TaskId, TaskPatch, TaskStatus, TaskStore,
};

// =============================================================================
// Helpers
// =============================================================================

fn test_config() -> SyncConfig {
    SyncConfig {
        request_timeout_ms: 1_000,
        backoff_initial_ms: 10,
        backoff_max_ms: 200,
        ..Default::default()
    }
}

fn new_store() -> SharedStore {
    TaskStore::open(Arc::new(MemoryKv::new()), Namespace::Authenticated, "u1")
        .unwrap()
        .into_shared()
}

struct Harness {
    store: SharedStore,
    remote: Arc<MemoryRemote>,
    online: watch::Sender<bool>,
    notices: broadcast::Receiver<SyncNotice>,
    handle: SyncHandle,
}

fn start(store: SharedStore, remote: Arc<MemoryRemote>, online: bool) -> Harness {
    let (online_tx, online_rx) = watch::channel(online);
    let engine = SyncEngine::new(store.clone(), remote.clone(), test_config(), online_rx);
    let notices = engine.subscribe_notices();
    let handle = engine.spawn();
    Harness { store, remote, online: online_tx, notices, handle }
}

/// Wait until the log is empty and the engine has gone back to Idle.
async fn drained(h: &Harness) {
    let mut state = h.handle.state_receiver();
    timeout(Duration::from_secs(120), async {
        loop {
            if h.store.lock().log().is_empty() && *state.borrow_and_update() == EngineState::Idle {
                return;
            }
            state.changed().await.unwrap();
        }
    })
    .await
    .expect("log never drained");
}

async fn reach(h: &Harness, target: EngineState) {
    let mut state = h.handle.state_receiver();
    timeout(Duration::from_secs(120), state.wait_for(|s| *s == target))
        .await
        .expect("state never reached")
        .unwrap();
}

fn collect(rx: &mut broadcast::Receiver<SyncNotice>) -> Vec<SyncNotice> {
    let mut out = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        out.push(notice);
    }
    out
}

fn by_name<'a>(tasks: impl IntoIterator<Item = &'a Task>, name: &str) -> Task {
    tasks.into_iter().find(|t| t.name == name).cloned().expect("task by name")
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn happy_offline_edits_reconcile_on_reconnect() {
    let store = new_store();
    let (parent, a, b) = {
        let mut s = store.lock();
        let parent = s.create_task(TaskContent::named("Trip").auto_completing()).unwrap();
        let a = s.create_task(TaskContent::named("Tickets").under(parent.id)).unwrap();
        let b = s.create_task(TaskContent::named("Hotel").under(parent.id)).unwrap();
        s.update_task(a.id, TaskPatch { description: Some("window seat".into()), ..Default::default() }).unwrap();
        s.reorder_subtasks(parent.id, vec![b.id, a.id]).unwrap();
        s.set_task_status(a.id, TaskStatus::Completed).unwrap();
        s.set_task_status(b.id, TaskStatus::Completed).unwrap();
        (parent, a, b)
    };
    assert!(parent.id < 0 && a.id < 0 && b.id < 0);

    let mut h = start(store, Arc::new(MemoryRemote::new()), false);
    reach(&h, EngineState::Offline).await;
    assert!(h.remote.journal().is_empty());

    h.online.send(true).unwrap();
    drained(&h).await;

    let local = h.store.lock().tasks().cloned().collect::<Vec<_>>();
    assert!(local.iter().all(|t| t.id > 0));

    let server = h.remote.tasks();
    let trip = by_name(server.values(), "Trip");
    let tickets = by_name(server.values(), "Tickets");
    let hotel = by_name(server.values(), "Hotel");
    assert_eq!(tickets.parent_id, Some(trip.id));
    assert_eq!(tickets.description, "window seat");
    assert_eq!(trip.subtask_order, vec![hotel.id, tickets.id]);
    assert_eq!(trip.status, TaskStatus::Completed);

    // The local copy matches the server field for field.
    for task in &local {
        assert_eq!(server.get(&task.id), Some(task));
    }

    let reconciled = collect(&mut h.notices)
        .into_iter()
        .filter(|n| matches!(n, SyncNotice::Reconciled { .. }))
        .count();
    assert_eq!(reconciled, 3);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn happy_deleting_unsynced_subtree_leaves_server_clean() {
    let store = new_store();
    {
        let mut s = store.lock();
        let root = s.create_task(TaskContent::named("root")).unwrap();
        let child = s.create_task(TaskContent::named("child").under(root.id)).unwrap();
        s.create_task(TaskContent::named("grandchild").under(child.id)).unwrap();
        let removed = s.delete_task(root.id).unwrap();
        assert_eq!(removed.len(), 3);

        let deletes = s.log().iter().filter(|e| matches!(e.op, SyncOperation::DeleteTask { .. })).count();
        assert_eq!(deletes, 3);
    }

    let h = start(store, Arc::new(MemoryRemote::new()), true);
    drained(&h).await;

    assert!(h.remote.tasks().is_empty());
    assert!(h.store.lock().is_empty());
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn happy_edits_while_running_are_drained() {
    let h = start(new_store(), Arc::new(MemoryRemote::new()), true);
    reach(&h, EngineState::Idle).await;

    let id = h.store.lock().create_task(TaskContent::named("live")).unwrap().id;
    drained(&h).await;
    let server_id = h.store.lock().tasks().next().unwrap().id;
    assert!(id < 0 && server_id > 0);

    h.store.lock().set_task_status(server_id, TaskStatus::InProgress).unwrap();
    drained(&h).await;
    assert_eq!(h.remote.tasks()[&server_id].status, TaskStatus::InProgress);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn happy_refresh_hydrates_when_queue_empty() {
    let remote = Arc::new(MemoryRemote::new());
    remote.insert_foreign("from phone", "u1");

    let h = start(new_store(), remote.clone(), true);
    assert_eq!(h.handle.refresh().await.unwrap(), 1);
    assert_eq!(h.store.lock().tasks().next().unwrap().name, "from phone");

    // Queued work blocks refresh.
    h.remote.set_offline(true);
    h.store.lock().create_task(TaskContent::named("pending")).unwrap();
    assert_eq!(h.handle.refresh().await.unwrap(), 0);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn happy_migrated_manual_order_reaches_server() {
    let kv = Arc::new(MemoryKv::new());
    let mut guest = TaskStore::open(kv.clone(), Namespace::Guest, "guest").unwrap();
    let parent = guest.create_task(TaskContent::named("Packing")).unwrap();
    let socks = guest.create_task(TaskContent::named("Socks").under(parent.id)).unwrap();
    let charger = guest.create_task(TaskContent::named("Charger").under(parent.id)).unwrap();
    guest.reorder_subtasks(parent.id, vec![charger.id, socks.id]).unwrap();

    let mut account = TaskStore::open(kv, Namespace::Authenticated, "u1").unwrap();
    migrate_guest_tasks(&mut guest, &mut account).unwrap();

    let h = start(account.into_shared(), Arc::new(MemoryRemote::new()), true);
    drained(&h).await;

    let server = h.remote.tasks();
    let packing = by_name(server.values(), "Packing");
    let expected = vec![by_name(server.values(), "Charger").id, by_name(server.values(), "Socks").id];
    assert!(expected.iter().all(|id| *id > 0));
    assert_eq!(packing.subtask_order, expected);

    let local = h.store.lock().get(packing.id).cloned().unwrap();
    assert_eq!(local.subtask_order, expected);
    assert_eq!(local, packing);
    h.handle.shutdown().await;
}

// =============================================================================
// Failure scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn failure_transient_error_blocks_later_operations() {
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault(Fault::Fail(RemoteError::Transient("503".into())));
    remote.push_fault(Fault::Fail(RemoteError::Transient("503".into())));

    let store = new_store();
    {
        let mut s = store.lock();
        s.create_task(TaskContent::named("first")).unwrap();
        s.create_task(TaskContent::named("second")).unwrap();
    }

    let h = start(store, remote, true);
    reach(&h, EngineState::Backoff).await;
    drained(&h).await;

    let journal = h.remote.journal();
    assert_eq!(journal.len(), 4);
    assert!(!journal[0].applied && !journal[1].applied);

    // IDs follow send order: "first" was never overtaken.
    let server = h.remote.tasks();
    assert_eq!(server[&1].name, "first");
    assert_eq!(server[&2].name, "second");
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_rejected_update_is_dropped_and_queue_moves_on() {
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault_for(
        "update",
        Fault::Fail(RemoteError::Rejected { status: 422, message: "description too long".into() }),
    );

    let store = new_store();
    {
        let mut s = store.lock();
        let a = s.create_task(TaskContent::named("a")).unwrap();
        s.update_task(a.id, TaskPatch { description: Some("x".repeat(10)), ..Default::default() }).unwrap();
        s.create_task(TaskContent::named("b")).unwrap();
    }

    let mut h = start(store, remote, true);
    drained(&h).await;

    assert_eq!(h.remote.tasks().len(), 2);
    let rejected: Vec<_> = collect(&mut h.notices)
        .into_iter()
        .filter_map(|n| match n {
            SyncNotice::Rejected { op, status, .. } => Some((op.kind(), status)),
            _ => None,
        })
        .collect();
    assert_eq!(rejected, vec![("update", 422)]);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_rejected_create_orphans_queued_descendants() {
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault_for(
        "create",
        Fault::Fail(RemoteError::Rejected { status: 400, message: "bad payload".into() }),
    );

    let store = new_store();
    let (parent, child, grandchild) = {
        let mut s = store.lock();
        let parent = s.create_task(TaskContent::named("doomed")).unwrap();
        let child = s.create_task(TaskContent::named("child").under(parent.id)).unwrap();
        let grandchild = s.create_task(TaskContent::named("grandchild").under(child.id)).unwrap();
        s.create_task(TaskContent::named("bystander")).unwrap();
        (parent, child, grandchild)
    };

    let mut h = start(store, remote, true);
    drained(&h).await;

    let server = h.remote.tasks();
    assert_eq!(server.len(), 1);
    assert_eq!(by_name(server.values(), "bystander").parent_id, None);
    assert_eq!(h.store.lock().len(), 1);

    let notices = collect(&mut h.notices);
    let mut orphaned: Vec<TaskId> = notices
        .iter()
        .filter_map(|n| match n {
            SyncNotice::Orphaned { task_id, rejected_ancestor } => {
                assert_eq!(*rejected_ancestor, parent.id);
                Some(*task_id)
            }
            _ => None,
        })
        .collect();
    orphaned.sort();
    let mut expected = vec![child.id, grandchild.id];
    expected.sort();
    assert_eq!(orphaned, expected);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_rejected_create_spares_children_that_moved_away() {
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault_for(
        "create",
        Fault::Fail(RemoteError::Rejected { status: 422, message: "bad payload".into() }),
    );

    let store = new_store();
    let (parent, loose, shelf, filed) = {
        let mut s = store.lock();
        let parent = s.create_task(TaskContent::named("doomed")).unwrap();
        let loose = s.create_task(TaskContent::named("loose").under(parent.id)).unwrap();
        let shelf = s.create_task(TaskContent::named("shelf")).unwrap();
        let filed = s.create_task(TaskContent::named("filed").under(parent.id)).unwrap();
        s.update_task(loose.id, TaskPatch { parent_id: Some(None), ..Default::default() }).unwrap();
        s.update_task(filed.id, TaskPatch { parent_id: Some(Some(shelf.id)), ..Default::default() }).unwrap();
        (parent, loose, shelf, filed)
    };

    let mut h = start(store, remote, true);
    drained(&h).await;

    let server = h.remote.tasks();
    assert_eq!(server.len(), 3);
    let server_shelf = by_name(server.values(), "shelf");
    assert_eq!(by_name(server.values(), "loose").parent_id, None);
    assert_eq!(by_name(server.values(), "filed").parent_id, Some(server_shelf.id));

    // Every survivor reconciled; none is stranded on a temporary ID.
    let local: std::collections::BTreeMap<TaskId, Task> =
        h.store.lock().tasks().map(|t| (t.id, t.clone())).collect();
    assert_eq!(local, server);

    let notices = collect(&mut h.notices);
    assert!(notices.iter().all(|n| !matches!(n, SyncNotice::Orphaned { .. })));
    let reconciled: Vec<TaskId> = notices
        .iter()
        .filter_map(|n| match n {
            SyncNotice::Reconciled { temp_id, .. } => Some(*temp_id),
            _ => None,
        })
        .collect();
    assert_eq!(reconciled, vec![loose.id, shelf.id, filed.id]);
    assert!(notices.iter().any(|n| matches!(
        n,
        SyncNotice::Rejected { op: SyncOperation::CreateTask { temp_id, .. }, .. } if *temp_id == parent.id
    )));
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_unauthorized_parks_until_resumed() {
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault(Fault::Fail(RemoteError::Unauthorized));

    let store = new_store();
    store.lock().create_task(TaskContent::named("needs auth")).unwrap();

    let mut h = start(store, remote, true);
    reach(&h, EngineState::Offline).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.store.lock().log().len(), 1);
    assert_eq!(h.remote.journal().len(), 1);
    assert!(collect(&mut h.notices).contains(&SyncNotice::Unauthorized));

    h.handle.resume();
    drained(&h).await;
    assert_eq!(h.remote.tasks().len(), 1);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_unauthorized_resumes_on_reconnect_edge() {
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault(Fault::Fail(RemoteError::Unauthorized));

    let store = new_store();
    store.lock().create_task(TaskContent::named("needs auth")).unwrap();

    let h = start(store, remote, true);
    reach(&h, EngineState::Offline).await;

    h.online.send(false).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    h.online.send(true).unwrap();
    drained(&h).await;
    assert_eq!(h.remote.tasks().len(), 1);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_timeout_retries_without_duplicating() {
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault(Fault::Stall(Duration::from_secs(30)));

    let store = new_store();
    store.lock().create_task(TaskContent::named("slow")).unwrap();

    let h = start(store, remote, true);
    drained(&h).await;

    assert_eq!(h.remote.tasks().len(), 1);
    assert!(h.store.lock().tasks().all(|t| t.id > 0));
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_delete_of_missing_task_counts_as_success() {
    let remote = Arc::new(MemoryRemote::new());
    let existing = remote.insert_foreign("shared", "u1");

    let store = new_store();
    store.lock().hydrate(vec![existing.clone()]);
    // Another device deletes it first.
    remote.delete_task(existing.id).await.unwrap();
    store.lock().delete_task(existing.id).unwrap();

    let mut h = start(store, remote, true);
    drained(&h).await;

    assert!(collect(&mut h.notices).iter().all(|n| !matches!(n, SyncNotice::Rejected { .. })));
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_connectivity_loss_during_backoff_goes_offline() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_offline(true);

    let store = new_store();
    store.lock().create_task(TaskContent::named("stuck")).unwrap();

    let h = start(store, remote, true);
    reach(&h, EngineState::Backoff).await;

    h.online.send(false).unwrap();
    reach(&h, EngineState::Offline).await;

    h.remote.set_offline(false);
    h.online.send(true).unwrap();
    drained(&h).await;
    assert_eq!(h.remote.tasks().len(), 1);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_shutdown_lets_in_flight_request_finish() {
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault(Fault::Stall(Duration::from_millis(500)));

    let store = new_store();
    {
        let mut s = store.lock();
        s.create_task(TaskContent::named("in flight")).unwrap();
        s.create_task(TaskContent::named("left behind")).unwrap();
    }

    let h = start(store.clone(), remote.clone(), true);
    reach(&h, EngineState::Draining).await;

    let mut state = h.handle.state_receiver();
    h.handle.shutdown().await;
    assert_eq!(*state.borrow_and_update(), EngineState::Stopped);

    // First create completed and was reconciled; the second never left.
    assert_eq!(remote.tasks().len(), 1);
    let s = store.lock();
    assert_eq!(s.log().len(), 1);
    assert!(by_name(s.tasks(), "in flight").id > 0);
    assert!(by_name(s.tasks(), "left behind").id < 0);
}
