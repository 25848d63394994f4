// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One drain step: send the front operation, then apply the outcome.

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::metrics::LatencyTimer;
use crate::oplog::{QueuedOperation, SyncOperation};
use crate::remote::RemoteApi;
use crate::resilience::{retry, RetryConfig};
use crate::store::SharedStore;
use crate::task::{Task, TaskPatch};

use super::types::{Step, SyncNotice};
use super::SyncEngine;

/// What a successful remote call gave back.
enum Sent {
    Created(Task),
    Applied,
}

impl SyncEngine {
    /// Send the front of the log and apply the result to the store.
    pub(super) async fn drain_one(&mut self) -> Step {
        // Copy out and release the lock before awaiting.
        let Some(entry) = self.store.lock().front() else {
            return Step::Empty;
        };
        let kind = entry.op.kind();
        debug!(seq = entry.seq, kind, target = entry.op.target_id(), "Sending operation");

        let result = {
            let _timer = LatencyTimer::new(kind);
            match timeout(self.config.request_timeout(), self.send(&entry.op)).await {
                Ok(result) => result,
                Err(_) => {
                    crate::metrics::record_timeout(kind);
                    Err(RemoteError::Transient(format!(
                        "request timed out after {}ms",
                        self.config.request_timeout_ms
                    )))
                }
            }
        };

        match result {
            Ok(Sent::Created(task)) if task.id <= 0 => {
                warn!(seq = entry.seq, server_id = task.id, "Server returned a non-positive ID");
                self.reject(entry, 0, format!("server assigned invalid id {}", task.id))
            }
            Ok(Sent::Created(task)) => self.reconcile(entry, &task),
            Ok(Sent::Applied) => self.acknowledge(entry),
            Err(RemoteError::Rejected { status: 404, .. }) if matches!(entry.op, SyncOperation::DeleteTask { .. }) => {
                debug!(seq = entry.seq, "Delete target already gone");
                self.acknowledge(entry)
            }
            Err(RemoteError::Rejected { status, message }) => self.reject(entry, status, message),
            Err(RemoteError::Transient(reason)) => {
                crate::metrics::record_operation(kind, "transient");
                warn!(seq = entry.seq, kind, reason = %reason, "Transient failure, will retry");
                Step::Retry
            }
            Err(RemoteError::Unauthorized) => {
                crate::metrics::record_operation(kind, "unauthorized");
                warn!(seq = entry.seq, kind, "Unauthorized, parking until re-authenticated");
                self.notify(SyncNotice::Unauthorized);
                Step::Unauthorized
            }
        }
    }

    async fn send(&self, op: &SyncOperation) -> Result<Sent, RemoteError> {
        let remote = self.remote.as_ref();
        match op {
            SyncOperation::CreateTask { payload, client_token, .. } => {
                remote.create_task(payload, *client_token).await.map(Sent::Created)
            }
            SyncOperation::UpdateTask { id, patch } => remote.update_task(*id, patch).await.map(|_| Sent::Applied),
            SyncOperation::SetStatus { id, change } => remote.set_status(*id, change).await.map(|_| Sent::Applied),
            SyncOperation::DeleteTask { id } => remote.delete_task(*id).await.map(|_| Sent::Applied),
            SyncOperation::ReorderSubtasks { parent_id, order } => remote
                .update_task(*parent_id, &TaskPatch::manual_order(order.clone()))
                .await
                .map(|_| Sent::Applied),
        }
    }

    fn reconcile(&self, entry: QueuedOperation, server_task: &Task) -> Step {
        let outcome = self.store.lock().reconcile_created(entry.seq, server_task);
        crate::metrics::record_operation(entry.op.kind(), "success");
        match outcome {
            Some(r) => {
                crate::metrics::record_reconciled(r.rewritten);
                info!(temp_id = r.temp_id, server_id = r.server_id, rewritten = r.rewritten, "Task created on server");
                self.notify(SyncNotice::Reconciled { temp_id: r.temp_id, server_id: r.server_id });
            }
            None => warn!(seq = entry.seq, "Log front moved during create, result ignored"),
        }
        Step::Advanced
    }

    fn acknowledge(&self, entry: QueuedOperation) -> Step {
        if !self.store.lock().acknowledge(entry.seq) {
            warn!(seq = entry.seq, "Log front moved during request, acknowledgement ignored");
        }
        crate::metrics::record_operation(entry.op.kind(), "success");
        Step::Advanced
    }

    fn reject(&self, entry: QueuedOperation, status: u16, message: String) -> Step {
        crate::metrics::record_operation(entry.op.kind(), "rejected");
        warn!(seq = entry.seq, kind = entry.op.kind(), status, message = %message, "Operation rejected, dropping");

        let discarded = self.store.lock().discard_rejected(entry.seq);
        let Some(discarded) = discarded else {
            return Step::Advanced;
        };

        let ancestor = discarded.op.target_id();
        if !discarded.orphans.is_empty() {
            crate::metrics::record_orphaned(discarded.orphans.len());
        }
        self.notify(SyncNotice::Rejected { op: discarded.op, status, message });
        for task_id in discarded.orphans {
            self.notify(SyncNotice::Orphaned { task_id, rejected_ancestor: ancestor });
        }
        Step::Advanced
    }
}

/// Hydrate the store from `GET /tasks`, skipped while anything is queued.
///
/// Returns how many tasks were taken from the server.
pub(super) async fn refresh(
    store: &SharedStore,
    remote: &dyn RemoteApi,
    config: &SyncConfig,
) -> Result<usize, RemoteError> {
    let watermark = {
        let store = store.lock();
        if !store.log().is_empty() {
            debug!(pending = store.log().len(), "Refresh skipped, operations pending");
            return Ok(0);
        }
        store.log().next_seq()
    };

    let tasks = retry("list_tasks", &RetryConfig::query(), move || async move {
        timeout(config.request_timeout(), remote.list_tasks())
            .await
            .unwrap_or_else(|_| Err(RemoteError::Transient("list request timed out".into())))
    })
    .await?;

    let mut store = store.lock();
    // Anything enqueued meanwhile makes the listing stale.
    if !store.log().is_empty() || store.log().next_seq() != watermark {
        debug!("Refresh discarded, local changes arrived during fetch");
        return Ok(0);
    }
    Ok(store.hydrate(tasks))
}
