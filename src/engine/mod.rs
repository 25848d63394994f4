// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine: drains the operation log into the remote API.
//!
//! One request is in flight at a time, always for the front of the log.
//! A transient failure blocks everything behind it; a rejection drops the
//! operation and moves on. The engine reads and writes the store only
//! through short lock scopes between awaits, so UI mutations are never
//! blocked by the network.
//!
//! ```text
//!   Idle ──enqueue──▶ Draining ──log empty──▶ Idle
//!                       │  ▲
//!            transient  │  │ delay elapsed
//!                       ▼  │
//!                     Backoff
//!   any ──connectivity lost / 401──▶ Offline ──reconnect──▶ Draining
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskrank_sync::{MemoryKv, MemoryRemote, Namespace, SyncConfig, SyncEngine, TaskContent, TaskStore};
//! use tokio::sync::watch;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TaskStore::open(Arc::new(MemoryKv::new()), Namespace::Authenticated, "u1")?.into_shared();
//! let (_online_tx, online) = watch::channel(true);
//!
//! let handle = SyncEngine::new(store.clone(), Arc::new(MemoryRemote::new()), SyncConfig::default(), online).spawn();
//! store.lock().create_task(TaskContent::named("Pay rent"))?;
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod drain;
mod lifecycle;
pub mod types;

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::remote::RemoteApi;
use crate::resilience::Backoff;
use crate::store::SharedStore;

pub use types::{EngineState, SyncNotice};

const NOTICE_CAPACITY: usize = 256;

pub struct SyncEngine {
    pub(super) store: SharedStore,
    pub(super) remote: Arc<dyn RemoteApi>,
    pub(super) config: SyncConfig,
    pub(super) backoff: Backoff,

    /// Current connectivity; a false → true edge is the reconnect signal
    pub(super) connectivity: watch::Receiver<bool>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    pub(super) notices: broadcast::Sender<SyncNotice>,

    /// Wakes an engine parked after a 401
    pub(super) resume: Arc<Notify>,
}

impl SyncEngine {
    pub fn new(
        store: SharedStore,
        remote: Arc<dyn RemoteApi>,
        config: SyncConfig,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let backoff = Backoff::new(config.backoff());

        Self {
            store,
            remote,
            config,
            backoff,
            connectivity,
            state: state_tx,
            state_rx,
            notices,
            resume: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Subscribe before [`spawn`](Self::spawn) to see every notice.
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    /// Pull the server's task list into the store if nothing is queued.
    pub async fn refresh(&self) -> Result<usize, RemoteError> {
        drain::refresh(&self.store, self.remote.as_ref(), &self.config).await
    }

    /// Run the drain loop on the tokio runtime.
    pub fn spawn(self) -> SyncHandle {
        // Only the handle holds the sender: dropping it stops the loop too.
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle_parts = (
            self.state_rx.clone(),
            self.notices.clone(),
            self.resume.clone(),
            self.store.clone(),
            self.remote.clone(),
            self.config.clone(),
        );
        info!(pending = self.store.lock().log().len(), "Spawning sync engine");
        let task = tokio::spawn(self.run(stop_rx));

        let (state_rx, notices, resume, store, remote, config) = handle_parts;
        SyncHandle { stop_tx, state_rx, notices, resume, store, remote, config, task }
    }

    pub(super) fn set_state(&self, next: EngineState) {
        if *self.state.borrow() == next {
            return;
        }
        debug!(from = %*self.state.borrow(), to = %next, "Engine state change");
        crate::metrics::set_engine_state(&next.to_string());
        let _ = self.state.send(next);
    }

    pub(super) fn notify(&self, notice: SyncNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }
}

/// Control surface of a running engine.
pub struct SyncHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<EngineState>,
    notices: broadcast::Sender<SyncNotice>,
    resume: Arc<Notify>,
    store: SharedStore,
    remote: Arc<dyn RemoteApi>,
    config: SyncConfig,
    task: JoinHandle<()>,
}

impl SyncHandle {
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Resume after re-authentication without waiting for a reconnect edge.
    pub fn resume(&self) {
        self.resume.notify_one();
    }

    pub async fn refresh(&self) -> Result<usize, RemoteError> {
        drain::refresh(&self.store, self.remote.as_ref(), &self.config).await
    }

    /// Stop between operations and wait for the loop to exit.
    ///
    /// An in-flight request finishes and its outcome is applied first.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(self) {
        info!("Initiating sync engine shutdown...");
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Sync engine task ended abnormally");
        }
        info!("Sync engine shutdown complete");
    }
}
