// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Guest and authenticated modes.
//!
//! A [`Session`] starts in guest mode: the guest store takes edits and
//! nothing is sent anywhere. Signing in migrates the guest tasks into the
//! authenticated store once, then starts draining. Signing out stops the
//! engine between operations and returns to guest mode; queued operations
//! stay persisted for the next sign-in.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncHandle};
use crate::error::SessionError;
use crate::migration::{migrate_guest_tasks, MigrationReport};
use crate::remote::RemoteApi;
use crate::storage::{KeyValueStore, Namespace};
use crate::store::{SharedStore, TaskStore};

pub const GUEST_OWNER: &str = "guest";

struct Account {
    owner_id: String,
    store: SharedStore,
    engine: SyncHandle,
}

pub struct Session {
    kv: Arc<dyn KeyValueStore>,
    guest: SharedStore,
    account: Option<Account>,
}

impl Session {
    /// Open in guest mode.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self, SessionError> {
        let guest = TaskStore::open(kv.clone(), Namespace::Guest, GUEST_OWNER)?.into_shared();
        Ok(Self { kv, guest, account: None })
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        self.account.as_ref().map_or(GUEST_OWNER, |a| a.owner_id.as_str())
    }

    #[must_use]
    pub fn guest_store(&self) -> &SharedStore {
        &self.guest
    }

    /// The store the UI should read and write right now.
    #[must_use]
    pub fn active_store(&self) -> &SharedStore {
        self.account.as_ref().map_or(&self.guest, |a| &a.store)
    }

    #[must_use]
    pub fn engine(&self) -> Option<&SyncHandle> {
        self.account.as_ref().map(|a| &a.engine)
    }

    /// Migrate the guest tasks into `owner_id`'s store and start syncing.
    #[instrument(skip(self, remote, connectivity, config))]
    pub fn sign_in(
        &mut self,
        owner_id: &str,
        remote: Arc<dyn RemoteApi>,
        connectivity: watch::Receiver<bool>,
        config: SyncConfig,
    ) -> Result<MigrationReport, SessionError> {
        if let Some(account) = &self.account {
            return Err(SessionError::AlreadySignedIn(account.owner_id.clone()));
        }

        let mut target = TaskStore::open(self.kv.clone(), Namespace::Authenticated, owner_id)?;
        if target.tasks().any(|t| t.owner_id != owner_id) {
            warn!(owner = owner_id, "Persisted account data belongs to another user, clearing");
            target.clear();
        }

        let report = migrate_guest_tasks(&mut self.guest.lock(), &mut target)?;

        let store = target.into_shared();
        let engine = SyncEngine::new(store.clone(), remote, config, connectivity).spawn();
        info!(owner = owner_id, migrated = report.migrated_count, "Signed in");

        self.account = Some(Account { owner_id: owner_id.to_string(), store, engine });
        Ok(report)
    }

    /// Stop syncing and return to guest mode.
    #[instrument(skip(self))]
    pub async fn sign_out(&mut self) {
        let Some(account) = self.account.take() else {
            return;
        };
        account.engine.shutdown().await;
        info!(
            owner = %account.owner_id,
            pending = account.store.lock().log().len(),
            "Signed out"
        );
    }
}
