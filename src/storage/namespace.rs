// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted layout of one storage namespace.
//!
//! | key                 | value                          |
//! |---------------------|--------------------------------|
//! | `{ns}:tasks`        | JSON array of `Task`           |
//! | `{ns}:oplog`        | JSON array of `QueuedOperation`|
//! | `{ns}:id_counter`   | JSON integer                   |
//! | `guest:demo_ids`    | JSON array of seed task IDs    |

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use tracing::warn;

use super::traits::{KeyValueStore, StorageError};
use crate::ids::TempIdAllocator;
use crate::oplog::QueuedOperation;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Guest,
    Authenticated,
}

impl Namespace {
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Authenticated => "authenticated",
        }
    }

    #[must_use]
    pub fn tasks_key(&self) -> String {
        format!("{}:tasks", self.prefix())
    }

    #[must_use]
    pub fn oplog_key(&self) -> String {
        format!("{}:oplog", self.prefix())
    }

    #[must_use]
    pub fn counter_key(&self) -> String {
        format!("{}:id_counter", self.prefix())
    }

    /// Only the guest namespace tracks seed tasks.
    #[must_use]
    pub fn demo_ids_key(&self) -> Option<String> {
        match self {
            Self::Guest => Some(format!("{}:demo_ids", self.prefix())),
            Self::Authenticated => None,
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Everything persisted for one namespace.
#[derive(Debug, Clone, Default)]
pub struct NamespaceSnapshot {
    pub tasks: Vec<Task>,
    pub log: Vec<QueuedOperation>,
    pub ids: TempIdAllocator,
    pub demo_ids: BTreeSet<TaskId>,
}

impl NamespaceSnapshot {
    /// Read a namespace. Parse failures surface as [`StorageError::Corrupted`],
    /// except for the ID counter which silently restarts at -1.
    pub fn load(kv: &dyn KeyValueStore, ns: Namespace) -> Result<Self, StorageError> {
        let tasks: Vec<Task> = read_json(kv, &ns.tasks_key())?.unwrap_or_default();
        let log: Vec<QueuedOperation> = read_json(kv, &ns.oplog_key())?.unwrap_or_default();

        let ids = match read_json::<TaskId>(kv, &ns.counter_key()) {
            Ok(Some(next)) => TempIdAllocator::restore(next),
            Ok(None) => TempIdAllocator::new(),
            Err(e) => {
                warn!(namespace = %ns, error = %e, "ID counter unreadable, restarting at -1");
                TempIdAllocator::new()
            }
        };

        let demo_ids = match ns.demo_ids_key() {
            Some(key) => read_json::<BTreeSet<TaskId>>(kv, &key)?.unwrap_or_default(),
            None => BTreeSet::new(),
        };

        Ok(Self { tasks, log, ids, demo_ids })
    }

    /// Read a namespace, resetting it to empty if any part is corrupted.
    ///
    /// Returns the snapshot and whether a reset happened. Unsynced data in a
    /// corrupted namespace is lost.
    pub fn load_or_reset(kv: &dyn KeyValueStore, ns: Namespace) -> Result<(Self, bool), StorageError> {
        match Self::load(kv, ns) {
            Ok(snapshot) => Ok((snapshot, false)),
            Err(StorageError::Corrupted { key, reason }) => {
                warn!(namespace = %ns, key = %key, reason = %reason, "Corrupted storage, resetting namespace");
                crate::metrics::record_storage_reset(ns.prefix());
                Self::clear(kv, ns)?;
                Ok((Self::default(), true))
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, kv: &dyn KeyValueStore, ns: Namespace) -> Result<(), StorageError> {
        let mut entries = vec![
            (ns.tasks_key(), to_json(&self.tasks)?),
            (ns.oplog_key(), to_json(&self.log)?),
            (ns.counter_key(), to_json(&self.ids)?),
        ];
        if let Some(key) = ns.demo_ids_key() {
            entries.push((key, to_json(&self.demo_ids)?));
        }
        kv.put_many(&entries)
    }

    pub fn clear(kv: &dyn KeyValueStore, ns: Namespace) -> Result<(), StorageError> {
        kv.delete(&ns.tasks_key())?;
        kv.delete(&ns.oplog_key())?;
        kv.delete(&ns.counter_key())?;
        if let Some(key) = ns.demo_ids_key() {
            kv.delete(&key)?;
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(kv: &dyn KeyValueStore, key: &str) -> Result<Option<T>, StorageError> {
    match kv.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupted { key: key.to_string(), reason: e.to_string() }),
        None => Ok(None),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Backend(format!("serialize failed: {}", e)))
}
