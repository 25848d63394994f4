// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use taskrank_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.request_timeout_ms, 10_000);
//!
//! // Full config
//! let config = SyncConfig {
//!     api_base_url: "https://tasks.example.com/api".into(),
//!     request_timeout_ms: 5_000,
//!     storage_dir: Some("/var/lib/taskrank".into()),
//!     ..Default::default()
//! };
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::resilience::RetryConfig;
use crate::storage::{FileKv, KeyValueStore, MemoryKv, StorageError};

/// Configuration for the sync engine and its local storage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Base URL of the REST API, without trailing slash
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Upper bound on any single request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Backoff after a transient failure
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Directory for file-backed persistence. `None` keeps state in memory.
    #[serde(default)]
    pub storage_dir: Option<String>,
}

fn default_api_base_url() -> String { "http://localhost:3000/api".to_string() }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_backoff_initial_ms() -> u64 { 1_000 }
fn default_backoff_max_ms() -> u64 { 60_000 }
fn default_backoff_factor() -> f64 { 2.0 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_factor: default_backoff_factor(),
            storage_dir: None,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Backoff schedule for the drain loop.
    #[must_use]
    pub fn backoff(&self) -> RetryConfig {
        RetryConfig::from_millis(self.backoff_initial_ms, self.backoff_max_ms, self.backoff_factor)
    }

    /// Open the configured key-value store: files under `storage_dir`,
    /// or memory when unset.
    pub fn open_storage(&self) -> Result<Arc<dyn KeyValueStore>, StorageError> {
        match &self.storage_dir {
            Some(dir) => Ok(Arc::new(FileKv::open(dir)?)),
            None => Ok(Arc::new(MemoryKv::new())),
        }
    }
}
