// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    /// Persisted JSON under `key` failed to parse.
    #[error("Corrupted storage at '{key}': {reason}")]
    Corrupted { key: String, reason: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Injected key-value persistence.
///
/// Values are JSON text. Calls are synchronous because every store mutation
/// persists before it returns, and store mutations never suspend.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Write several keys. Default implementation falls back to sequential puts.
    fn put_many(&self, entries: &[(String, String)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }
}
