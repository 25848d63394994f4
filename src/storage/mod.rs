// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence for the task store.
//!
//! - [`traits`]: the injected [`KeyValueStore`] interface
//! - [`memory`]: DashMap-backed store
//! - [`file`]: one JSON file per key
//! - [`namespace`]: key layout and load/save of one namespace

pub mod traits;
pub mod memory;
pub mod file;
pub mod namespace;

pub use traits::{KeyValueStore, StorageError};
pub use memory::MemoryKv;
pub use file::FileKv;
pub use namespace::{Namespace, NamespaceSnapshot};
