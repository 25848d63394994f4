// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Taskrank Sync
//!
//! Local-first task tree store with an ordered offline sync engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Task Tree Store                       │
//! │  • Flat ID → Task map, tree derived on read                │
//! │  • Validates, mutates and enqueues in one synchronous step │
//! │  • Temporary negative IDs for offline creates              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (append, persisted)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Sync Operation Log                      │
//! │  • FIFO of CreateTask / UpdateTask / SetStatus / ...       │
//! │  • Temporary IDs rewritten once the server assigns real IDs│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                 (one request in flight, in order)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Sync Engine                          │
//! │  • Idle → Draining → Backoff / Offline                     │
//! │  • Transient failures block, rejections are dropped        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! At sign-in the [`migration`] module moves a guest's own tasks into the
//! authenticated store; [`Session`] ties the pieces together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskrank_sync::{FileKv, HttpRemote, Session, SyncConfig, TaskContent};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig {
//!         api_base_url: "https://tasks.example.com/api".into(),
//!         ..Default::default()
//!     };
//!     let kv = Arc::new(FileKv::open("./taskrank-data")?);
//!     let mut session = Session::open(kv)?;
//!
//!     // Guest mode: edits stay local
//!     session.active_store().lock().create_task(TaskContent::named("Plan trip"))?;
//!
//!     // Sign in: guest tasks migrate, the engine starts draining
//!     let remote = Arc::new(HttpRemote::new(&config)?.with_token("secret"));
//!     let (_online_tx, online) = watch::channel(true);
//!     let report = session.sign_in("user-42", remote, online, config)?;
//!     println!("migrated {} tasks", report.migrated_count);
//!
//!     session.sign_out().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`store`]: the [`TaskStore`] and tree derivation
//! - [`oplog`]: queued operations and ID rewriting
//! - [`engine`]: the [`SyncEngine`] drain loop
//! - [`remote`]: REST API client and in-memory fake
//! - [`storage`]: key-value persistence (memory, files)
//! - [`resilience`]: backoff and retry
//! - [`migration`]: guest-to-account transfer

pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod migration;
pub mod oplog;
pub mod remote;
pub mod resilience;
pub mod session;
pub mod storage;
pub mod store;
pub mod task;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::SyncConfig;
pub use engine::{EngineState, SyncEngine, SyncHandle, SyncNotice};
pub use error::{RemoteError, SessionError, TaskError};
pub use ids::{TempIdAllocator, FIRST_TEMP_ID};
pub use metrics::LatencyTimer;
pub use migration::{migrate_guest_tasks, MigrationReport};
pub use oplog::{OperationLog, QueuedOperation, SyncOperation};
pub use remote::{Fault, HttpRemote, MemoryRemote, RecordedRequest, RemoteApi};
pub use resilience::{Backoff, RetryConfig};
pub use session::Session;
pub use storage::{FileKv, KeyValueStore, MemoryKv, Namespace, StorageError};
pub use store::{SharedStore, TaskNode, TaskStore};
pub use task::{
    RankLevel, StatusChange, SubtaskSortMode, Task, TaskContent, TaskId, TaskPatch, TaskPayload, TaskStatus,
};
