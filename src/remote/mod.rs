// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! REST API the sync engine drains into.
//!
//! - [`HttpRemote`]: reqwest client for the real service
//! - [`MemoryRemote`]: in-process fake with fault injection, for tests and demos

pub mod http;
pub mod memory;
pub mod traits;

pub use http::HttpRemote;
pub use memory::{Fault, MemoryRemote, RecordedRequest};
pub use traits::RemoteApi;
