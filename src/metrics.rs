// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for taskrank-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `taskrank_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: create, update, set_status, delete, reorder
//! - `outcome`: success, transient, rejected, unauthorized
//! - `namespace`: guest, authenticated

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one remote call made for a queued operation
pub fn record_operation(kind: &str, outcome: &str) {
    counter!(
        "taskrank_sync_operations_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record remote call latency
pub fn record_latency(kind: &str, duration: Duration) {
    histogram!(
        "taskrank_sync_request_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a request that hit the configured timeout
pub fn record_timeout(kind: &str) {
    counter!(
        "taskrank_sync_timeouts_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Set operations still waiting in the log
pub fn set_queue_depth(depth: usize) {
    gauge!("taskrank_sync_queue_depth").set(depth as f64);
}

/// Track engine state transitions
pub fn set_engine_state(state: &str) {
    counter!(
        "taskrank_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a backoff sleep
pub fn record_backoff(delay: Duration) {
    histogram!("taskrank_sync_backoff_seconds").record(delay.as_secs_f64());
}

/// Record a temporary ID replaced by its server ID
pub fn record_reconciled(rewritten_ops: usize) {
    counter!("taskrank_sync_reconciled_total").increment(1);
    histogram!("taskrank_sync_reconcile_rewrites").record(rewritten_ops as f64);
}

/// Record tasks dropped because their ancestor's create was rejected
pub fn record_orphaned(count: usize) {
    counter!("taskrank_sync_orphaned_total").increment(count as u64);
}

/// Record a guest-to-account migration
pub fn record_migration(migrated: usize, discarded_demo: usize) {
    counter!("taskrank_sync_migrations_total").increment(1);
    counter!("taskrank_sync_migrated_tasks_total").increment(migrated as u64);
    counter!("taskrank_sync_discarded_demo_tasks_total").increment(discarded_demo as u64);
}

/// Record a namespace reset caused by unreadable persisted state
pub fn record_storage_reset(namespace: &str) {
    counter!(
        "taskrank_sync_storage_resets_total",
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

/// Record a failed write to persistent storage
pub fn record_persist_error(namespace: &str) {
    counter!(
        "taskrank_sync_persist_errors_total",
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

/// Timer that records request latency on drop
pub struct LatencyTimer {
    kind: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.kind, self.start.elapsed());
    }
}
