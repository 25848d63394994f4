// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic taskrank-sync usage example.
//!
//! Demonstrates:
//! 1. Working offline as a guest with demo tasks
//! 2. Signing in: demo tasks dropped, user tasks migrated under temp IDs
//! 3. A transient server failure absorbed by backoff
//! 4. Draining the queue and reconciling temp IDs
//! 5. Displaying metrics
//! 6. Clean sign-out
//!
//! Runs entirely in memory against a fake server.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use taskrank_sync::{
    EngineState, Fault, MemoryRemote, RemoteError, Session, SyncConfig, SyncNotice, TaskContent,
    TaskStatus,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().map_err(|_| "failed to install metrics recorder")?;

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           taskrank-sync: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Guest mode: demo tasks plus a few of our own
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Opening guest session...");
    // Leave TASKRANK_STORAGE_DIR unset to keep everything in memory.
    let config = SyncConfig {
        backoff_initial_ms: 50,
        backoff_max_ms: 200,
        storage_dir: std::env::var("TASKRANK_STORAGE_DIR").ok(),
        ..Default::default()
    };
    let mut session = Session::open(config.open_storage()?)?;

    {
        let mut guest = session.guest_store().lock();
        guest.seed_demo_tasks(vec![
            TaskContent::named("Welcome to taskrank"),
            TaskContent::named("Try ranking a task"),
        ])?;

        let trip = guest.create_task(TaskContent::named("Plan trip").auto_completing())?;
        let flights = guest.create_task(TaskContent::named("Book flights").under(trip.id))?;
        guest.create_task(TaskContent::named("Reserve hotel").under(trip.id))?;
        guest.set_task_status(flights.id, TaskStatus::Completed)?;

        println!("   Guest tasks: {} ({} demo)", guest.len(), guest.demo_ids().len());
        print_tree(&guest.build_tree()?, 1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Sign in: migrate into the account namespace and start syncing
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔑 Signing in as alice...");
    let remote = Arc::new(MemoryRemote::new());
    remote.push_fault_for("create", Fault::Fail(RemoteError::Transient("503 from upstream".into())));

    let (_online_tx, online_rx) = watch::channel(true);

    let report = session.sign_in("alice", remote.clone(), online_rx, config)?;
    println!(
        "   Migrated {} task(s), dropped {} demo task(s)",
        report.migrated_count, report.discarded_demo_count
    );
    for (old, new) in &report.id_map {
        println!("   │  {} → {}", old, new);
    }

    let Some(engine) = session.engine() else {
        return Err("engine not running after sign-in".into());
    };
    let mut notices = engine.notices();
    let mut state = engine.state_receiver();

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Keep editing while the engine works through the queue
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n✏️  Editing while online...");
    {
        let mut store = session.active_store().lock();
        let packing = store.create_task(TaskContent::named("Pack bags"))?;
        store.set_task_status(packing.id, TaskStatus::InProgress)?;
        println!("   Queued operations: {}", store.log().len());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Wait for the queue to drain
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⏳ Waiting for sync...");
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let empty = session.active_store().lock().log().is_empty();
            if empty && *state.borrow() == EngineState::Idle {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    if drained.is_err() {
        println!("   ⚠️  queue did not drain in time");
    }

    while let Ok(notice) = notices.try_recv() {
        match notice {
            SyncNotice::Reconciled { temp_id, server_id } => {
                println!("   ✓ {} is now {}", temp_id, server_id)
            }
            other => println!("   ! {:?}", other),
        }
    }

    {
        let store = session.active_store().lock();
        println!("   Local tasks:  {}", store.len());
        println!("   Server tasks: {}", remote.tasks().len());
        print_tree(&store.build_tree()?, 1);
    }
    println!("   Requests sent: {}", remote.journal().len());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics snapshot:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Sign out
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Signing out...");
    session.sign_out().await;
    println!("   Authenticated: {}", session.is_authenticated());

    println!("\n✅ Done!\n");
    Ok(())
}

fn print_tree(nodes: &[taskrank_sync::TaskNode], depth: usize) {
    for node in nodes {
        println!(
            "   {}• [{}] {} ({:?})",
            "  ".repeat(depth),
            node.task.id,
            node.task.name,
            node.task.status
        );
        print_tree(&node.children, depth + 1);
    }
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let max = samples.iter().map(|v| v.into_inner()).fold(0.0, f64::max);
                histograms.push((name, label_str, count, sum, max));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, labels, count, sum, max) in &histograms {
            println!("      └─ {}{} count={} sum={:.4} max={:.4}", name, labels, count, sum, max);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
