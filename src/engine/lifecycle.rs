// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: the drain loop and its waits.

use tokio::sync::watch;
use tracing::{debug, info};

use super::types::Step;
use super::{EngineState, SyncEngine};

/// Why a wait ended.
enum Wake {
    Proceed,
    Stop,
}

impl SyncEngine {
    /// Drain until stopped. Stop requests are honored between operations.
    #[tracing::instrument(skip_all)]
    pub(super) async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("Sync engine running");
        let mut revision = self.store.lock().subscribe();

        loop {
            if *stop.borrow() {
                break;
            }

            if !*self.connectivity.borrow() {
                self.set_state(EngineState::Offline);
                if let Wake::Stop = self.wait_online(&mut stop).await {
                    break;
                }
                self.backoff.reset();
                continue;
            }

            // Mark the current revision seen before peeking, so an enqueue
            // after the peek still wakes the idle wait.
            revision.borrow_and_update();
            if self.store.lock().log().is_empty() {
                self.set_state(EngineState::Idle);
                if let Wake::Stop = self.wait_for_work(&mut revision, &mut stop).await {
                    break;
                }
                continue;
            }

            self.set_state(EngineState::Draining);
            match self.drain_one().await {
                Step::Advanced => self.backoff.reset(),
                Step::Empty => {}
                Step::Retry => {
                    self.set_state(EngineState::Backoff);
                    if let Wake::Stop = self.wait_backoff(&mut stop).await {
                        break;
                    }
                }
                Step::Unauthorized => {
                    self.set_state(EngineState::Offline);
                    if let Wake::Stop = self.wait_reauthenticated(&mut stop).await {
                        break;
                    }
                    self.backoff.reset();
                }
            }
        }

        self.set_state(EngineState::Stopped);
        info!(pending = self.store.lock().log().len(), "Sync engine stopped");
    }

    async fn wait_for_work(&mut self, revision: &mut watch::Receiver<u64>, stop: &mut watch::Receiver<bool>) -> Wake {
        tokio::select! {
            changed = revision.changed() => match changed {
                Ok(()) => Wake::Proceed,
                // Store gone: nothing left to drain.
                Err(_) => Wake::Stop,
            },
            Ok(()) = self.connectivity.changed() => Wake::Proceed,
            _ = stop.changed() => Wake::Stop,
        }
    }

    async fn wait_backoff(&mut self, stop: &mut watch::Receiver<bool>) -> Wake {
        let delay = self.backoff.next_delay();
        crate::metrics::record_backoff(delay);
        debug!(delay_ms = delay.as_millis() as u64, attempt = self.backoff.attempts(), "Backing off");

        tokio::select! {
            _ = tokio::time::sleep(delay) => Wake::Proceed,
            // Going offline cuts the wait short; the loop then parks.
            Ok(()) = self.connectivity.changed() => Wake::Proceed,
            _ = stop.changed() => Wake::Stop,
        }
    }

    async fn wait_online(&mut self, stop: &mut watch::Receiver<bool>) -> Wake {
        loop {
            tokio::select! {
                Ok(()) = self.connectivity.changed() => {
                    if *self.connectivity.borrow_and_update() {
                        info!("Connectivity restored");
                        return Wake::Proceed;
                    }
                }
                _ = stop.changed() => return Wake::Stop,
            }
        }
    }

    /// Parked after a 401: wait for an explicit resume or a reconnect edge.
    async fn wait_reauthenticated(&mut self, stop: &mut watch::Receiver<bool>) -> Wake {
        let resume = self.resume.clone();
        self.connectivity.borrow_and_update();
        let mut went_offline = false;

        loop {
            tokio::select! {
                _ = resume.notified() => return Wake::Proceed,
                Ok(()) = self.connectivity.changed() => {
                    let online = *self.connectivity.borrow_and_update();
                    if !online {
                        went_offline = true;
                    } else if went_offline {
                        info!("Reconnected after authorization failure");
                        return Wake::Proceed;
                    }
                }
                _ = stop.changed() => return Wake::Stop,
            }
        }
    }
}
