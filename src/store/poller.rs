// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Background refresh loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::TaskStore;

/// Shortest allowed polling interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Commands that can be sent to the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerCommand {
    /// Refresh without waiting for the next tick
    RefreshNow,
    /// Stop the loop
    Shutdown,
}

/// Handle to a running poller task.
///
/// The loop refreshes the store on every tick, whenever a store command asks
/// for an early refresh, and on [`PollerCommand::RefreshNow`]. Refresh errors
/// are recorded in the store's health and never stop the loop.
pub struct Poller {
    command_tx: mpsc::Sender<PollerCommand>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Start polling on the current tokio runtime. The first refresh runs
    /// immediately. Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn spawn(store: Arc<TaskStore>, interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let (command_tx, command_rx) = mpsc::channel(16);
        let handle = tokio::spawn(Self::run(store, interval, command_rx));
        Self { command_tx, handle }
    }

    pub async fn refresh_now(&self) -> Result<()> {
        self.command_tx.send(PollerCommand::RefreshNow).await?;
        Ok(())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already be gone; that is a successful shutdown too.
        let _ = self.command_tx.send(PollerCommand::Shutdown).await;
        self.handle.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    async fn run(
        store: Arc<TaskStore>,
        interval: Duration,
        mut command_rx: mpsc::Receiver<PollerCommand>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(interval_ms = interval.as_millis() as u64, "poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = store.refresh_requested() => {
                    tracing::trace!("early refresh requested by a command");
                }
                cmd = command_rx.recv() => match cmd {
                    Some(PollerCommand::RefreshNow) => {}
                    Some(PollerCommand::Shutdown) | None => break,
                },
            }

            // Failures are logged and counted by the store.
            let _ = store.refresh().await;
        }

        tracing::debug!("poller stopped");
    }
}
