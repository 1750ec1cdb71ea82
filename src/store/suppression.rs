// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Short-lived hiding of tasks the user just removed.
//!
//! aria2 keeps listing a removed task until its result is purged, and a
//! refresh that raced with the remove call may still report it as active.
//! A gid stays hidden from snapshots until the engine stops listing it or
//! the TTL runs out, whichever comes first. After that, engine truth wins.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::task::{DownloadTask, TaskStatus};

#[derive(Debug, Clone, Copy)]
struct Entry {
    since: Instant,
    purge_requested: bool,
}

#[derive(Debug)]
pub struct SuppressionSet {
    entries: HashMap<String, Entry>,
    ttl: Duration,
}

impl SuppressionSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Hide `gid`. Re-inserting restarts its timer.
    pub fn insert(&mut self, gid: &str, now: Instant) {
        self.entries.insert(
            gid.to_string(),
            Entry {
                since: now,
                purge_requested: false,
            },
        );
    }

    /// Stop hiding `gid`, e.g. because the engine refused the removal.
    pub fn lift(&mut self, gid: &str) -> bool {
        self.entries.remove(gid).is_some()
    }

    pub fn is_suppressed(&self, gid: &str, now: Instant) -> bool {
        self.entries
            .get(gid)
            .map(|entry| now.duration_since(entry.since) < self.ttl)
            .unwrap_or(false)
    }

    /// Update the set against a freshly fetched task list.
    ///
    /// Drops expired entries and entries whose gid the engine no longer
    /// lists. Returns the gids the engine now reports as `removed` that have
    /// not been purged yet; the caller should send removeDownloadResult for
    /// each exactly once.
    pub fn reconcile(&mut self, tasks: &[DownloadTask], now: Instant) -> Vec<String> {
        let ttl = self.ttl;
        let listed: HashMap<&str, TaskStatus> =
            tasks.iter().map(|t| (t.gid.as_str(), t.status)).collect();

        self.entries.retain(|gid, entry| {
            let alive = now.duration_since(entry.since) < ttl;
            let keep = alive && listed.contains_key(gid.as_str());
            if !keep {
                tracing::debug!(gid = %gid, expired = !alive, "removal suppression cleared");
            }
            keep
        });

        let mut purge = Vec::new();
        for (gid, entry) in self.entries.iter_mut() {
            if listed.get(gid.as_str()) == Some(&TaskStatus::Removed) && !entry.purge_requested {
                entry.purge_requested = true;
                purge.push(gid.clone());
            }
        }
        purge.sort();
        purge
    }

    /// The purge of `gid` did not go through; offer it again on the next
    /// reconcile.
    pub fn purge_failed(&mut self, gid: &str) {
        if let Some(entry) = self.entries.get_mut(gid) {
            entry.purge_requested = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
