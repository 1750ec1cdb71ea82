// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The task store: one consistent view of the engine's tasks.
//!
//! The store owns the last successfully fetched task list and publishes it
//! as immutable [`Snapshot`]s through a `watch` channel. Commands (add, pause,
//! resume, stop, remove) go straight to the engine; their effects become
//! visible on the next refresh, except for removals, which are hidden locally
//! right away (see [`suppression`]).
//!
//! Refreshes are ordered by a sequence number taken when the refresh starts.
//! A result older than the one already applied is dropped, so a slow response
//! can never roll the view back.

pub mod poller;
pub mod suppression;

pub use poller::{Poller, PollerCommand};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{CallError, CommandError, SyncError};
use crate::locks::{resilient_read, resilient_write};
use crate::rpc::Engine;
use crate::task::{Bucket, DownloadTask};
use crate::torrent;
use suppression::SuppressionSet;

/// Tunables for a [`TaskStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub suppression_ttl: Duration,
    pub failure_threshold: u32,
    /// Destination used when a command does not name one.
    pub default_dir: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            suppression_ttl: Duration::from_secs(10),
            failure_threshold: 3,
            default_dir: None,
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            suppression_ttl: config.suppression_ttl(),
            failure_threshold: config.failure_threshold,
            default_dir: config.download_dir.clone(),
        }
    }
}

/// An immutable view of all visible tasks.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Increases by one with every publication.
    pub revision: u64,
    pub taken_at: DateTime<Utc>,
    /// Active, then waiting, then stopped tasks, in engine order.
    pub tasks: Vec<DownloadTask>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            revision: 0,
            taken_at: Utc::now(),
            tasks: Vec::new(),
        }
    }

    pub fn get(&self, gid: &str) -> Option<&DownloadTask> {
        self.tasks.iter().find(|t| t.gid == gid)
    }

    pub fn bucket(&self, bucket: Bucket) -> impl Iterator<Item = &DownloadTask> + '_ {
        self.tasks.iter().filter(move |t| bucket.matches(t.status))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Sum of download speeds in bytes per second.
    pub fn total_download_speed(&self) -> u64 {
        self.tasks.iter().map(|t| t.download_speed).sum()
    }
}

/// Per-gid results of a batch command.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: BTreeMap<String, Result<(), CommandError>>,
}

impl BatchOutcome {
    pub fn get(&self, gid: &str) -> Option<&Result<(), CommandError>> {
        self.results.get(gid)
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(gid, _)| gid.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<(&str, &CommandError)> {
        self.results
            .iter()
            .filter_map(|(gid, r)| r.as_ref().err().map(|e| (gid.as_str(), e)))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.results.values().all(Result::is_ok)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Refresh failure accounting.
#[derive(Debug, Clone)]
pub struct SyncHealth {
    pub consecutive_failures: u32,
    pub last_error: Option<SyncError>,
    pub last_success: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
}

impl SyncHealth {
    fn new(failure_threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            last_error: None,
            last_success: None,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// The engine has failed enough refreshes in a row to be reported.
    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures >= self.failure_threshold
    }

    fn record_success(&mut self) {
        if self.is_degraded() {
            tracing::info!(
                failures = self.consecutive_failures,
                "engine reachable again"
            );
        }
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_success = Some(Utc::now());
    }

    fn record_failure(&mut self, err: &SyncError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(err.clone());

        if self.consecutive_failures == self.failure_threshold {
            tracing::error!(
                failures = self.consecutive_failures,
                error = %err,
                "engine unreachable"
            );
        } else if self.consecutive_failures < self.failure_threshold {
            tracing::warn!(
                failures = self.consecutive_failures,
                error = %err,
                "refresh failed, keeping last snapshot"
            );
        } else {
            tracing::debug!(failures = self.consecutive_failures, error = %err, "refresh failed");
        }
    }
}

/// Options for new downloads. Unset fields use the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub dir: Option<String>,
    /// Output file name, single-file downloads only.
    pub out: Option<String>,
    pub split: Option<u32>,
    pub max_connection_per_server: Option<u32>,
    /// Raw aria2 options, passed through as given.
    pub extra: BTreeMap<String, String>,
}

impl AddOptions {
    pub fn with_dir(dir: impl Into<String>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Build the aria2 options object. aria2 expects every value as a string.
    pub fn to_engine_options(
        &self,
        default_dir: Option<&str>,
        selection: Option<&BTreeSet<String>>,
    ) -> Map<String, Value> {
        let mut options = Map::new();
        for (key, value) in &self.extra {
            options.insert(key.clone(), Value::String(value.clone()));
        }

        if let Some(dir) = self.dir.as_deref().or(default_dir) {
            options.insert("dir".to_string(), Value::String(dir.to_string()));
        }
        if let Some(out) = &self.out {
            options.insert("out".to_string(), Value::String(out.clone()));
        }
        if let Some(split) = self.split {
            options.insert("split".to_string(), Value::String(split.to_string()));
        }
        if let Some(max) = self.max_connection_per_server {
            options.insert(
                "max-connection-per-server".to_string(),
                Value::String(max.to_string()),
            );
        }
        if let Some(selection) = selection {
            options.insert(
                "select-file".to_string(),
                Value::String(select_file_value(selection)),
            );
        }
        options
    }
}

/// Comma-separated file indices in ascending numeric order.
pub fn select_file_value(selection: &BTreeSet<String>) -> String {
    let mut indices: Vec<&String> = selection.iter().collect();
    indices.sort_by_key(|index| (index.parse::<u64>().unwrap_or(u64::MAX), index.as_str()));
    indices
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Where a torrent payload comes from.
#[derive(Debug, Clone)]
pub enum TorrentSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl TorrentSource {
    pub async fn load(self) -> Result<Vec<u8>, CommandError> {
        match self {
            TorrentSource::Bytes(bytes) => Ok(bytes),
            TorrentSource::Path(path) => {
                let read = tokio::fs::read(&path).await;
                read.map_err(|e| CommandError::Io {
                    reason: e.to_string(),
                    path,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchAction {
    Pause,
    Resume,
    Stop,
    Remove,
    PurgeResult,
}

struct StoreState {
    /// Tasks from the last applied refresh, before suppression.
    engine_tasks: Vec<DownloadTask>,
    applied_seq: u64,
    suppression: SuppressionSet,
    health: SyncHealth,
    revision: u64,
}

/// Shared, thread-safe store of engine tasks.
pub struct TaskStore {
    engine: Engine,
    options: StoreOptions,
    state: RwLock<StoreState>,
    next_seq: AtomicU64,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    refresh_hint: Notify,
}

impl TaskStore {
    pub fn new(engine: Engine, options: StoreOptions) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::empty()));
        let state = StoreState {
            engine_tasks: Vec::new(),
            applied_seq: 0,
            suppression: SuppressionSet::new(options.suppression_ttl),
            health: SyncHealth::new(options.failure_threshold),
            revision: 0,
        };

        Self {
            engine,
            options,
            state: RwLock::new(state),
            next_seq: AtomicU64::new(1),
            snapshot_tx,
            refresh_hint: Notify::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    // Read side -----------------------------------------------------------

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn task(&self, gid: &str) -> Option<DownloadTask> {
        self.snapshot().get(gid).cloned()
    }

    pub fn health(&self) -> SyncHealth {
        resilient_read(&self.state).health.clone()
    }

    /// Resolves once a command asked for an early refresh.
    pub async fn refresh_requested(&self) {
        self.refresh_hint.notified().await
    }

    // Sync ----------------------------------------------------------------

    /// Fetch all task lists from the engine and publish a new snapshot.
    ///
    /// On failure the previous snapshot stays published.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let fetched = tokio::try_join!(
            self.engine.tell_active(),
            self.engine.tell_waiting(),
            self.engine.tell_stopped(),
        );

        let (active, waiting, stopped) = match fetched {
            Ok(lists) => lists,
            Err(e) => {
                let err = SyncError::from(e);
                let mut state = resilient_write(&self.state);
                if seq <= state.applied_seq {
                    tracing::debug!(
                        seq,
                        applied = state.applied_seq,
                        error = %err,
                        "stale refresh failed"
                    );
                } else {
                    state.health.record_failure(&err);
                }
                return Err(err);
            }
        };

        let tasks = merge_lists(active, waiting, stopped);

        let purge = {
            let mut state = resilient_write(&self.state);
            if seq <= state.applied_seq {
                tracing::debug!(seq, applied = state.applied_seq, "discarding stale refresh");
                return Ok(());
            }
            state.applied_seq = seq;

            let now = Instant::now();
            let purge = state.suppression.reconcile(&tasks, now);
            state.engine_tasks = tasks;
            state.health.record_success();
            self.publish(&mut state, now);
            purge
        };

        for gid in purge {
            match self.engine.remove_download_result(&gid).await {
                Ok(()) => tracing::debug!(gid = %gid, "purged removed download result"),
                Err(e) => {
                    tracing::warn!(gid = %gid, error = %e, "failed to purge download result");
                    resilient_write(&self.state).suppression.purge_failed(&gid);
                }
            }
        }

        Ok(())
    }

    fn publish(&self, state: &mut StoreState, now: Instant) {
        state.revision += 1;
        let tasks: Vec<DownloadTask> = state
            .engine_tasks
            .iter()
            .filter(|t| !state.suppression.is_suppressed(&t.gid, now))
            .cloned()
            .collect();

        tracing::trace!(
            revision = state.revision,
            visible = tasks.len(),
            hidden = state.engine_tasks.len() - tasks.len(),
            "publishing snapshot"
        );

        self.snapshot_tx.send_replace(Arc::new(Snapshot {
            revision: state.revision,
            taken_at: Utc::now(),
            tasks,
        }));
    }

    // Commands ------------------------------------------------------------

    /// Queue one download from one or more mirror URIs.
    pub async fn add_uri(
        &self,
        uris: &[String],
        options: &AddOptions,
    ) -> Result<String, CommandError> {
        let uris: Vec<String> = uris
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
        if uris.is_empty() {
            return Err(CommandError::InvalidInput("no URI given".to_string()));
        }

        let engine_options = options.to_engine_options(self.options.default_dir.as_deref(), None);
        let gid = self.engine.add_uri(&uris, engine_options).await?;
        tracing::info!(gid = %gid, uris = uris.len(), "download added");
        self.refresh_hint.notify_one();
        Ok(gid)
    }

    /// Queue a torrent, optionally downloading only the selected files.
    ///
    /// `None` downloads every file. A given selection must be non-empty and
    /// may only name files present in the torrent.
    pub async fn add_torrent(
        &self,
        source: TorrentSource,
        selection: Option<&BTreeSet<String>>,
        options: &AddOptions,
    ) -> Result<String, CommandError> {
        let payload = source.load().await?;
        let metadata = torrent::resolve(&payload)?;

        if let Some(selection) = selection {
            if selection.is_empty() {
                return Err(CommandError::InvalidInput("no files selected".to_string()));
            }
            if let Some(missing) = selection.iter().find(|index| !metadata.has_file(index)) {
                return Err(CommandError::InvalidInput(format!(
                    "torrent '{}' has no file {}",
                    metadata.name, missing
                )));
            }
        }

        let encoded = STANDARD.encode(&payload);
        let engine_options =
            options.to_engine_options(self.options.default_dir.as_deref(), selection);
        let gid = self.engine.add_torrent(&encoded, engine_options).await?;
        tracing::info!(
            gid = %gid,
            name = %metadata.name,
            info_hash = %metadata.info_hash,
            "torrent added"
        );
        self.refresh_hint.notify_one();
        Ok(gid)
    }

    pub async fn pause(&self, gids: &[String]) -> BatchOutcome {
        self.run_batch(dedupe(gids), |_| BatchAction::Pause).await
    }

    pub async fn resume(&self, gids: &[String]) -> BatchOutcome {
        self.run_batch(dedupe(gids), |_| BatchAction::Resume).await
    }

    /// Force-pause: stop transferring immediately without waiting on peers.
    pub async fn stop(&self, gids: &[String]) -> BatchOutcome {
        self.run_batch(dedupe(gids), |_| BatchAction::Stop).await
    }

    /// Remove tasks. They disappear from snapshots before the engine answers.
    pub async fn remove(&self, gids: &[String]) -> BatchOutcome {
        let gids = dedupe(gids);
        if gids.is_empty() {
            return BatchOutcome::default();
        }

        let already_stopped: HashSet<String> = {
            let mut state = resilient_write(&self.state);
            let now = Instant::now();
            for gid in &gids {
                state.suppression.insert(gid, now);
            }
            let stopped = state
                .engine_tasks
                .iter()
                .filter(|t| t.is_stopped() && gids.contains(&t.gid))
                .map(|t| t.gid.clone())
                .collect();
            self.publish(&mut state, now);
            stopped
        };

        let outcome = self
            .run_batch(gids, |gid| {
                if already_stopped.contains(gid) {
                    BatchAction::PurgeResult
                } else {
                    BatchAction::Remove
                }
            })
            .await;

        let rejected: Vec<&str> = outcome
            .failed()
            .into_iter()
            .filter(|(_, e)| e.is_rejection())
            .map(|(gid, _)| gid)
            .collect();
        if !rejected.is_empty() {
            let mut state = resilient_write(&self.state);
            for gid in &rejected {
                state.suppression.lift(gid);
                tracing::warn!(gid = %gid, "engine refused removal, showing task again");
            }
            self.publish(&mut state, Instant::now());
        }

        outcome
    }

    async fn run_batch(
        &self,
        gids: Vec<String>,
        action_for: impl Fn(&str) -> BatchAction,
    ) -> BatchOutcome {
        let calls = gids.iter().map(|gid| {
            let action = action_for(gid);
            async move { (gid.clone(), self.apply(action, gid).await) }
        });
        let results: BTreeMap<String, Result<(), CommandError>> =
            join_all(calls).await.into_iter().collect();

        let outcome = BatchOutcome { results };
        if !outcome.succeeded().is_empty() {
            self.refresh_hint.notify_one();
        }
        outcome
    }

    async fn apply(&self, action: BatchAction, gid: &str) -> Result<(), CommandError> {
        let result = match action {
            BatchAction::Pause => self.engine.pause(gid).await,
            BatchAction::Resume => self.engine.unpause(gid).await,
            BatchAction::Stop => self.engine.force_pause(gid).await,
            BatchAction::Remove => match self.engine.remove(gid).await {
                // The task may have finished since the last refresh; aria2
                // refuses remove for stopped tasks but purges their result.
                Err(e @ CallError::Rejected { .. }) => {
                    tracing::debug!(gid, error = %e, "remove refused, purging result instead");
                    self.engine.remove_download_result(gid).await.map_err(|_| e)
                }
                other => other,
            },
            BatchAction::PurgeResult => self.engine.remove_download_result(gid).await,
        };

        match result {
            Ok(()) => {
                tracing::debug!(gid, action = ?action, "command applied");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(gid, action = ?action, error = %e, "command failed");
                Err(e.into())
            }
        }
    }
}

/// Concatenate the engine lists, keeping the first occurrence of each gid.
fn merge_lists(
    active: Vec<DownloadTask>,
    waiting: Vec<DownloadTask>,
    stopped: Vec<DownloadTask>,
) -> Vec<DownloadTask> {
    let mut seen = HashSet::new();
    active
        .into_iter()
        .chain(waiting)
        .chain(stopped)
        .filter(|t| seen.insert(t.gid.clone()))
        .collect()
}

fn dedupe(gids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    gids.iter()
        .filter(|g| !g.is_empty() && seen.insert(g.as_str()))
        .cloned()
        .collect()
}
