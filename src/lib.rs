// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! applesword - task synchronization core for an aria2-backed download manager
//!
//! aria2c owns the downloads; applesword keeps a consistent, observable view
//! of them and turns user intent into engine commands:
//!
//! **Engine** -> **Refresh** -> **Snapshot** -> UI / CLI
//!
//! # Core Modules
//!
//! - [`rpc`] - JSON-RPC transport and the aria2 method vocabulary
//! - [`task`] - Task model, status classification and byte formatting
//! - [`store`] - Snapshot publication, batch commands, removal suppression, polling
//! - [`torrent`] - `.torrent` decoding and info hashes
//! - [`confirm`] - File selection before a torrent is committed
//! - [`activation`] - Normalizing magnet/app-scheme links and torrent files
//! - [`config`] - `~/.applesword/config.json`
//! - [`error`] - Error types and diagnostic formatting

pub mod activation;
pub mod config;
pub mod confirm;
pub mod error;
pub mod locks;
pub mod rpc;
pub mod store;
pub mod task;
pub mod torrent;

pub use activation::{Activation, ActivationError};
pub use config::Config;
pub use confirm::{ConfirmError, PendingTorrent, SelectionFlow};
pub use error::{CallError, CommandError, MalformedTorrentError, SyncError, TransportError};
pub use rpc::{Engine, RpcClient, Transport};
pub use store::{
    AddOptions, BatchOutcome, Poller, PollerCommand, Snapshot, StoreOptions, SyncHealth,
    TaskStore, TorrentSource,
};
pub use task::{format_bytes, Bucket, DownloadFile, DownloadTask, TaskStatus};
pub use torrent::{resolve as resolve_torrent, TorrentFileEntry, TorrentMetadata};
