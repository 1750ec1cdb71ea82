// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Torrent confirmation: inspect a torrent, choose files, then commit.
//!
//! Nothing reaches the engine until [`SelectionFlow::commit`]. A torrent that
//! fails to decode never enters the flow, and an engine failure on commit
//! leaves the pending torrent in place so the user can retry.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::error::{CommandError, MalformedTorrentError};
use crate::store::{AddOptions, TaskStore, TorrentSource};
use crate::torrent::{self, TorrentMetadata};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfirmError {
    #[error("torrent '{name}' is already awaiting confirmation")]
    AlreadyPending { name: String },
    #[error("no torrent is awaiting confirmation")]
    NothingPending,
    #[error("select at least one file")]
    NothingSelected,
    #[error("torrent has no file {0}")]
    UnknownFile(String),
    #[error(transparent)]
    Malformed(#[from] MalformedTorrentError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// A decoded torrent awaiting the user's decision.
#[derive(Debug, Clone)]
pub struct PendingTorrent {
    metadata: TorrentMetadata,
    payload: Vec<u8>,
    selected: BTreeSet<String>,
    dir: Option<String>,
}

impl PendingTorrent {
    fn new(metadata: TorrentMetadata, payload: Vec<u8>, dir: Option<String>) -> Self {
        let selected = metadata.files.iter().map(|f| f.index.clone()).collect();
        Self {
            metadata,
            payload,
            selected,
            dir,
        }
    }

    pub fn metadata(&self) -> &TorrentMetadata {
        &self.metadata
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    pub fn dir(&self) -> Option<&str> {
        self.dir.as_deref()
    }

    pub fn is_selected(&self, index: &str) -> bool {
        self.selected.contains(index)
    }

    pub fn select(&mut self, index: &str) -> Result<(), ConfirmError> {
        self.check(index)?;
        self.selected.insert(index.to_string());
        Ok(())
    }

    pub fn deselect(&mut self, index: &str) -> Result<(), ConfirmError> {
        self.check(index)?;
        self.selected.remove(index);
        Ok(())
    }

    /// Flip one file. Returns whether it is now selected.
    pub fn toggle(&mut self, index: &str) -> Result<bool, ConfirmError> {
        self.check(index)?;
        if self.selected.remove(index) {
            Ok(false)
        } else {
            self.selected.insert(index.to_string());
            Ok(true)
        }
    }

    pub fn select_all(&mut self) {
        self.selected = self.metadata.files.iter().map(|f| f.index.clone()).collect();
    }

    pub fn select_none(&mut self) {
        self.selected.clear();
    }

    /// Choose the destination directory. `None` uses the store default.
    pub fn set_dir(&mut self, dir: Option<String>) {
        self.dir = dir.filter(|d| !d.trim().is_empty());
    }

    pub fn selected_length(&self) -> u64 {
        self.metadata.length_of(&self.selected)
    }

    pub fn all_selected(&self) -> bool {
        self.selected.len() == self.metadata.files.len()
    }

    fn check(&self, index: &str) -> Result<(), ConfirmError> {
        if self.metadata.has_file(index) {
            Ok(())
        } else {
            Err(ConfirmError::UnknownFile(index.to_string()))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum ConfirmState {
    #[default]
    Idle,
    AwaitingConfirmation(PendingTorrent),
}

#[derive(Debug, Default)]
pub struct SelectionFlow {
    state: ConfirmState,
}

impl SelectionFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConfirmState {
        &self.state
    }

    pub fn pending(&self) -> Option<&PendingTorrent> {
        match &self.state {
            ConfirmState::AwaitingConfirmation(pending) => Some(pending),
            ConfirmState::Idle => None,
        }
    }

    pub fn pending_mut(&mut self) -> Option<&mut PendingTorrent> {
        match &mut self.state {
            ConfirmState::AwaitingConfirmation(pending) => Some(pending),
            ConfirmState::Idle => None,
        }
    }

    /// Decode `payload` and wait for confirmation with every file selected.
    pub fn begin(
        &mut self,
        payload: Vec<u8>,
        default_dir: Option<String>,
    ) -> Result<&mut PendingTorrent, ConfirmError> {
        if let ConfirmState::AwaitingConfirmation(pending) = &self.state {
            return Err(ConfirmError::AlreadyPending {
                name: pending.metadata.name.clone(),
            });
        }

        let metadata = torrent::resolve(&payload)?;
        tracing::debug!(
            name = %metadata.name,
            files = metadata.files.len(),
            "torrent awaiting confirmation"
        );
        self.state =
            ConfirmState::AwaitingConfirmation(PendingTorrent::new(metadata, payload, default_dir));

        self.pending_mut().ok_or(ConfirmError::NothingPending)
    }

    /// Hand the pending torrent to the engine. Returns the new gid.
    pub async fn commit(&mut self, store: &TaskStore) -> Result<String, ConfirmError> {
        let pending = self.pending().ok_or(ConfirmError::NothingPending)?;
        if pending.selected.is_empty() {
            return Err(ConfirmError::NothingSelected);
        }

        let selection = (!pending.all_selected()).then(|| pending.selected.clone());
        let options = AddOptions {
            dir: pending.dir.clone(),
            ..AddOptions::default()
        };

        let gid = store
            .add_torrent(
                TorrentSource::Bytes(pending.payload.clone()),
                selection.as_ref(),
                &options,
            )
            .await?;

        self.state = ConfirmState::Idle;
        Ok(gid)
    }

    /// Drop the pending torrent without contacting the engine.
    pub fn cancel(&mut self) -> Option<PendingTorrent> {
        match std::mem::take(&mut self.state) {
            ConfirmState::AwaitingConfirmation(pending) => {
                tracing::debug!(name = %pending.metadata.name, "torrent confirmation cancelled");
                Some(pending)
            }
            ConfirmState::Idle => None,
        }
    }
}
