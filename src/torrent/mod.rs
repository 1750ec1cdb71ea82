// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Torrent metadata resolution.
//!
//! Decodes a `.torrent` payload into its name, info hash and file list so the
//! user can pick files before anything reaches the engine. Decoding is strict:
//! either the whole document is valid or a [`MalformedTorrentError`] comes
//! back, never partial metadata.

pub mod bencode;

use std::collections::BTreeSet;

use sha1::{Digest, Sha1};

use crate::error::MalformedTorrentError;
use bencode::Value;

/// One file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFileEntry {
    /// 1-based index, the numbering aria2's `select-file` uses.
    pub index: String,
    /// Path relative to the download directory, `/`-separated and rooted at
    /// the torrent name for multi-file torrents.
    pub path: String,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMetadata {
    pub name: String,
    /// Lowercase hex SHA-1 of the raw `info` dictionary.
    pub info_hash: String,
    pub announce_list: Vec<Vec<String>>,
    pub files: Vec<TorrentFileEntry>,
    pub total_length: u64,
    pub comment: Option<String>,
    pub private: bool,
}

impl TorrentMetadata {
    pub fn file(&self, index: &str) -> Option<&TorrentFileEntry> {
        self.files.iter().find(|f| f.index == index)
    }

    pub fn has_file(&self, index: &str) -> bool {
        self.file(index).is_some()
    }

    /// Combined length of the selected files. Unknown indices count as zero.
    pub fn length_of(&self, selection: &BTreeSet<String>) -> u64 {
        self.files
            .iter()
            .filter(|f| selection.contains(&f.index))
            .map(|f| f.length)
            .sum()
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1 || self.files.first().map_or(false, |f| f.path != self.name)
    }
}

/// Decode torrent metadata from raw `.torrent` bytes.
pub fn resolve(bytes: &[u8]) -> Result<TorrentMetadata, MalformedTorrentError> {
    let document =
        bencode::parse(bytes).map_err(|e| MalformedTorrentError::new(e.to_string()))?;

    if document.root.as_dict().is_none() {
        return Err(MalformedTorrentError::new("root is not a dictionary"));
    }
    let info = document
        .root
        .get(b"info")
        .ok_or_else(|| MalformedTorrentError::new("missing info dictionary"))?;
    if info.as_dict().is_none() {
        return Err(MalformedTorrentError::new("info is not a dictionary"));
    }
    let span = document
        .span_of(b"info")
        .ok_or_else(|| MalformedTorrentError::new("missing info dictionary"))?;
    let info_hash = hex::encode(Sha1::digest(&bytes[span]));

    let name = text_field(info, b"name.utf-8")
        .or_else(|| text_field(info, b"name"))
        .ok_or_else(|| MalformedTorrentError::new("missing name"))?;
    check_component(&name)?;

    let files = match info.get(b"files") {
        Some(list) => multi_file(&name, list)?,
        None => {
            let length = length_field(info, "length")?;
            vec![TorrentFileEntry {
                index: "1".to_string(),
                path: name.clone(),
                length,
            }]
        }
    };
    let total_length = files.iter().map(|f| f.length).sum();

    Ok(TorrentMetadata {
        name,
        info_hash,
        announce_list: announce_list(&document.root),
        files,
        total_length,
        comment: text_field(&document.root, b"comment.utf-8")
            .or_else(|| text_field(&document.root, b"comment")),
        private: info.get(b"private").and_then(Value::as_int) == Some(1),
    })
}

fn multi_file(name: &str, list: &Value) -> Result<Vec<TorrentFileEntry>, MalformedTorrentError> {
    let entries = list
        .as_list()
        .ok_or_else(|| MalformedTorrentError::new("files is not a list"))?;
    if entries.is_empty() {
        return Err(MalformedTorrentError::new("files list is empty"));
    }

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            if entry.as_dict().is_none() {
                return Err(MalformedTorrentError::new(format!(
                    "file entry {} is not a dictionary",
                    i + 1
                )));
            }
            let length = length_field(entry, "length")?;
            let components = entry
                .get(b"path.utf-8")
                .or_else(|| entry.get(b"path"))
                .and_then(Value::as_list)
                .ok_or_else(|| {
                    MalformedTorrentError::new(format!("file entry {} has no path", i + 1))
                })?;
            if components.is_empty() {
                return Err(MalformedTorrentError::new(format!(
                    "file entry {} has an empty path",
                    i + 1
                )));
            }

            let mut path = name.to_string();
            for component in components {
                let component = component.as_text().ok_or_else(|| {
                    MalformedTorrentError::new(format!(
                        "file entry {} has a non-string path component",
                        i + 1
                    ))
                })?;
                check_component(&component)?;
                path.push('/');
                path.push_str(&component);
            }

            Ok(TorrentFileEntry {
                index: (i + 1).to_string(),
                path,
                length,
            })
        })
        .collect()
}

fn text_field(dict: &Value, key: &[u8]) -> Option<String> {
    dict.get(key).and_then(Value::as_text)
}

fn length_field(dict: &Value, key: &str) -> Result<u64, MalformedTorrentError> {
    let raw = dict
        .get(key.as_bytes())
        .ok_or_else(|| MalformedTorrentError::new(format!("missing {}", key)))?
        .as_int()
        .ok_or_else(|| MalformedTorrentError::new(format!("{} is not an integer", key)))?;
    u64::try_from(raw).map_err(|_| MalformedTorrentError::new(format!("negative {}", key)))
}

fn check_component(component: &str) -> Result<(), MalformedTorrentError> {
    if component.is_empty() {
        return Err(MalformedTorrentError::new("empty path component"));
    }
    if component == ".." || component == "." || component.contains('/') {
        return Err(MalformedTorrentError::new(format!(
            "unsafe path component {:?}",
            component
        )));
    }
    Ok(())
}

fn announce_list(root: &Value) -> Vec<Vec<String>> {
    let tiers: Vec<Vec<String>> = root
        .get(b"announce-list")
        .and_then(Value::as_list)
        .map(|tiers| {
            tiers
                .iter()
                .filter_map(Value::as_list)
                .map(|tier| tier.iter().filter_map(Value::as_text).collect::<Vec<_>>())
                .filter(|tier| !tier.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if !tiers.is_empty() {
        return tiers;
    }
    root.get(b"announce")
        .and_then(Value::as_text)
        .map(|url| vec![vec![url]])
        .unwrap_or_default()
}
