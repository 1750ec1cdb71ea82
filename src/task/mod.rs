// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download task model and status classification.
//!
//! aria2 reports every task as a JSON object whose numeric fields are
//! decimal strings. [`DownloadTask::from_engine`] decodes that shape into a
//! typed task; anything structurally wrong is a malformed response, while an
//! unknown status string is tolerated and classified as [`TaskStatus::Error`].

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Lifecycle state of a task as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Waiting,
    Paused,
    Complete,
    Error,
    Removed,
}

impl TaskStatus {
    /// Map an engine status string onto the closed set of states.
    ///
    /// Unknown values are logged and classified as `Error`.
    pub fn classify(raw: &str) -> Self {
        match raw {
            "active" => TaskStatus::Active,
            "waiting" => TaskStatus::Waiting,
            "paused" => TaskStatus::Paused,
            "complete" => TaskStatus::Complete,
            "error" => TaskStatus::Error,
            "removed" => TaskStatus::Removed,
            other => {
                tracing::warn!(status = other, "unknown engine task status, treating as error");
                TaskStatus::Error
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Paused => "paused",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
            TaskStatus::Removed => "removed",
        }
    }

    /// Tasks the engine keeps in its stopped list.
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Removed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Views of the task list offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bucket {
    #[default]
    All,
    Downloading,
    Waiting,
    Stopped,
    Completed,
}

impl Bucket {
    pub fn matches(&self, status: TaskStatus) -> bool {
        match self {
            Bucket::All => true,
            Bucket::Downloading => status == TaskStatus::Active,
            Bucket::Waiting => status == TaskStatus::Waiting,
            Bucket::Stopped => status == TaskStatus::Paused,
            Bucket::Completed => matches!(status, TaskStatus::Complete | TaskStatus::Error),
        }
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Bucket::All),
            "downloading" | "active" => Ok(Bucket::Downloading),
            "waiting" => Ok(Bucket::Waiting),
            "stopped" | "paused" => Ok(Bucket::Stopped),
            "completed" | "complete" => Ok(Bucket::Completed),
            other => Err(format!(
                "unknown bucket '{}' (expected all, downloading, waiting, stopped, completed)",
                other
            )),
        }
    }
}

/// One file of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadFile {
    /// 1-based index, unique within the task.
    pub index: String,
    pub path: String,
    pub length: u64,
    pub completed_length: u64,
    pub selected: bool,
    pub uris: Vec<String>,
}

/// Torrent metadata attached to BitTorrent tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct BittorrentInfo {
    pub name: Option<String>,
    pub announce_list: Vec<Vec<String>>,
    pub info_hash: Option<String>,
}

/// One tracked download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTask {
    pub gid: String,
    pub status: TaskStatus,
    pub total_length: u64,
    pub completed_length: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub connections: u64,
    pub dir: String,
    pub files: Vec<DownloadFile>,
    pub bittorrent: Option<BittorrentInfo>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl DownloadTask {
    /// Decode one entry of a tellActive/tellWaiting/tellStopped result.
    pub fn from_engine(value: &Value) -> Result<Self, TransportError> {
        let wire: WireTask = serde_json::from_value(value.clone())
            .map_err(|e| TransportError::Malformed(format!("task entry: {}", e)))?;
        Ok(wire.into_task())
    }

    /// Torrent name, else the file name of the first file, else its first URI.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.bittorrent.as_ref().and_then(|bt| bt.name.as_deref()) {
            return name.to_string();
        }
        if let Some(file) = self.files.first() {
            if let Some(name) = file.path.rsplit('/').next().filter(|n| !n.is_empty()) {
                return name.to_string();
            }
            if let Some(uri) = file.uris.first() {
                return uri.clone();
            }
        }
        "unknown".to_string()
    }

    /// Fraction downloaded, 0.0 until the total length is known.
    pub fn progress(&self) -> f64 {
        if self.total_length == 0 {
            0.0
        } else {
            self.completed_length as f64 / self.total_length as f64
        }
    }

    pub fn is_torrent(&self) -> bool {
        self.bittorrent.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.status.is_stopped()
    }
}

/// Format a byte count with binary units and one decimal place.
///
/// ```
/// use applesword::task::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

// Wire format --------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTask {
    gid: String,
    #[serde(default)]
    status: String,
    #[serde(default, deserialize_with = "de_u64")]
    total_length: u64,
    #[serde(default, deserialize_with = "de_u64")]
    completed_length: u64,
    #[serde(default, deserialize_with = "de_u64")]
    download_speed: u64,
    #[serde(default, deserialize_with = "de_u64")]
    upload_speed: u64,
    #[serde(default, deserialize_with = "de_u64")]
    connections: u64,
    #[serde(default)]
    dir: String,
    #[serde(default)]
    files: Vec<WireFile>,
    #[serde(default)]
    bittorrent: Option<WireBittorrent>,
    #[serde(default)]
    info_hash: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    index: String,
    #[serde(default)]
    path: String,
    #[serde(default, deserialize_with = "de_u64")]
    length: u64,
    #[serde(default, deserialize_with = "de_u64")]
    completed_length: u64,
    #[serde(default = "selected_by_default", deserialize_with = "de_bool")]
    selected: bool,
    #[serde(default)]
    uris: Vec<WireUri>,
}

#[derive(Debug, Deserialize)]
struct WireUri {
    uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBittorrent {
    #[serde(default)]
    announce_list: Vec<Vec<String>>,
    #[serde(default)]
    info: Option<WireTorrentInfo>,
}

#[derive(Debug, Deserialize)]
struct WireTorrentInfo {
    #[serde(default)]
    name: Option<String>,
}

impl WireTask {
    fn into_task(self) -> DownloadTask {
        let status = TaskStatus::classify(&self.status);

        // Lengths are sampled independently by the engine; never publish
        // more completed bytes than the known total.
        let completed_length = if self.total_length > 0 {
            self.completed_length.min(self.total_length)
        } else {
            self.completed_length
        };

        let info_hash = self.info_hash;
        let bittorrent = self.bittorrent.map(|bt| BittorrentInfo {
            name: bt.info.and_then(|info| info.name),
            announce_list: bt.announce_list,
            info_hash: info_hash.clone(),
        });

        DownloadTask {
            gid: self.gid,
            status,
            total_length: self.total_length,
            completed_length,
            download_speed: self.download_speed,
            upload_speed: self.upload_speed,
            connections: self.connections,
            dir: self.dir,
            files: self.files.into_iter().map(WireFile::into_file).collect(),
            bittorrent,
            error_code: self.error_code.filter(|code| code != "0"),
            error_message: self.error_message.filter(|m| !m.is_empty()),
        }
    }
}

impl WireFile {
    pub(crate) fn into_file(self) -> DownloadFile {
        let completed_length = if self.length > 0 {
            self.completed_length.min(self.length)
        } else {
            self.completed_length
        };
        DownloadFile {
            index: self.index,
            path: self.path,
            length: self.length,
            completed_length,
            selected: self.selected,
            uris: self.uris.into_iter().map(|u| u.uri).collect(),
        }
    }
}

impl DownloadFile {
    /// Decode one entry of an aria2.getFiles result.
    pub fn from_engine(value: &Value) -> Result<Self, TransportError> {
        let wire: WireFile = serde_json::from_value(value.clone())
            .map_err(|e| TransportError::Malformed(format!("file entry: {}", e)))?;
        Ok(wire.into_file())
    }
}

fn selected_by_default() -> bool {
    true
}

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("expected a non-negative integer, got {:?}", s))),
    }
}

fn de_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Flag(bool),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Flag(b) => Ok(b),
        Raw::Text(s) => Ok(s.eq_ignore_ascii_case("true")),
    }
}
