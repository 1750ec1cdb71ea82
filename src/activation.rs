// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Normalization of inbound links and files.
//!
//! The desktop shell forwards whatever the OS hands it: magnet links, app
//! scheme links (`applesword://add?url=...`), plain URLs and `.torrent` files.
//! [`Activation::parse`] turns each into either a URI to queue or a torrent
//! file to confirm.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Url;
use thiserror::Error;

/// Custom URL scheme registered by the app.
pub const APP_SCHEME: &str = "applesword";

const URI_SCHEMES: &[&str] = &["http", "https", "ftp", "sftp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Hand to aria2.addUri.
    Uri(String),
    /// Read, confirm, then hand to aria2.addTorrent.
    TorrentFile(PathBuf),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActivationError {
    #[error("nothing to open")]
    Empty,
    #[error("unsupported link or file: {0}")]
    Unsupported(String),
}

impl Activation {
    pub fn parse(raw: &str) -> Result<Self, ActivationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ActivationError::Empty);
        }

        let scheme = raw
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();

        match scheme.as_str() {
            APP_SCHEME => app_link(raw),
            "magnet" | "thunder" => Ok(Activation::Uri(raw.to_string())),
            "file" => {
                let path = Url::parse(raw)
                    .ok()
                    .and_then(|url| url.to_file_path().ok())
                    .ok_or_else(|| ActivationError::Unsupported(raw.to_string()))?;
                torrent_file(path, raw)
            }
            s if URI_SCHEMES.contains(&s) => match Url::parse(raw) {
                Ok(url) if url.has_host() => Ok(Activation::Uri(raw.to_string())),
                _ => Err(ActivationError::Unsupported(raw.to_string())),
            },
            _ => torrent_file(PathBuf::from(raw), raw),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Activation::Uri(_) => "uri",
            Activation::TorrentFile(_) => "torrent",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Uri(uri) => write!(f, "{}", uri),
            Activation::TorrentFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// `applesword://add?url=<encoded>`, falling back to whatever follows the
/// scheme.
fn app_link(raw: &str) -> Result<Activation, ActivationError> {
    if let Ok(url) = Url::parse(raw) {
        if let Some((_, target)) = url.query_pairs().find(|(key, _)| key == "url") {
            let target = target.trim();
            if target.is_empty() {
                return Err(ActivationError::Empty);
            }
            return Ok(Activation::Uri(target.to_string()));
        }
    }

    let rest = &raw[APP_SCHEME.len() + 1..];
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return Err(ActivationError::Empty);
    }
    Ok(Activation::Uri(rest.to_string()))
}

fn torrent_file(path: PathBuf, raw: &str) -> Result<Activation, ActivationError> {
    if has_torrent_extension(&path) {
        Ok(Activation::TorrentFile(path))
    } else {
        Err(ActivationError::Unsupported(raw.to_string()))
    }
}

fn has_torrent_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("torrent"))
}
