// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration stored at `~/.applesword/config.json`.
//!
//! Missing files and missing keys fall back to defaults, so an empty JSON
//! object is a valid config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Default aria2 JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "http://localhost:6800/jsonrpc";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// JSON-RPC endpoint of the engine.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Value of aria2c's `--rpc-secret`, if set.
    #[serde(default)]
    pub rpc_secret: Option<String>,
    /// Per-call timeout. Zero is treated as one second.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Interval between background refreshes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a removed task stays hidden while the engine still lists it.
    #[serde(default = "default_removal_suppression_secs")]
    pub removal_suppression_secs: u64,
    /// Consecutive refresh failures before the engine is reported unreachable.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Number of entries requested from tellWaiting/tellStopped.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Destination directory for new tasks; engine default when unset.
    #[serde(default)]
    pub download_dir: Option<String>,
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.to_string()
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_removal_suppression_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_page_size() -> usize {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            rpc_secret: None,
            rpc_timeout_secs: default_rpc_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            removal_suppression_secs: default_removal_suppression_secs(),
            failure_threshold: default_failure_threshold(),
            page_size: default_page_size(),
            download_dir: None,
        }
    }
}

impl Config {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(crate::store::poller::MIN_INTERVAL)
    }

    pub fn suppression_ttl(&self) -> Duration {
        Duration::from_secs(self.removal_suppression_secs)
    }

    /// Update a single key from its string form, as given on the command line.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |value: &str| {
            let value = value.trim();
            (!value.is_empty() && value != "none").then(|| value.to_string())
        };

        match key {
            "rpc_url" => self.rpc_url = value.trim().to_string(),
            "rpc_secret" => self.rpc_secret = optional(value),
            "download_dir" => self.download_dir = optional(value),
            "rpc_timeout_secs" => self.rpc_timeout_secs = parse_number(key, value)?,
            "poll_interval_ms" => self.poll_interval_ms = parse_number(key, value)?,
            "removal_suppression_secs" => {
                self.removal_suppression_secs = parse_number(key, value)?
            }
            "failure_threshold" => self.failure_threshold = parse_number(key, value)?,
            "page_size" => self.page_size = parse_number(key, value)?,
            other => bail!("Unknown config key '{}'", other),
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .ok()
        .with_context(|| format!("'{}' expects a number, got '{}'", key, value))
}

/// Directory holding applesword's files, created on demand.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let dir = home.join(".applesword");
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {:?}", dir))?;
    }
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(config, &config_path()?)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
