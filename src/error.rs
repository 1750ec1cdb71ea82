// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy and diagnostic formatting for applesword.
//!
//! The library reports failures through small typed enums so callers can
//! tell an unreachable engine apart from a command the engine refused:
//!
//! - [`TransportError`] - the engine could not be reached or answered garbage
//! - [`CallError`] - result of a single RPC call (transport failure or rejection)
//! - [`CommandError`] - a user command (add/pause/remove...) failed
//! - [`MalformedTorrentError`] - local torrent parse failure, never sent to the engine
//! - [`SyncError`] - a full refresh failed; the previous snapshot is kept
//!
//! The formatting helpers at the bottom build the multi-line messages the
//! CLI prints when the engine stays unreachable.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The engine is unreachable or misbehaving.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset... usually the engine is not running.
    #[error("cannot connect to engine at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    /// The call did not complete within the configured timeout.
    #[error("{method} timed out after {}s", .timeout.as_secs())]
    Timeout { method: String, timeout: Duration },
    /// Non-success HTTP status without a JSON-RPC error body.
    #[error("engine answered HTTP {status}")]
    Http { status: u16 },
    /// The response could not be decoded.
    #[error("malformed engine response: {0}")]
    Malformed(String),
}

/// Outcome of a failed RPC call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The engine returned a JSON-RPC error object.
    #[error("{method} rejected by engine (code {code}): {message}")]
    Rejected {
        method: String,
        code: i64,
        message: String,
    },
}

/// Local torrent decoding failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed torrent: {reason}")]
pub struct MalformedTorrentError {
    pub reason: String,
}

impl MalformedTorrentError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A user command could not be carried out.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The engine refused the command, e.g. unknown gid or invalid option.
    #[error("engine rejected the command (code {code}): {message}")]
    Rejected { code: i64, message: String },
    /// Rejected locally before anything was sent.
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    MalformedTorrent(#[from] MalformedTorrentError),
    #[error("cannot read {}: {reason}", .path.display())]
    Io { path: PathBuf, reason: String },
}

impl CommandError {
    /// True when the engine itself answered "no".
    pub fn is_rejection(&self) -> bool {
        matches!(self, CommandError::Rejected { .. })
    }
}

impl From<CallError> for CommandError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Transport(e) => CommandError::Transport(e),
            CallError::Rejected { code, message, .. } => CommandError::Rejected { code, message },
        }
    }
}

/// A full refresh failed. The last good snapshot stays published.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("refresh failed: {0}")]
    Transport(#[from] TransportError),
    #[error("refresh rejected by engine (code {code}): {message}")]
    Rejected { code: i64, message: String },
}

impl From<CallError> for SyncError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Transport(e) => SyncError::Transport(e),
            CallError::Rejected { code, message, .. } => SyncError::Rejected { code, message },
        }
    }
}

/// Formats an error message with title, causes and fixes.
///
/// ```
/// use applesword::error::format_error;
///
/// let message = format_error(
///     "Failed to reach the download engine",
///     &["aria2c is not running"],
///     &["Start it: aria2c --enable-rpc"],
/// );
/// assert!(message.contains("Possible causes:"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n", title);

    if !causes.is_empty() {
        output.push_str("\nPossible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
    }

    if !fixes.is_empty() {
        output.push_str("\nTry these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
    }

    output
}

/// Builder for constructing formatted error messages.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

/// Diagnostic shown when refreshes keep failing.
pub fn engine_unreachable(endpoint: &str, err: &SyncError) -> ErrorBuilder {
    let builder = ErrorBuilder::new(format!("Failed to reach the download engine at {}", endpoint))
        .cause(err.to_string());

    match err {
        SyncError::Transport(TransportError::Connect { .. }) => builder
            .cause("aria2c is not running or RPC is disabled")
            .fix("Start the engine: aria2c --enable-rpc --rpc-listen-all=false")
            .fix("Check the endpoint: applesword config show"),
        SyncError::Transport(TransportError::Timeout { .. }) => builder
            .cause("the engine is overloaded or hung")
            .fix("Restart aria2c")
            .fix("Raise rpc_timeout_secs: applesword config set rpc_timeout_secs 20"),
        SyncError::Rejected { .. } => builder
            .cause("the RPC secret does not match --rpc-secret of aria2c")
            .fix("Set the secret: applesword config set rpc_secret <token>"),
        _ => builder.fix("Check the endpoint: applesword config show"),
    }
}
