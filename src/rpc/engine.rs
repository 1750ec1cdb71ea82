// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed aria2 method vocabulary on top of a [`Transport`].

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::Transport;
use crate::error::{CallError, TransportError};
use crate::task::{DownloadFile, DownloadTask};

/// aria2 JSON-RPC method names.
pub mod methods {
    pub const ADD_URI: &str = "aria2.addUri";
    pub const ADD_TORRENT: &str = "aria2.addTorrent";
    pub const PAUSE: &str = "aria2.pause";
    pub const FORCE_PAUSE: &str = "aria2.forcePause";
    pub const UNPAUSE: &str = "aria2.unpause";
    pub const REMOVE: &str = "aria2.remove";
    pub const REMOVE_DOWNLOAD_RESULT: &str = "aria2.removeDownloadResult";
    pub const TELL_ACTIVE: &str = "aria2.tellActive";
    pub const TELL_WAITING: &str = "aria2.tellWaiting";
    pub const TELL_STOPPED: &str = "aria2.tellStopped";
    pub const GET_FILES: &str = "aria2.getFiles";
    pub const GET_VERSION: &str = "aria2.getVersion";
}

/// Keys requested from the tell* methods.
pub const STATUS_KEYS: &[&str] = &[
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "uploadSpeed",
    "connections",
    "dir",
    "files",
    "bittorrent",
    "infoHash",
    "errorCode",
    "errorMessage",
];

/// Version information reported by aria2.getVersion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion {
    pub version: String,
    pub enabled_features: Vec<String>,
}

/// Typed access to the engine.
#[derive(Clone)]
pub struct Engine {
    transport: Arc<dyn Transport>,
    page_size: usize,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            page_size: 1000,
        }
    }

    /// Number of entries requested from tellWaiting/tellStopped.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Queue a URI download (HTTP, FTP, magnet...). Returns the new gid.
    pub async fn add_uri(
        &self,
        uris: &[String],
        options: Map<String, Value>,
    ) -> Result<String, CallError> {
        let result = self
            .transport
            .call(methods::ADD_URI, vec![json!(uris), Value::Object(options)])
            .await?;
        expect_gid(methods::ADD_URI, result)
    }

    /// Queue a torrent given its base64-encoded payload. Returns the new gid.
    pub async fn add_torrent(
        &self,
        encoded: &str,
        options: Map<String, Value>,
    ) -> Result<String, CallError> {
        let result = self
            .transport
            .call(
                methods::ADD_TORRENT,
                vec![json!(encoded), json!([]), Value::Object(options)],
            )
            .await?;
        expect_gid(methods::ADD_TORRENT, result)
    }

    pub async fn pause(&self, gid: &str) -> Result<(), CallError> {
        self.gid_call(methods::PAUSE, gid).await
    }

    /// Pause without waiting for trackers or peers to be notified.
    pub async fn force_pause(&self, gid: &str) -> Result<(), CallError> {
        self.gid_call(methods::FORCE_PAUSE, gid).await
    }

    pub async fn unpause(&self, gid: &str) -> Result<(), CallError> {
        self.gid_call(methods::UNPAUSE, gid).await
    }

    pub async fn remove(&self, gid: &str) -> Result<(), CallError> {
        self.gid_call(methods::REMOVE, gid).await
    }

    /// Drop a stopped task from the engine's result list.
    pub async fn remove_download_result(&self, gid: &str) -> Result<(), CallError> {
        self.gid_call(methods::REMOVE_DOWNLOAD_RESULT, gid).await
    }

    pub async fn tell_active(&self) -> Result<Vec<DownloadTask>, CallError> {
        let result = self
            .transport
            .call(methods::TELL_ACTIVE, vec![json!(STATUS_KEYS)])
            .await?;
        decode_tasks(methods::TELL_ACTIVE, result)
    }

    pub async fn tell_waiting(&self) -> Result<Vec<DownloadTask>, CallError> {
        self.paged(methods::TELL_WAITING).await
    }

    pub async fn tell_stopped(&self) -> Result<Vec<DownloadTask>, CallError> {
        self.paged(methods::TELL_STOPPED).await
    }

    pub async fn get_files(&self, gid: &str) -> Result<Vec<DownloadFile>, CallError> {
        let result = self
            .transport
            .call(methods::GET_FILES, vec![json!(gid)])
            .await?;
        let entries = expect_array(methods::GET_FILES, result)?;
        entries
            .iter()
            .map(|entry| DownloadFile::from_engine(entry).map_err(CallError::from))
            .collect()
    }

    pub async fn get_version(&self) -> Result<EngineVersion, CallError> {
        let result = self.transport.call(methods::GET_VERSION, vec![]).await?;
        let version = result
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TransportError::Malformed(format!("{}: missing version", methods::GET_VERSION))
            })?
            .to_string();
        let enabled_features = result
            .get("enabledFeatures")
            .and_then(Value::as_array)
            .map(|features| {
                features
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(EngineVersion {
            version,
            enabled_features,
        })
    }

    /// Fetch a whole list one page at a time. A short page ends the list.
    async fn paged(&self, method: &str) -> Result<Vec<DownloadTask>, CallError> {
        let mut tasks = Vec::new();
        let mut offset = 0;
        loop {
            let result = self
                .transport
                .call(
                    method,
                    vec![json!(offset), json!(self.page_size), json!(STATUS_KEYS)],
                )
                .await?;
            let page = decode_tasks(method, result)?;
            let done = page.len() < self.page_size;
            tasks.extend(page);
            if done {
                return Ok(tasks);
            }
            offset += self.page_size;
        }
    }

    async fn gid_call(&self, method: &str, gid: &str) -> Result<(), CallError> {
        self.transport.call(method, vec![json!(gid)]).await?;
        Ok(())
    }
}

fn expect_gid(method: &str, result: Value) -> Result<String, CallError> {
    match result {
        Value::String(gid) if !gid.is_empty() => Ok(gid),
        other => Err(TransportError::Malformed(format!(
            "{}: expected a gid, got {}",
            method, other
        ))
        .into()),
    }
}

fn expect_array(method: &str, result: Value) -> Result<Vec<Value>, CallError> {
    match result {
        Value::Array(entries) => Ok(entries),
        other => Err(TransportError::Malformed(format!(
            "{}: expected an array, got {}",
            method, other
        ))
        .into()),
    }
}

fn decode_tasks(method: &str, result: Value) -> Result<Vec<DownloadTask>, CallError> {
    expect_array(method, result)?
        .iter()
        .map(|entry| {
            DownloadTask::from_engine(entry).map_err(|e| {
                CallError::from(TransportError::Malformed(format!("{}: {}", method, e)))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records calls and answers every one with the same value.
    struct Fixed {
        reply: Value,
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl Fixed {
        fn new(reply: Value) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Fixed {
        async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CallError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_paged_calls_send_offset_and_page_size() {
        let transport = Fixed::new(json!([]));
        let engine = Engine::new(transport.clone()).with_page_size(50);

        engine.tell_waiting().await.unwrap();
        engine.tell_stopped().await.unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].0, methods::TELL_WAITING);
        assert_eq!(calls[0].1[0], json!(0));
        assert_eq!(calls[0].1[1], json!(50));
        assert_eq!(calls[1].0, methods::TELL_STOPPED);
    }

    #[tokio::test]
    async fn test_add_torrent_params() {
        let transport = Fixed::new(json!("abc123"));
        let engine = Engine::new(transport.clone());
        let mut options = Map::new();
        options.insert("select-file".to_string(), json!("2"));

        let gid = engine.add_torrent("ZDQ6aW5mb2Vl", options).await.unwrap();
        assert_eq!(gid, "abc123");

        let calls = transport.calls.lock().unwrap();
        assert_eq!(
            calls[0].1,
            vec![json!("ZDQ6aW5mb2Vl"), json!([]), json!({"select-file": "2"})]
        );
    }

    #[tokio::test]
    async fn test_non_string_gid_is_malformed() {
        let engine = Engine::new(Fixed::new(json!(42)));
        let err = engine.add_uri(&["https://a/b".to_string()], Map::new()).await.unwrap_err();
        assert!(matches!(err, CallError::Transport(TransportError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_bad_task_entry_fails_whole_list() {
        let engine = Engine::new(Fixed::new(json!([
            { "gid": "a", "status": "active" },
            { "status": "active" }
        ])));
        assert!(engine.tell_active().await.is_err());
    }

    #[tokio::test]
    async fn test_get_files() {
        let transport = Fixed::new(json!([{
            "index": "2",
            "path": "/downloads/pack/b.bin",
            "length": "2048",
            "completedLength": "512",
            "selected": "false",
            "uris": []
        }]));
        let engine = Engine::new(transport.clone());

        let files = engine.get_files("2089b05ecca3d829").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].index, "2");
        assert_eq!(files[0].length, 2048);
        assert_eq!(files[0].completed_length, 512);
        assert!(!files[0].selected);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].0, methods::GET_FILES);
        assert_eq!(calls[0].1, vec![json!("2089b05ecca3d829")]);
    }

    #[tokio::test]
    async fn test_get_version() {
        let engine = Engine::new(Fixed::new(json!({
            "version": "1.37.0",
            "enabledFeatures": ["BitTorrent", "Metalink"]
        })));
        let version = engine.get_version().await.unwrap();
        assert_eq!(version.version, "1.37.0");
        assert_eq!(version.enabled_features, vec!["BitTorrent", "Metalink"]);
    }
}
