// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scripted in-memory engine shared by the integration tests.
//!
//! Task lists are set by the test and never change on their own: commands are
//! recorded and acknowledged, but their effects only show up when the test
//! scripts them. Any gid not present in a list is unknown and rejected, like
//! aria2 does.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use applesword::error::{CallError, TransportError};
use applesword::rpc::{methods, Engine, Transport};
use applesword::store::{StoreOptions, TaskStore};
use applesword::torrent::bencode::{encode, Value as Bencode};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

/// A call paused inside the mock until the test releases it.
pub struct Hold {
    /// Notified once the held call has arrived (its response is already fixed).
    pub arrived: Arc<Notify>,
    /// Notify to let the held call return.
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct MockState {
    active: Vec<Value>,
    waiting: Vec<Value>,
    stopped: Vec<Value>,
    calls: Vec<(String, Vec<Value>)>,
    offline: bool,
    rejecting: HashSet<String>,
    failing_methods: HashSet<String>,
    holds: Vec<(String, Arc<Notify>, Arc<Notify>)>,
    next_gid: u64,
}

#[derive(Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_active(&self, tasks: Vec<Value>) {
        self.state.lock().unwrap().active = tasks;
    }

    pub fn set_waiting(&self, tasks: Vec<Value>) {
        self.state.lock().unwrap().waiting = tasks;
    }

    pub fn set_stopped(&self, tasks: Vec<Value>) {
        self.state.lock().unwrap().stopped = tasks;
    }

    /// Every call fails with a connection error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Commands naming `gid` are rejected even though the gid is listed.
    pub fn reject_gid(&self, gid: &str) {
        self.state.lock().unwrap().rejecting.insert(gid.to_string());
    }

    /// Calls to `method` fail with a timeout.
    pub fn fail_method(&self, method: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_methods
            .insert(method.to_string());
    }

    pub fn heal_method(&self, method: &str) {
        self.state.lock().unwrap().failing_methods.remove(method);
    }

    /// Hold the next call to `method` after its response has been computed.
    pub fn hold_next(&self, method: &str) -> Hold {
        let arrived = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.state.lock().unwrap().holds.push((
            method.to_string(),
            Arc::clone(&arrived),
            Arc::clone(&release),
        ));
        Hold { arrived, release }
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params)
            .collect()
    }

    /// Calls other than the tell* refresh queries.
    pub fn commands(&self) -> Vec<(String, Vec<Value>)> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| !m.starts_with("aria2.tell"))
            .collect()
    }

    fn respond(state: &mut MockState, method: &str, params: &[Value]) -> Result<Value, CallError> {
        if state.offline {
            return Err(TransportError::Connect {
                endpoint: "mock".to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        if state.failing_methods.contains(method) {
            return Err(TransportError::Timeout {
                method: method.to_string(),
                timeout: Duration::from_secs(10),
            }
            .into());
        }

        match method {
            methods::TELL_ACTIVE => Ok(Value::Array(state.active.clone())),
            methods::TELL_WAITING => Ok(page(&state.waiting, params)),
            methods::TELL_STOPPED => Ok(page(&state.stopped, params)),
            methods::ADD_URI | methods::ADD_TORRENT => {
                state.next_gid += 1;
                Ok(json!(format!("{:016x}", state.next_gid)))
            }
            methods::GET_VERSION => Ok(json!({
                "version": "1.37.0",
                "enabledFeatures": ["BitTorrent", "Metalink"]
            })),
            _ => {
                let gid = params.first().and_then(Value::as_str).unwrap_or_default();
                let in_stopped = state.stopped.iter().any(|t| t["gid"] == gid);
                let known = match method {
                    // aria2 only removes running tasks and only purges stopped ones.
                    methods::REMOVE => !in_stopped && Self::lists(state, gid),
                    methods::REMOVE_DOWNLOAD_RESULT => in_stopped,
                    _ => Self::lists(state, gid),
                };
                if known && !state.rejecting.contains(gid) {
                    Ok(json!("OK"))
                } else {
                    Err(CallError::Rejected {
                        method: method.to_string(),
                        code: 1,
                        message: format!("GID {} is not found", gid),
                    })
                }
            }
        }
    }
}

impl MockEngine {
    fn lists(state: &MockState, gid: &str) -> bool {
        state
            .active
            .iter()
            .chain(&state.waiting)
            .chain(&state.stopped)
            .any(|t| t["gid"] == gid)
    }
}

/// Slice a tellWaiting/tellStopped list by its `offset` and `num` params.
fn page(list: &[Value], params: &[Value]) -> Value {
    let offset = params.first().and_then(Value::as_u64).unwrap_or(0) as usize;
    let num = params.get(1).and_then(Value::as_u64).unwrap_or(u64::MAX) as usize;
    Value::Array(list.iter().skip(offset).take(num).cloned().collect())
}

#[async_trait]
impl Transport for MockEngine {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CallError> {
        let (response, hold) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((method.to_string(), params.clone()));
            let response = Self::respond(&mut state, method, &params);
            let hold = state
                .holds
                .iter()
                .position(|(m, _, _)| m == method)
                .map(|i| state.holds.remove(i));
            (response, hold)
        };

        if let Some((_, arrived, release)) = hold {
            arrived.notify_one();
            release.notified().await;
        }
        response
    }
}

pub fn task(gid: &str, status: &str) -> Value {
    json!({
        "gid": gid,
        "status": status,
        "totalLength": "1000",
        "completedLength": "0",
        "downloadSpeed": "0",
        "uploadSpeed": "0",
        "connections": "0",
        "dir": "/downloads",
        "files": [{
            "index": "1",
            "path": format!("/downloads/{}.bin", gid),
            "length": "1000",
            "completedLength": "0",
            "selected": "true",
            "uris": []
        }]
    })
}

pub fn task_with_progress(gid: &str, status: &str, total: u64, completed: u64) -> Value {
    let mut value = task(gid, status);
    value["totalLength"] = json!(total.to_string());
    value["completedLength"] = json!(completed.to_string());
    value
}

pub fn store_for(mock: &Arc<MockEngine>) -> Arc<TaskStore> {
    store_with_page_size(mock, 1000)
}

pub fn store_with_page_size(mock: &Arc<MockEngine>, page_size: usize) -> Arc<TaskStore> {
    let options = StoreOptions {
        suppression_ttl: Duration::from_secs(10),
        failure_threshold: 3,
        default_dir: Some("/downloads".to_string()),
    };
    let transport: Arc<dyn Transport> = mock.clone();
    let engine = Engine::new(transport).with_page_size(page_size);
    Arc::new(TaskStore::new(engine, options))
}

pub fn gids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Multi-file torrent named `name` with the given (file name, length) pairs.
pub fn torrent_bytes(name: &str, files: &[(&str, i64)]) -> Vec<u8> {
    let key = |k: &str| k.as_bytes().to_vec();
    let text = |s: &str| Bencode::Bytes(s.as_bytes().to_vec());

    let files = files
        .iter()
        .map(|(path, length)| {
            Bencode::Dict(vec![
                (key("length"), Bencode::Int(*length)),
                (key("path"), Bencode::List(vec![text(path)])),
            ])
        })
        .collect();

    encode(&Bencode::Dict(vec![
        (key("announce"), text("udp://tracker.example:1337/announce")),
        (
            key("info"),
            Bencode::Dict(vec![
                (key("files"), Bencode::List(files)),
                (key("name"), text(name)),
                (key("piece length"), Bencode::Int(16384)),
                (key("pieces"), Bencode::Bytes(vec![0u8; 20])),
            ]),
        ),
    ]))
}
