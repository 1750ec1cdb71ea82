// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC 2.0 transport to the aria2 engine.
//!
//! [`Transport`] is the seam the task store talks through. [`RpcClient`] is
//! the HTTP implementation; tests provide scripted ones. [`Engine`] wraps a
//! transport with the typed aria2 method vocabulary.
//!
//! When a secret is configured every call carries `"token:<secret>"` as its
//! first positional parameter, which is how aria2c's `--rpc-secret` works.

pub mod engine;

pub use engine::{methods, Engine};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{CallError, TransportError};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends one JSON-RPC call and returns its `result` member.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CallError>;
}

/// HTTP JSON-RPC client for aria2c.
pub struct RpcClient {
    endpoint: String,
    secret: Option<String>,
    timeout: Duration,
    client: Client,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for the given endpoint with the default timeout.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        Self::build(endpoint.into(), None, DEFAULT_TIMEOUT)
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        Self::build(
            config.rpc_url.clone(),
            config.rpc_secret.clone(),
            config.rpc_timeout(),
        )
    }

    fn build(
        endpoint: String,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.clone(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            endpoint,
            secret,
            timeout,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Replace the per-call timeout. Rebuilds the underlying HTTP client.
    pub fn with_timeout(self, timeout: Duration) -> Result<Self, TransportError> {
        Self::build(self.endpoint, self.secret, timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn envelope(&self, id: u64, method: &str, params: Vec<Value>) -> Value {
        build_envelope(id, method, self.secret.as_deref(), params)
    }

    fn classify_reqwest(&self, method: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                method: method.to_string(),
                timeout: self.timeout,
            }
        } else if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Connect {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for RpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = self.envelope(id, method, params);
        let started = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_reqwest(method, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.classify_reqwest(method, e))?;

        tracing::debug!(
            method,
            id,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rpc call finished"
        );

        decode_response(method, status.as_u16(), &text)
    }
}

/// Build a JSON-RPC 2.0 request object.
///
/// ```
/// use applesword::rpc::build_envelope;
/// use serde_json::json;
///
/// let body = build_envelope(7, "aria2.pause", Some("s3cret"), vec![json!("2089b05ecca3d829")]);
/// assert_eq!(body["params"], json!(["token:s3cret", "2089b05ecca3d829"]));
/// ```
pub fn build_envelope(id: u64, method: &str, secret: Option<&str>, params: Vec<Value>) -> Value {
    let mut all = Vec::with_capacity(params.len() + 1);
    if let Some(secret) = secret {
        all.push(Value::String(format!("token:{}", secret)));
    }
    all.extend(params);

    json!({
        "jsonrpc": "2.0",
        "id": id.to_string(),
        "method": method,
        "params": all,
    })
}

/// Interpret an HTTP response body as a JSON-RPC reply.
///
/// aria2 answers rejected calls with HTTP 400 and a JSON error object, so a
/// parseable error body wins over the status code.
pub fn decode_response(method: &str, status: u16, body: &str) -> Result<Value, CallError> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            if !(200..300).contains(&status) {
                return Err(TransportError::Http { status }.into());
            }
            return Err(TransportError::Malformed(format!("{}: {}", method, e)).into());
        }
    };

    if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(CallError::Rejected {
            method: method.to_string(),
            code,
            message,
        });
    }

    if !(200..300).contains(&status) {
        return Err(TransportError::Http { status }.into());
    }

    match parsed.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(TransportError::Malformed(format!(
            "{}: response has neither result nor error",
            method
        ))
        .into()),
    }
}
