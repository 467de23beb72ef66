//! JSON-RPC access with multi-endpoint failover
//!
//! - [`RpcTransport`] performs one request against one endpoint
//! - [`HttpTransport`] is the JSON-RPC 2.0 over HTTP implementation
//! - [`RpcClient`] walks a chain's endpoints in order until one answers

use crate::error::{RouterError, RouterResult};
use crate::metrics;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of a single endpoint
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),

    /// `cause` is the node's error name when it reports one, e.g. NEAR's
    /// `UNKNOWN_TRANSACTION`
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        cause: Option<String>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One request against one endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn post_request(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;
}

/// JSON-RPC 2.0 over HTTP
pub struct HttpTransport {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post_request(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(endpoint)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "status {}",
                response.status()
            )));
        }

        let mut envelope: Value = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
            return Err(TransportError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                cause: err
                    .pointer("/cause/name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        Ok(envelope
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

/// Why no endpoint produced a result
enum CallFailure {
    /// At least one endpoint answered that the object does not exist
    Missing,
    Unreachable(String),
}

impl TransportError {
    fn is_cause(&self, causes: &[&str]) -> bool {
        match self {
            TransportError::Rpc {
                cause: Some(cause), ..
            } => causes.contains(&cause.as_str()),
            _ => false,
        }
    }
}

/// Chain scoped client trying every configured endpoint in order
#[derive(Clone)]
pub struct RpcClient {
    chain_id: u64,
    endpoints: Vec<String>,
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl RpcClient {
    /// Create a client; at least one endpoint is required
    pub fn new(
        chain_id: u64,
        endpoints: Vec<String>,
        transport: Arc<dyn RpcTransport>,
        timeout: Duration,
    ) -> RouterResult<Self> {
        if endpoints.is_empty() {
            return Err(RouterError::Config(format!(
                "chain {} has no RPC endpoints",
                chain_id
            )));
        }
        Ok(Self {
            chain_id,
            endpoints,
            transport,
            timeout,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn try_endpoints<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        missing: &[&str],
    ) -> Result<T, CallFailure> {
        let mut last_error = String::from("no endpoint tried");
        let mut reported_missing = false;

        for endpoint in &self.endpoints {
            let request =
                self.transport
                    .post_request(endpoint, method, params.clone(), self.timeout);
            match tokio::time::timeout(self.timeout, request).await {
                Ok(Ok(value)) => match serde_json::from_value::<T>(value) {
                    Ok(decoded) => {
                        debug!(chain_id = self.chain_id, method, endpoint = %endpoint, "RPC call succeeded");
                        return Ok(decoded);
                    }
                    Err(e) => last_error = format!("{}: undecodable result: {}", endpoint, e),
                },
                Ok(Err(e)) if e.is_cause(missing) => {
                    // A lagging node may not know the object yet; ask the others
                    debug!(chain_id = self.chain_id, method, endpoint = %endpoint, error = %e, "RPC endpoint reports object missing");
                    reported_missing = true;
                    continue;
                }
                Ok(Err(e)) => last_error = format!("{}: {}", endpoint, e),
                Err(_) => {
                    last_error = format!("{}: timed out after {:?}", endpoint, self.timeout)
                }
            }
            warn!(chain_id = self.chain_id, method, error = %last_error, "RPC endpoint failed");
        }

        if reported_missing {
            return Err(CallFailure::Missing);
        }
        metrics::record_rpc_failure(self.chain_id, method);
        Err(CallFailure::Unreachable(last_error))
    }

    fn unreachable(&self, method: &str, last_error: String) -> RouterError {
        RouterError::RpcQuery {
            chain_id: self.chain_id,
            message: format!("{} failed on all endpoints, last: {}", method, last_error),
        }
    }

    /// Call `method` and decode the result; a response that fails to decode
    /// counts as an endpoint failure
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RouterResult<T> {
        match self.try_endpoints(method, params, &[]).await {
            Ok(decoded) => Ok(decoded),
            Err(CallFailure::Missing) => Err(self.unreachable(method, "object missing".into())),
            Err(CallFailure::Unreachable(last_error)) => Err(self.unreachable(method, last_error)),
        }
    }

    /// Call a method whose "does not exist" answer is a node error named in
    /// `missing`; `None` when some endpoint gave that answer and none had a
    /// result
    pub async fn call_unless_missing<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        missing: &[&str],
    ) -> RouterResult<Option<T>> {
        match self.try_endpoints(method, params, missing).await {
            Ok(decoded) => Ok(Some(decoded)),
            Err(CallFailure::Missing) => Ok(None),
            Err(CallFailure::Unreachable(last_error)) => Err(self.unreachable(method, last_error)),
        }
    }

    /// Call a method whose null result means "not found"
    pub async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> RouterResult<Option<T>> {
        self.call::<Option<T>>(method, params).await
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted transport for bridge and pipeline tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&Value) -> Result<Value, TransportError> + Send + Sync>;

    /// Answers each method with a fixed handler and records every call
    #[derive(Default)]
    pub struct FakeTransport {
        handlers: HashMap<String, Handler>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, method: &str, result: Value) -> Self {
            self.on_fn(method, move |_| Ok(result.clone()))
        }

        pub fn on_fn<F>(mut self, method: &str, handler: F) -> Self
        where
            F: Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static,
        {
            self.handlers.insert(method.to_string(), Box::new(handler));
            self
        }

        pub fn calls(&self, method: &str) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| m == method)
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RpcTransport for FakeTransport {
        async fn post_request(
            &self,
            _endpoint: &str,
            method: &str,
            params: Value,
            _timeout: Duration,
        ) -> Result<Value, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params.clone()));
            match self.handlers.get(method) {
                Some(handler) => handler(&params),
                None => Err(TransportError::Rpc {
                    code: -32601,
                    message: format!("method {} not scripted", method),
                    cause: None,
                }),
            }
        }
    }
}
