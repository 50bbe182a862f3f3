// # Remote Endpoint Trait
//
// Read-only access to the remote MSI service. Sources describe *what* to
// request with [`RemoteRequest`]; the endpoint owns transport concerns only.
//
// Endpoints are single-shot: one HTTP exchange per call, no retry, no
// caching. A failed invocation is simply retried on the next scheduler or
// foreground trigger.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// A read request relative to the service base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    /// Path below the base URL (e.g. `publications/asam`)
    pub path: String,
    /// Query parameters in the order they are sent
    pub query: Vec<(String, String)>,
}

impl RemoteRequest {
    /// Create a request for `path` with no query parameters
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Append a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Append a query parameter only when a value is present
    pub fn with_optional_query(self, name: impl Into<String>, value: Option<String>) -> Self {
        match value {
            Some(value) => self.with_query(name, value),
            None => self,
        }
    }

    /// Look up a query parameter by name
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Trait for remote endpoint implementations
///
/// Transport and HTTP failures must be returned as [`Error::Transport`];
/// implementations must never panic on a bad response.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Perform a GET and return the raw response body
    async fn get(&self, request: &RemoteRequest) -> Result<Vec<u8>>;

    /// Endpoint name (for logging)
    fn endpoint_name(&self) -> &'static str;
}

/// Endpoint used when no network transport is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineEndpoint;

#[async_trait]
impl RemoteEndpoint for OfflineEndpoint {
    async fn get(&self, request: &RemoteRequest) -> Result<Vec<u8>> {
        Err(Error::transport(format!(
            "no remote endpoint configured for {}",
            request.path
        )))
    }

    fn endpoint_name(&self) -> &'static str {
        "offline"
    }
}
