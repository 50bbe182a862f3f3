// # HTTP Remote Endpoint
//
// This crate provides the reqwest-based RemoteEndpoint for the MSI sync
// engine.
//
// ## Purpose
//
// Performs the single GET each incremental fetch needs against the MSI
// publications API and hands the raw body back to the source for decoding.
//
// ## Error Mapping
//
// Every failure surfaces as `Error::Transport`, with the status class in the
// message so the logs tell transient failures from permanent ones:
// - 429: rate limited
// - 5xx: server error (transient)
// - other 4xx: request rejected
//
// There is no retry here. A failed fetch yields an empty stage and the next
// scheduler or foreground trigger tries again.

use msi_core::traits::{RemoteEndpoint, RemoteRequest};
use msi_core::{Error, Result};

use reqwest::StatusCode;
use std::time::Duration;

/// Default per-request timeout
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP endpoint for the MSI publications API
#[derive(Debug, Clone)]
pub struct HttpRemoteEndpoint {
    /// Base URL without trailing slash
    base_url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpRemoteEndpoint {
    /// Create an endpoint
    ///
    /// # Parameters
    ///
    /// - `base_url`: Service root (e.g. "https://msi.nga.mil/api")
    /// - `timeout`: Per-request timeout
    ///
    /// # Errors
    ///
    /// `Error::Config` if the URL is not http(s) or the client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::config(format!(
                "Remote base URL must be http(s): {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("msi-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Create an endpoint with the default timeout
    pub fn with_default_timeout(base_url: impl Into<String>) -> Result<Self> {
        Self::new(base_url, DEFAULT_HTTP_TIMEOUT)
    }

    /// Absolute URL of a request path (without query)
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Map a non-success status to a transport error
fn status_error(path: &str, status: StatusCode, body: &str) -> Error {
    match status.as_u16() {
        429 => Error::transport(format!("{}: rate limited ({})", path, status)),
        500..=599 => Error::transport(format!(
            "{}: server error (transient): {} - {}",
            path,
            status,
            body.trim()
        )),
        _ => Error::transport(format!(
            "{}: request rejected: {} - {}",
            path,
            status,
            body.trim()
        )),
    }
}

#[async_trait::async_trait]
impl RemoteEndpoint for HttpRemoteEndpoint {
    async fn get(&self, request: &RemoteRequest) -> Result<Vec<u8>> {
        let url = self.url_for(&request.path);
        tracing::debug!(url = %url, query = ?request.query, "GET");

        let response = self
            .client
            .get(&url)
            .query(&request.query)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::transport(format!("{}: request failed: {}", request.path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            tracing::warn!(path = %request.path, %status, "remote request failed");
            return Err(status_error(&request.path, status, &body));
        }

        let bytes = response.bytes().await.map_err(|e| {
            Error::transport(format!("{}: failed to read response: {}", request.path, e))
        })?;
        tracing::debug!(path = %request.path, bytes = bytes.len(), "response received");
        Ok(bytes.to_vec())
    }

    fn endpoint_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one canned response and hand back the request line
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let _ = tx.send(request.lines().next().unwrap_or_default().to_string());

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{}", addr), rx)
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let endpoint = HttpRemoteEndpoint::with_default_timeout("ftp://msi.example");
        assert!(matches!(endpoint, Err(Error::Config(_))));
    }

    #[test]
    fn test_url_joining() {
        let endpoint = HttpRemoteEndpoint::with_default_timeout("https://msi.nga.mil/api/").unwrap();

        assert_eq!(endpoint.base_url(), "https://msi.nga.mil/api");
        assert_eq!(
            endpoint.url_for("publications/asam"),
            "https://msi.nga.mil/api/publications/asam"
        );
        assert_eq!(
            endpoint.url_for("/publications/asam"),
            "https://msi.nga.mil/api/publications/asam"
        );
    }

    #[test]
    fn test_status_classification() {
        let rate_limited = status_error("publications/asam", StatusCode::TOO_MANY_REQUESTS, "");
        assert!(rate_limited.to_string().contains("rate limited"));

        let server = status_error("publications/asam", StatusCode::BAD_GATEWAY, "upstream");
        assert!(server.to_string().contains("transient"));

        let rejected = status_error("publications/asam", StatusCode::NOT_FOUND, "no such path");
        assert!(rejected.to_string().contains("rejected"));
        assert!(matches!(rejected, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_get_returns_body_and_sends_query() {
        let (base, request_line) = serve_once("200 OK", r#"{"asam":[]}"#).await;
        let endpoint = HttpRemoteEndpoint::new(base, Duration::from_secs(5)).unwrap();
        let request = RemoteRequest::new("publications/asam")
            .with_query("output", "json")
            .with_query("minOccurDate", "2024-01-01");

        let body = endpoint.get(&request).await.unwrap();

        assert_eq!(body, br#"{"asam":[]}"#);
        let line = request_line.await.unwrap();
        assert!(line.starts_with("GET /publications/asam?output=json&minOccurDate=2024-01-01 "));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let (base, _request_line) = serve_once("503 Service Unavailable", "maintenance").await;
        let endpoint = HttpRemoteEndpoint::new(base, Duration::from_secs(5)).unwrap();

        let result = endpoint.get(&RemoteRequest::new("publications/port")).await;

        match result {
            Err(Error::Transport(message)) => assert!(message.contains("503")),
            other => panic!("expected transport error, got {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint =
            HttpRemoteEndpoint::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let result = endpoint.get(&RemoteRequest::new("publications/modu")).await;

        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
