//! HTTP transport implementation.
//!
//! [`HttpTransport`] speaks the authority's JSON protocol over any
//! [`HttpClient`]. Two clients are provided: [`LoopbackClient`], which hands
//! requests to an in-process handler, and `ReqwestClient` (feature
//! `reqwest`) for real networks.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use tablesync_protocol::{Cursor, JsonCodec, PullResponse, PushRequest, PushResponse};
use tracing::warn;

/// A failed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    /// Response status, or `None` if no response arrived.
    pub status: Option<u16>,
    /// Error text or response body.
    pub message: String,
}

impl HttpError {
    /// A failure before any response arrived.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// A response with an error status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Connection failures, server errors and throttling are worth
    /// retrying; other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(status) => status >= 500 || status == 429 || status == 408,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<HttpError> for SyncError {
    fn from(err: HttpError) -> Self {
        SyncError::Network {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Bodies are
/// JSON bytes; a non-success status must be returned as an error.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST with a JSON body and returns the response body.
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpError>;

    /// Sends a GET and returns the response body.
    async fn get_json(&self, url: &str) -> Result<Vec<u8>, HttpError>;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for the authority at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn record<T>(&self, result: Result<T, HttpError>) -> SyncResult<T> {
        match result {
            Ok(value) => {
                *self.last_error.write() = None;
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "sync request failed");
                *self.last_error.write() = Some(err.to_string());
                Err(err.into())
            }
        }
    }
}

fn decode<T: JsonCodec>(body: &[u8]) -> SyncResult<T> {
    T::decode(body).map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
}

#[async_trait]
impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let body = request
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let url = format!("{}/sync", self.base_url);
        let response = self.record(self.client.post_json(&url, body).await)?;
        decode(&response)
    }

    async fn pull(&self, since: &Cursor) -> SyncResult<PullResponse> {
        let url = format!(
            "{}/sync?since={}",
            self.base_url,
            urlencoding::encode(since.as_str())
        );
        let response = self.record(self.client.get_json(&url).await)?;
        decode(&response)
    }
}

/// An in-process HTTP handler.
///
/// Receives the method, the path with query string, and the request body;
/// returns the status and response body.
pub trait LoopbackServer: Send + Sync {
    /// Handles one request.
    fn handle(&self, method: &str, path_and_query: &str, body: &[u8]) -> (u16, Vec<u8>);
}

impl<F> LoopbackServer for F
where
    F: Fn(&str, &str, &[u8]) -> (u16, Vec<u8>) + Send + Sync,
{
    fn handle(&self, method: &str, path_and_query: &str, body: &[u8]) -> (u16, Vec<u8>) {
        self(method, path_and_query, body)
    }
}

/// An [`HttpClient`] that routes requests to a [`LoopbackServer`].
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Wraps a handler.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    fn call(&self, method: &str, url: &str, body: &[u8]) -> Result<Vec<u8>, HttpError> {
        let (status, response) = self.server.handle(method, path_of(url), body);
        if (200..300).contains(&status) {
            Ok(response)
        } else {
            Err(HttpError::status(
                status,
                String::from_utf8_lossy(&response).into_owned(),
            ))
        }
    }
}

/// Strips scheme and authority from `url`.
fn path_of(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => return url,
    };
    match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "/",
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpError> {
        self.call("POST", url, &body)
    }

    async fn get_json(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        self.call("GET", url, &[])
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_client::ReqwestClient;

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::{HttpClient, HttpError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// [`HttpClient`] backed by `reqwest`.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Creates a client with the given request timeout.
        pub fn new(timeout: Duration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| HttpError::connection(e.to_string()))?;
            Ok(Self { client })
        }

        async fn finish(response: reqwest::Response) -> Result<Vec<u8>, HttpError> {
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| HttpError::connection(e.to_string()))?;
            if status.is_success() {
                Ok(body.to_vec())
            } else {
                Err(HttpError::status(
                    status.as_u16(),
                    String::from_utf8_lossy(&body).into_owned(),
                ))
            }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpError> {
            let response = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| HttpError::connection(e.to_string()))?;
            Self::finish(response).await
        }

        async fn get_json(&self, url: &str) -> Result<Vec<u8>, HttpError> {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| HttpError::connection(e.to_string()))?;
            Self::finish(response).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn retry_classification() {
        assert!(HttpError::connection("refused").is_retryable());
        assert!(HttpError::status(503, "").is_retryable());
        assert!(HttpError::status(429, "").is_retryable());
        assert!(!HttpError::status(400, "").is_retryable());
        assert!(!HttpError::status(404, "").is_retryable());
    }

    #[test]
    fn path_extraction() {
        assert_eq!(path_of("http://host:3000/sync?since=0"), "/sync?since=0");
        assert_eq!(path_of("https://host"), "/");
        assert_eq!(path_of("/sync"), "/sync");
    }

    #[tokio::test]
    async fn pull_encodes_cursor_in_query() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let client = LoopbackClient::new(move |method: &str, path: &str, _body: &[u8]| {
            log.lock().push(format!("{method} {path}"));
            let body = PullResponse::new(Vec::new(), Cursor::new("a b")).encode().unwrap();
            (200, body)
        });
        let transport = HttpTransport::new("http://loopback/", client);

        let response = transport.pull(&Cursor::new("a b")).await.unwrap();
        assert_eq!(response.cursor, Cursor::new("a b"));
        assert_eq!(seen.lock().as_slice(), ["GET /sync?since=a%20b"]);
    }

    #[tokio::test]
    async fn error_status_maps_to_network_error() {
        let client = LoopbackClient::new(|_: &str, _: &str, _: &[u8]| (503, b"busy".to_vec()));
        let transport = HttpTransport::new("http://loopback", client);

        let err = transport
            .push(&PushRequest::new("c", Cursor::origin(), Vec::new()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("HTTP 503: busy"));
    }

    #[tokio::test]
    async fn undecodable_body_is_protocol_error() {
        let client = LoopbackClient::new(|_: &str, _: &str, _: &[u8]| (200, b"<html>".to_vec()));
        let transport = HttpTransport::new("http://loopback", client);

        let err = transport.pull(&Cursor::origin()).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(transport.last_error().is_none());
    }
}
