//! Transport abstraction for session-bound API calls
//!
//! Defines the `Transport` trait that decouples the queue client from the HTTP
//! stack. Each active session owns one transport (its own connection pool,
//! credential headers and proxy). The queue client only needs three things from
//! it: send a request, tell transient network failures apart from connect
//! failures, and close.

pub mod http;

pub use http::{HeaderInjection, HttpTransport};
pub use reqwest::Method;
pub use reqwest::header::HeaderMap;

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::warn;

/// Transport-level failures, split by how the queue client reacts to them.
///
/// - `ReadTimeout` / `Proxy`: retried on the same session without limit
/// - `Connect` / `ConnectTimeout`: retried, but a streak of them is fatal
/// - `Other`: counted as an unexpected error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("read timeout: {0}")]
    ReadTimeout(String),

    #[error("proxy failure: {0}")]
    Proxy(String),

    #[error("connect failure: {0}")]
    Connect(String),

    #[error("connect timeout: {0}")]
    ConnectTimeout(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::ReadTimeout(_) => "read_timeout",
            TransportError::Proxy(_) => "proxy",
            TransportError::Connect(_) => "connect",
            TransportError::ConnectTimeout(_) => "connect_timeout",
            TransportError::Other(_) => "other",
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// A fully received API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub method: Method,
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(method: Method, url: impl Into<String>, status: u16) -> Self {
        Self {
            method,
            url: url.into(),
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header, skipping names or values that are not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = name, "skipping invalid response header"),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// One session's connection to the upstream API.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Box<dyn Transport>` lives inside the active session context).
pub trait Transport: Send + Sync {
    /// Issue a request with the given query parameters.
    fn send<'a>(
        &'a self,
        method: Method,
        url: &'a str,
        params: &'a [(String, String)],
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;

    /// Release connections held by this transport. Defaults to a no-op for
    /// transports that clean up on drop.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}
