//! reqwest-backed transport with per-session credential headers.
//!
//! Every session gets its own `reqwest::Client` so cookies, connection reuse and
//! proxy settings never leak between identities. Credential headers are
//! installed as client defaults and marked sensitive.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use common::Secret;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ApiResponse, Method, Result, Transport, TransportError};

/// Credential header attached to every request of a session.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: Secret<String>,
}

/// HTTP transport for one session.
pub struct HttpTransport {
    client: reqwest::Client,
    via_proxy: bool,
}

impl HttpTransport {
    /// Build a transport with the session's headers and optional proxy.
    ///
    /// Invalid header names or values are skipped with a warning rather than
    /// failing the whole session.
    pub fn new(
        headers: &[HeaderInjection],
        proxy: Option<&str>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        for injection in headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            let mut value = match HeaderValue::from_str(injection.value.expose()) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            value.set_sensitive(true);
            default_headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .connect_timeout(connect_timeout);

        if let Some(url) = proxy {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| TransportError::Proxy(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Other(format!("building http client: {e}")))?;

        Ok(Self {
            client,
            via_proxy: proxy.is_some(),
        })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        method: Method,
        url: &'a str,
        params: &'a [(String, String)],
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .request(method.clone(), url)
                .query(params)
                .send()
                .await
                .map_err(|e| classify_reqwest_error(&e, self.via_proxy))?;

            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| classify_reqwest_error(&e, self.via_proxy))?;

            debug!(status, url = %final_url, bytes = body.len(), "response received");
            Ok(ApiResponse {
                method,
                url: final_url,
                status,
                headers,
                body,
            })
        })
    }
}

/// Map a reqwest error onto the transport error kinds.
///
/// reqwest has no dedicated proxy error, so a failed CONNECT tunnel is detected
/// from the error chain when the session routes through a proxy.
fn classify_reqwest_error(err: &reqwest::Error, via_proxy: bool) -> TransportError {
    let chain = error_chain(err);
    if via_proxy && (chain.contains("tunnel") || chain.contains("proxy")) {
        return TransportError::Proxy(chain);
    }
    if err.is_connect() {
        if err.is_timeout() {
            return TransportError::ConnectTimeout(chain);
        }
        return TransportError::Connect(chain);
    }
    if err.is_timeout() {
        return TransportError::ReadTimeout(chain);
    }
    TransportError::Other(chain)
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        parts.push(e.to_string());
        source = e.source();
    }
    parts.join(": ")
}
