//! Session connections
//!
//! A `Connector` turns a pool `Session` into a live `Transport`. The client
//! holds at most one `ActiveSession` at a time and closes its transport before
//! the session goes back to the pool.

use std::time::Duration;

use session_pool::Session;
use tracing::debug;
use transport::{ApiResponse, HttpTransport, Method, Transport, TransportError};

/// Builds a transport for a session.
pub trait Connector: Send + Sync {
    fn connect(&self, session: &Session) -> transport::Result<Box<dyn Transport>>;
}

/// Connector producing reqwest transports.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    proxy: Option<String>,
    timeout: Duration,
    connect_timeout: Duration,
}

impl HttpConnector {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            proxy: None,
            timeout,
            connect_timeout,
        }
    }

    /// Client-wide proxy. Takes precedence over per-session proxies.
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Proxy used for `session`.
    pub fn proxy_for<'a>(&'a self, session: &'a Session) -> Option<&'a str> {
        self.proxy.as_deref().or(session.proxy.as_deref())
    }
}

impl Connector for HttpConnector {
    fn connect(&self, session: &Session) -> transport::Result<Box<dyn Transport>> {
        let proxy = self.proxy_for(session);
        debug!(session_id = %session.id, via_proxy = proxy.is_some(), "opening transport");
        let transport =
            HttpTransport::new(&session.headers, proxy, self.timeout, self.connect_timeout)?;
        Ok(Box::new(transport))
    }
}

/// The session a client currently holds, with its transport.
pub struct ActiveSession {
    session: Session,
    transport: Box<dyn Transport>,
    /// Successful requests served since the session was taken
    pub success_count: u32,
}

impl ActiveSession {
    pub fn open(session: Session, connector: &dyn Connector) -> transport::Result<Self> {
        let transport = connector.connect(&session)?;
        Ok(Self {
            session,
            transport,
            success_count: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<ApiResponse, TransportError> {
        self.transport.send(method, url, params).await
    }

    /// Close the transport. Returns the session id and its success count.
    pub async fn close(self) -> (String, u32) {
        self.transport.close().await;
        (self.session.id, self.success_count)
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("id", &self.session.id)
            .field("success_count", &self.success_count)
            .finish_non_exhaustive()
    }
}
