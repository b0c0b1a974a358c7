//! Scripted connector and counters for client tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_pool::Session;
use transport::{ApiResponse, Method, Transport, TransportError};
use usage_counter::{CounterFuture, UsageCounter};

use crate::connect::Connector;

pub type Script = Result<ApiResponse, TransportError>;

#[derive(Default)]
struct Shared {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    calls: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
    refuse: Mutex<HashSet<String>>,
}

/// Connector whose transports replay queued results per session.
/// An exhausted queue answers with a plain 200.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, session_id: &str, script: Script) {
        self.shared
            .scripts
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push_back(script);
    }

    /// Make `connect` fail for this session.
    pub fn refuse(&self, session_id: &str) {
        self.shared
            .refuse
            .lock()
            .unwrap()
            .insert(session_id.to_string());
    }

    /// Session id of every send, in order.
    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.shared.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.shared.closed.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, session: &Session) -> transport::Result<Box<dyn Transport>> {
        if self.shared.refuse.lock().unwrap().contains(&session.id) {
            return Err(TransportError::Proxy("refused by test".into()));
        }
        self.shared.opened.lock().unwrap().push(session.id.clone());
        Ok(Box::new(ScriptedTransport {
            session_id: session.id.clone(),
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedTransport {
    session_id: String,
    shared: Arc<Shared>,
}

impl Transport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        method: Method,
        url: &'a str,
        _params: &'a [(String, String)],
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.shared.calls.lock().unwrap().push(self.session_id.clone());
            let next = self
                .shared
                .scripts
                .lock()
                .unwrap()
                .get_mut(&self.session_id)
                .and_then(VecDeque::pop_front);
            next.unwrap_or_else(|| Ok(ok(&method, url)))
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.shared
                .closed
                .lock()
                .unwrap()
                .push(self.session_id.clone());
        })
    }
}

fn ok(method: &Method, url: &str) -> ApiResponse {
    ApiResponse::new(method.clone(), url, 200).with_body(r#"{"data":{}}"#)
}

pub fn reply(status: u16, body: &str) -> Script {
    Ok(ApiResponse::new(Method::GET, "https://api.example/q", status).with_body(body.to_string()))
}

pub fn rate_limited(reset_at: i64) -> Script {
    Ok(ApiResponse::new(Method::GET, "https://api.example/q", 429)
        .with_header("x-rate-limit-remaining", "0")
        .with_header("x-rate-limit-limit", "50")
        .with_header("x-rate-limit-reset", &reset_at.to_string()))
}

pub fn session(id: &str) -> Session {
    Session {
        id: id.into(),
        headers: Vec::new(),
        proxy: None,
    }
}

/// Counter store that is always down.
pub struct FailingCounter;

impl UsageCounter for FailingCounter {
    fn get<'a>(&'a self, _key: &'a str) -> CounterFuture<'a, Option<i64>> {
        Box::pin(async { Err(usage_counter::Error::Unavailable("down".into())) })
    }

    fn set_with_expiry<'a>(
        &'a self,
        _key: &'a str,
        _value: i64,
        _ttl: Duration,
    ) -> CounterFuture<'a, ()> {
        Box::pin(async { Err(usage_counter::Error::Unavailable("down".into())) })
    }

    fn increment<'a>(&'a self, _key: &'a str, _ttl: Duration) -> CounterFuture<'a, i64> {
        Box::pin(async { Err(usage_counter::Error::Unavailable("down".into())) })
    }
}
