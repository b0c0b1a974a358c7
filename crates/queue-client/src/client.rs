//! Queue client: session-rotating request loop
//!
//! Sends each request through the currently held session, classifies the
//! response, and applies the resulting action (return, retry, rotate, abort,
//! fail, halt). The client owns at most one session at a time and hands it
//! back to the pool on `close`, at the end of `scoped`, or, as a last resort,
//! from `Drop`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use common::unix_now;
use session_pool::{Session, SessionPool};
use tracing::{debug, error, info, instrument, warn};
use transport::{ApiResponse, Method};
use usage_counter::{COUNT_WINDOW, TOTAL_COUNT_KEY, UsageCounter, session_key};
use uuid::Uuid;

use crate::classify::classify;
use crate::connect::{ActiveSession, Connector};
use crate::decision::{Action, Event, Release, RetryCounters, handle_event};
use crate::dump::DumpSink;
use crate::error::{Error, Result};
use crate::options::ClientOptions;
use crate::selection::{Strategy, rotation_due, sessions_by_usage};

/// A successful response and the session that served it.
#[derive(Debug)]
pub struct SessionResponse {
    pub session_id: String,
    pub response: ApiResponse,
}

/// How a request loop ended without an error.
enum Done {
    Response(SessionResponse),
    Aborted,
    NoSession,
}

impl Done {
    fn label(&self) -> &'static str {
        match self {
            Done::Response(_) => "ok",
            Done::Aborted => "aborted",
            Done::NoSession => "no_session",
        }
    }
}

/// Boxed future returned by the closure passed to `QueueClient::scoped`.
pub type ScopedFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>;

/// Request client bound to one queue, rotating through pool sessions.
pub struct QueueClient {
    pool: Arc<dyn SessionPool>,
    connector: Arc<dyn Connector>,
    counter: Option<Arc<dyn UsageCounter>>,
    options: ClientOptions,
    dump: Option<DumpSink>,
    active: Option<ActiveSession>,
    /// Total count that triggered the last scheduled switch
    last_switch_at: Option<i64>,
    /// Set after a fatal `FeatureMissing`
    halted: Option<String>,
}

impl QueueClient {
    pub fn new(
        pool: Arc<dyn SessionPool>,
        connector: Arc<dyn Connector>,
        options: ClientOptions,
    ) -> Self {
        Self {
            pool,
            connector,
            counter: None,
            options,
            dump: None,
            active: None,
            last_switch_at: None,
            halted: None,
        }
    }

    /// Usage counter store. Enables scheduled switching and, if the options
    /// ask for it, least-used selection.
    pub fn with_counter(mut self, counter: Arc<dyn UsageCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Write every received response to `sink`.
    pub fn with_dump(mut self, sink: DumpSink) -> Self {
        self.dump = Some(sink);
        self
    }

    pub fn queue(&self) -> &str {
        &self.options.queue
    }

    pub fn strategy(&self) -> Strategy {
        Strategy::resolve(self.options.balanced, self.counter.is_some())
    }

    /// Id of the session currently held, if any.
    pub fn active_session(&self) -> Option<&str> {
        self.active.as_ref().map(ActiveSession::id)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// GET `url` with query `params`.
    pub async fn get(
        &mut self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Option<SessionResponse>> {
        self.request(Method::GET, url, params).await
    }

    /// Send a request through the pool's sessions until it succeeds or ends.
    ///
    /// Returns `Ok(None)` when the request was skipped: no session was
    /// available, or the upstream reported a dependency failure.
    #[instrument(skip_all, fields(request_id = %Uuid::new_v4(), queue = %self.options.queue, method = %method, url = %url))]
    pub async fn request(
        &mut self,
        method: Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Option<SessionResponse>> {
        let started = Instant::now();
        let result = self.run(method, url, params).await;
        let label = match &result {
            Ok(done) => done.label(),
            Err(Error::ConnectExhausted { .. }) => "connect_exhausted",
            Err(Error::FeatureMissing(_)) => "feature_missing",
            Err(Error::Halted(_)) => "halted",
            Err(Error::AttemptsExhausted(_)) => "attempts_exhausted",
            Err(Error::Open { .. } | Error::Pool(_)) => "error",
        };
        crate::metrics::record_request(&self.options.queue, label, started.elapsed().as_secs_f64());
        match result? {
            Done::Response(response) => Ok(Some(response)),
            Done::Aborted | Done::NoSession => Ok(None),
        }
    }

    async fn run(&mut self, method: Method, url: &str, params: &[(String, String)]) -> Result<Done> {
        if let Some(reason) = &self.halted {
            return Err(Error::Halted(reason.clone()));
        }

        let mut counters = RetryCounters::default();
        let mut attempts: u32 = 0;
        let mut keep_session = false;

        loop {
            if !keep_session && !self.select().await? {
                info!("no session available, request skipped");
                return Ok(Done::NoSession);
            }
            keep_session = false;

            if self.options.max_attempts.is_some_and(|max| attempts >= max) {
                warn!(attempts, "attempt limit reached");
                return Err(Error::AttemptsExhausted(attempts));
            }
            attempts += 1;

            let Some(active) = self.active.as_ref() else {
                return Ok(Done::NoSession);
            };
            let session_id = active.id().to_string();

            let event = match active.send(method.clone(), url, params).await {
                Ok(response) => {
                    if let Some(dump) = &self.dump {
                        dump.write(&response, &session_id).await;
                    }
                    let outcome = classify(&response, &session_id).outcome;
                    Event::Response { outcome, response }
                }
                Err(err) => {
                    warn!(session_id, kind = err.kind(), error = %err, "transport failure");
                    crate::metrics::record_transport_error(&self.options.queue, err.kind());
                    Event::Transport(err)
                }
            };

            let (next, action) = handle_event(counters, event, unix_now());
            counters = next;

            match action {
                Action::Succeed(response) => {
                    self.record_success(&session_id).await;
                    return Ok(Done::Response(SessionResponse {
                        session_id,
                        response,
                    }));
                }
                Action::Rotate(release) => {
                    info!(session_id, reason = release.label(), "rotating session");
                    crate::metrics::record_rotation(&self.options.queue, release.label());
                    self.release(release).await?;
                }
                Action::RetrySameSession => keep_session = true,
                Action::Abort => return Ok(Done::Aborted),
                Action::Fail(source) => {
                    error!(session_id, error = %source, "connection retries exhausted");
                    return Err(Error::ConnectExhausted {
                        attempts: counters.connection,
                        source,
                    });
                }
                Action::Halt(message) => {
                    error!(session_id, "client halted, request construction needs an update");
                    self.halted = Some(message.clone());
                    return Err(Error::FeatureMissing(message));
                }
            }
        }
    }

    /// Release the held session back to the pool. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<()> {
        self.release(Release::Unlock).await
    }

    /// Run `f` with this client, then close it whatever `f` returned.
    ///
    /// The first error wins: an error from `f` hides a failure to release.
    pub async fn scoped<T, F>(mut self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut QueueClient) -> ScopedFuture<'c, T>,
    {
        let result = f(&mut self).await;
        let closed = self.close().await;
        match (result, closed) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    /// Make sure a usable session is held. `false` when none can be had.
    async fn select(&mut self) -> Result<bool> {
        let total = self.total_count().await;
        let due = rotation_due(total, self.options.change, self.last_switch_at);
        if self.active.is_some() && !due {
            return Ok(true);
        }
        if due {
            info!(total, change = self.options.change, "scheduled session switch");
            self.last_switch_at = total;
            if self.active.is_some() {
                crate::metrics::record_rotation(&self.options.queue, "scheduled");
            }
        }

        match self.strategy() {
            Strategy::Direct => self.acquire_direct().await,
            Strategy::UsageBalanced => self.acquire_balanced().await,
        }
    }

    async fn acquire_direct(&mut self) -> Result<bool> {
        self.release(Release::Unlock).await?;
        let Some(session) = self.pool.acquire_for_queue(&self.options.queue).await? else {
            return Ok(false);
        };
        self.open(session).await?;
        Ok(true)
    }

    async fn acquire_balanced(&mut self) -> Result<bool> {
        let Some(counter) = self.counter.clone() else {
            return self.acquire_direct().await;
        };

        let ranked = sessions_by_usage(self.pool.as_ref(), counter.as_ref()).await?;
        for id in &ranked {
            if self.active_session() == Some(id.as_str()) {
                return Ok(true);
            }
            let Some(session) = self.pool.acquire_session(id, &self.options.queue).await? else {
                continue;
            };
            if let Err(e) = self.release(Release::Unlock).await {
                self.pool
                    .release_unlock(&session.id, &self.options.queue, 0)
                    .await?;
                return Err(e);
            }
            self.open(session).await?;
            return Ok(true);
        }

        // Every candidate is locked for this queue; wait on the pool for the first release.
        debug!(candidates = ranked.len(), "no free session by usage, waiting on pool");
        self.acquire_direct().await
    }

    async fn open(&mut self, session: Session) -> Result<()> {
        let session_id = session.id.clone();
        match ActiveSession::open(session, self.connector.as_ref()) {
            Ok(active) => {
                info!(session_id, strategy = ?self.strategy(), "session selected");
                self.active = Some(active);
                Ok(())
            }
            Err(source) => {
                error!(session_id, error = %source, "cannot open transport for session");
                self.pool
                    .release_unlock(&session_id, &self.options.queue, 0)
                    .await?;
                Err(Error::Open { session_id, source })
            }
        }
    }

    async fn release(&mut self, how: Release) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        let (session_id, success_count) = active.close().await;
        let queue = self.options.queue.as_str();
        debug!(session_id, success_count, how = how.label(), "releasing session");
        match how {
            Release::Unlock => {
                self.pool
                    .release_unlock(&session_id, queue, success_count)
                    .await?
            }
            Release::LockUntil(until) => {
                self.pool
                    .release_lock_until(&session_id, queue, until, success_count)
                    .await?
            }
            Release::Inactive(reason) => {
                self.pool
                    .mark_inactive(&session_id, reason.as_deref())
                    .await?
            }
        }
        Ok(())
    }

    async fn total_count(&self) -> Option<i64> {
        let counter = self.counter.as_ref()?;
        match counter.get(TOTAL_COUNT_KEY).await {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "usage counter read failed");
                None
            }
        }
    }

    async fn record_success(&mut self, session_id: &str) {
        if let Some(active) = self.active.as_mut() {
            active.success_count += 1;
        }
        let Some(counter) = &self.counter else {
            return;
        };
        match counter.increment(&session_key(session_id), COUNT_WINDOW).await {
            Ok(count) => debug!(session_id, count, "session request count"),
            Err(e) => warn!(session_id, error = %e, "usage counter update failed"),
        }
        if let Err(e) = counter.increment(TOTAL_COUNT_KEY, COUNT_WINDOW).await {
            warn!(error = %e, "usage counter update failed");
        }
    }
}

impl Drop for QueueClient {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let session_id = active.id().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(session_id, "client dropped while holding a session, releasing in background");
                let pool = self.pool.clone();
                let queue = self.options.queue.clone();
                handle.spawn(async move {
                    let (session_id, success_count) = active.close().await;
                    if let Err(e) = pool.release_unlock(&session_id, &queue, success_count).await {
                        warn!(session_id, error = %e, "background release failed");
                    }
                });
            }
            Err(_) => {
                warn!(session_id, "client dropped outside a runtime, session stays locked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FailingCounter, ScriptedConnector, rate_limited, reply, session,
    };
    use session_pool::{MemoryPool, QueueLock, SessionStatus};
    use std::time::Duration;
    use transport::TransportError;
    use usage_counter::MemoryCounter;

    const QUEUE: &str = "UserByRestId";
    const URL: &str = "https://api.example/graphql/UserByRestId";

    fn pool(ids: &[&str]) -> Arc<MemoryPool> {
        Arc::new(MemoryPool::new(ids.iter().map(|id| session(id)).collect()))
    }

    fn direct() -> ClientOptions {
        ClientOptions::new(QUEUE).with_balanced(false)
    }

    fn client(pool: &Arc<MemoryPool>, connector: &ScriptedConnector, options: ClientOptions) -> QueueClient {
        QueueClient::new(pool.clone(), Arc::new(connector.clone()), options)
    }

    fn errors(code: i64, message: &str) -> String {
        serde_json::json!({ "errors": [{ "code": code, "message": message }] }).to_string()
    }

    async fn fetch(client: &mut QueueClient) -> Result<Option<SessionResponse>> {
        client.get(URL, &[("variables".to_string(), "{}".to_string())]).await
    }

    #[tokio::test]
    async fn success_returns_response_and_counts_usage() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let counter = Arc::new(MemoryCounter::new());
        let mut client = client(&pool, &connector, direct()).with_counter(counter.clone());

        let got = fetch(&mut client).await.unwrap().unwrap();
        assert_eq!(got.session_id, "a");
        assert_eq!(got.response.status, 200);
        assert_eq!(counter.get(TOTAL_COUNT_KEY).await.unwrap(), Some(1));
        assert_eq!(counter.get(&session_key("a")).await.unwrap(), Some(1));
        assert_eq!(pool.queue_lock("a", QUEUE).await, Some(QueueLock::InUse));
    }

    #[tokio::test]
    async fn session_is_kept_between_requests() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        let mut client = client(&pool, &connector, direct());

        for _ in 0..4 {
            fetch(&mut client).await.unwrap().unwrap();
        }
        assert_eq!(connector.calls(), vec!["a"; 4]);
        assert_eq!(connector.opened(), vec!["a"]);
    }

    #[tokio::test]
    async fn rate_limited_session_is_locked_until_reset() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        let reset = unix_now() + 900;
        connector.push("a", rate_limited(reset));
        let mut client = client(&pool, &connector, direct());

        let got = fetch(&mut client).await.unwrap().unwrap();
        assert_eq!(got.session_id, "b");
        assert_eq!(pool.queue_lock("a", QUEUE).await, Some(QueueLock::Until(reset)));
        assert_eq!(pool.status("a").await, Some(SessionStatus::Active));
        assert_eq!(connector.closed(), vec!["a"]);
    }

    #[tokio::test]
    async fn banned_session_never_reused() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        connector.push("a", reply(401, &errors(32, "Could not authenticate you")));
        let mut client = client(&pool, &connector, direct().with_change(1));
        let counter = Arc::new(MemoryCounter::new());
        client = client.with_counter(counter);

        for _ in 0..5 {
            assert_eq!(fetch(&mut client).await.unwrap().unwrap().session_id, "b");
        }
        assert_eq!(
            pool.status("a").await,
            Some(SessionStatus::Inactive {
                reason: Some("(32) Could not authenticate you".into())
            })
        );
        assert_eq!(connector.calls().iter().filter(|id| *id == "a").count(), 1);
    }

    #[tokio::test]
    async fn bare_403_bans_without_reason() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        connector.push("a", reply(403, ""));
        let mut client = client(&pool, &connector, direct());

        assert_eq!(fetch(&mut client).await.unwrap().unwrap().session_id, "b");
        assert_eq!(
            pool.status("a").await,
            Some(SessionStatus::Inactive { reason: None })
        );
    }

    #[tokio::test]
    async fn dependency_error_skips_request() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        connector.push("a", reply(200, &errors(131, "Dependency: Internal error.")));
        let counter = Arc::new(MemoryCounter::new());
        let mut client = client(&pool, &connector, direct()).with_counter(counter.clone());

        assert!(fetch(&mut client).await.unwrap().is_none());
        assert_eq!(connector.calls(), vec!["a"]);
        assert_eq!(client.active_session(), Some("a"));
        assert_eq!(counter.get(TOTAL_COUNT_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn dependency_error_with_user_data_succeeds() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let body = serde_json::json!({
            "data": { "user": { "result": {} } },
            "errors": [{ "code": 131, "message": "Dependency: Internal error." }],
        });
        connector.push("a", reply(200, &body.to_string()));
        let mut client = client(&pool, &connector, direct());

        assert!(fetch(&mut client).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn connect_failures_exhaust_after_three() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        for _ in 0..3 {
            connector.push("a", Err(TransportError::Connect("refused".into())));
        }
        let mut client = client(&pool, &connector, direct());

        let err = fetch(&mut client).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectExhausted {
                attempts: 3,
                source: TransportError::Connect(_)
            }
        ));
        assert_eq!(connector.calls(), vec!["a"; 3]);
    }

    #[tokio::test]
    async fn connect_failures_below_limit_recover() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        connector.push("a", Err(TransportError::Connect("refused".into())));
        connector.push("a", Err(TransportError::ConnectTimeout("slow".into())));
        let mut client = client(&pool, &connector, direct());

        assert!(fetch(&mut client).await.unwrap().is_some());
        assert_eq!(connector.calls().len(), 3);
    }

    #[tokio::test]
    async fn retries_count_usage_once() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        connector.push("a", rate_limited(unix_now() + 900));
        connector.push("b", Err(TransportError::ReadTimeout("slow".into())));
        let counter = Arc::new(MemoryCounter::new());
        let mut client = client(&pool, &connector, direct()).with_counter(counter.clone());

        let got = fetch(&mut client).await.unwrap().unwrap();
        assert_eq!(got.session_id, "b");
        assert_eq!(connector.calls(), vec!["a", "b", "b"]);
        assert_eq!(counter.get(TOTAL_COUNT_KEY).await.unwrap(), Some(1));
        assert_eq!(counter.get(&session_key("a")).await.unwrap(), None);
        assert_eq!(counter.get(&session_key("b")).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn read_timeouts_retry_same_session() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        for _ in 0..6 {
            connector.push("a", Err(TransportError::ReadTimeout("slow".into())));
        }
        connector.push("a", Err(TransportError::Proxy("tunnel".into())));
        let mut client = client(&pool, &connector, direct());

        let got = fetch(&mut client).await.unwrap().unwrap();
        assert_eq!(got.session_id, "a");
        assert_eq!(connector.calls(), vec!["a"; 8]);
        assert_eq!(connector.opened(), vec!["a"]);
    }

    #[tokio::test]
    async fn repeated_unknown_errors_cool_session_down() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        for _ in 0..3 {
            connector.push("a", Err(TransportError::Other("garbled".into())));
        }
        let mut client = client(&pool, &connector, direct());
        let before = unix_now();

        let got = fetch(&mut client).await.unwrap().unwrap();
        assert_eq!(got.session_id, "b");
        match pool.queue_lock("a", QUEUE).await {
            Some(QueueLock::Until(until)) => assert!(until >= before + 900),
            other => panic!("expected timed lock, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unhandled_status_cools_session_down() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        connector.push("a", reply(503, "<html>unavailable</html>"));
        let mut client = client(&pool, &connector, direct());
        let before = unix_now();

        assert_eq!(fetch(&mut client).await.unwrap().unwrap().session_id, "b");
        assert!(matches!(
            pool.queue_lock("a", QUEUE).await,
            Some(QueueLock::Until(until)) if until >= before + 900
        ));
    }

    #[tokio::test]
    async fn feature_missing_halts_client() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        connector.push(
            "a",
            reply(400, &errors(336, "The following features cannot be null: foo")),
        );
        let mut client = client(&pool, &connector, direct());

        assert!(matches!(
            fetch(&mut client).await,
            Err(Error::FeatureMissing(m)) if m.contains("foo")
        ));
        assert!(client.is_halted());
        assert!(matches!(fetch(&mut client).await, Err(Error::Halted(_))));
        assert_eq!(connector.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn empty_pool_returns_none() {
        let pool = pool(&[]);
        let connector = ScriptedConnector::new();
        let mut client = client(&pool, &connector, direct());
        assert!(fetch(&mut client).await.unwrap().is_none());
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn all_sessions_banned_returns_none() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        connector.push("a", reply(403, ""));
        connector.push("b", reply(403, ""));
        let mut client = client(&pool, &connector, direct());

        assert!(fetch(&mut client).await.unwrap().is_none());
        assert_eq!(connector.calls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn attempt_limit_stops_retrying() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        for _ in 0..3 {
            connector.push("a", Err(TransportError::ReadTimeout("slow".into())));
        }
        let mut client = client(&pool, &connector, direct().with_max_attempts(Some(2)));

        assert!(matches!(
            fetch(&mut client).await,
            Err(Error::AttemptsExhausted(2))
        ));
        assert_eq!(connector.calls().len(), 2);
    }

    #[tokio::test]
    async fn transport_open_failure_releases_session() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        connector.refuse("a");
        let mut client = client(&pool, &connector, direct());

        assert!(matches!(
            fetch(&mut client).await,
            Err(Error::Open { session_id, .. }) if session_id == "a"
        ));
        assert_eq!(pool.queue_lock("a", QUEUE).await, None);
    }

    #[tokio::test]
    async fn direct_mode_switches_every_change_requests() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        let counter = Arc::new(MemoryCounter::new());
        let mut client =
            client(&pool, &connector, direct().with_change(2)).with_counter(counter.clone());

        for _ in 0..4 {
            fetch(&mut client).await.unwrap().unwrap();
        }
        assert_eq!(connector.calls(), vec!["a", "a", "b", "b"]);
        assert_eq!(pool.served("a", QUEUE).await, 2);
        assert_eq!(pool.queue_lock("a", QUEUE).await, None);
    }

    #[tokio::test]
    async fn balanced_mode_picks_least_used() {
        let pool = pool(&["a", "b", "c"]);
        let connector = ScriptedConnector::new();
        let counter = Arc::new(MemoryCounter::new());
        counter
            .set_with_expiry(&session_key("a"), 5, COUNT_WINDOW)
            .await
            .unwrap();
        counter
            .set_with_expiry(&session_key("b"), 2, COUNT_WINDOW)
            .await
            .unwrap();
        let mut client = client(&pool, &connector, ClientOptions::new(QUEUE))
            .with_counter(counter.clone());
        assert_eq!(client.strategy(), Strategy::UsageBalanced);

        assert_eq!(fetch(&mut client).await.unwrap().unwrap().session_id, "c");
        assert_eq!(fetch(&mut client).await.unwrap().unwrap().session_id, "c");
        assert_eq!(counter.get(&session_key("c")).await.unwrap(), Some(2));
        assert_eq!(pool.queue_lock("c", QUEUE).await, Some(QueueLock::InUse));
    }

    #[tokio::test]
    async fn balanced_client_leaves_sessions_held_by_others() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        let mut holder = client(&pool, &connector, direct());
        assert_eq!(fetch(&mut holder).await.unwrap().unwrap().session_id, "a");

        let mut balanced = client(&pool, &connector, ClientOptions::new(QUEUE))
            .with_counter(Arc::new(MemoryCounter::new()));
        assert_eq!(fetch(&mut balanced).await.unwrap().unwrap().session_id, "b");
        balanced.close().await.unwrap();

        assert_eq!(holder.active_session(), Some("a"));
        assert_eq!(pool.queue_lock("a", QUEUE).await, Some(QueueLock::InUse));
        assert_eq!(pool.queue_lock("b", QUEUE).await, None);
        assert!(pool.acquire_session("a", QUEUE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn balanced_client_waits_while_every_session_is_held() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let mut holder = client(&pool, &connector, direct());
        fetch(&mut holder).await.unwrap().unwrap();

        let mut balanced = client(&pool, &connector, ClientOptions::new(QUEUE))
            .with_counter(Arc::new(MemoryCounter::new()));
        let waiting = tokio::time::timeout(Duration::from_millis(50), fetch(&mut balanced)).await;
        assert!(waiting.is_err(), "must not share a session another client holds");
        assert_eq!(connector.calls(), vec!["a"]);

        holder.close().await.unwrap();
        assert_eq!(fetch(&mut balanced).await.unwrap().unwrap().session_id, "a");
        assert_eq!(pool.queue_lock("a", QUEUE).await, Some(QueueLock::InUse));
    }

    #[tokio::test]
    async fn balanced_mode_skips_locked_sessions() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        let counter = Arc::new(MemoryCounter::new());
        counter
            .set_with_expiry(&session_key("b"), 3, COUNT_WINDOW)
            .await
            .unwrap();
        connector.push("a", rate_limited(unix_now() + 600));
        let mut client =
            client(&pool, &connector, ClientOptions::new(QUEUE)).with_counter(counter);

        assert_eq!(fetch(&mut client).await.unwrap().unwrap().session_id, "b");
        assert_eq!(connector.calls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn balanced_without_counter_falls_back_to_direct() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let mut client = client(&pool, &connector, ClientOptions::new(QUEUE));
        assert_eq!(client.strategy(), Strategy::Direct);

        fetch(&mut client).await.unwrap().unwrap();
        assert_eq!(pool.queue_lock("a", QUEUE).await, Some(QueueLock::InUse));
    }

    #[tokio::test]
    async fn counter_outage_does_not_fail_requests() {
        let pool = pool(&["a", "b"]);
        let connector = ScriptedConnector::new();
        let mut client = client(&pool, &connector, ClientOptions::new(QUEUE))
            .with_counter(Arc::new(FailingCounter));

        let got = fetch(&mut client).await.unwrap().unwrap();
        assert_eq!(got.session_id, "a");
    }

    #[tokio::test]
    async fn close_releases_with_success_count() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let mut client = client(&pool, &connector, direct());

        fetch(&mut client).await.unwrap();
        fetch(&mut client).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(client.active_session(), None);
        assert_eq!(pool.queue_lock("a", QUEUE).await, None);
        assert_eq!(pool.served("a", QUEUE).await, 2);
        assert_eq!(connector.closed(), vec!["a"]);

        // Second close is a no-op.
        client.close().await.unwrap();
        assert_eq!(connector.closed(), vec!["a"]);
    }

    #[tokio::test]
    async fn scoped_releases_on_error() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let client = client(&pool, &connector, direct());

        let result: Result<()> = client
            .scoped(|c| {
                Box::pin(async move {
                    c.get(URL, &[]).await?;
                    Err(Error::AttemptsExhausted(0))
                })
            })
            .await;

        assert!(matches!(result, Err(Error::AttemptsExhausted(0))));
        assert_eq!(pool.queue_lock("a", QUEUE).await, None);
    }

    #[tokio::test]
    async fn scoped_returns_value() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let client = client(&pool, &connector, direct());

        let status = client
            .scoped(|c| {
                Box::pin(async move {
                    let got = c.get(URL, &[]).await?;
                    Ok(got.map(|r| r.response.status))
                })
            })
            .await
            .unwrap();
        assert_eq!(status, Some(200));
        assert_eq!(pool.served("a", QUEUE).await, 1);
    }

    #[tokio::test]
    async fn drop_releases_in_background() {
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let mut client = client(&pool, &connector, direct());
        fetch(&mut client).await.unwrap();
        assert_eq!(pool.queue_lock("a", QUEUE).await, Some(QueueLock::InUse));

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(pool.queue_lock("a", QUEUE).await, None);
        assert_eq!(pool.served("a", QUEUE).await, 1);
    }

    #[tokio::test]
    async fn responses_are_dumped_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = pool(&["a"]);
        let connector = ScriptedConnector::new();
        let mut client = client(&pool, &connector, direct())
            .with_dump(DumpSink::new(tmp.path().to_path_buf()));

        fetch(&mut client).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
