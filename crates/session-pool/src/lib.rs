//! Session pool for credentialed API identities
//!
//! Defines the pool contract the queue client consumes, plus an in-memory
//! implementation. A session is usable by at most one holder per queue at a
//! time; the pool hands it out, takes it back, and remembers why it came back.
//!
//! Session lifecycle (per queue):
//! 1. `acquire_for_queue` or `acquire_session` → session is in use for that queue
//! 2. `release_unlock` → available again, served count recorded
//! 3. `release_lock_until` → unavailable for that queue until a unix timestamp
//! 4. `mark_inactive` → removed from rotation on every queue, permanently

pub mod error;
pub mod memory;

pub use error::{Error, Result};
pub use memory::{MemoryPool, QueueLock, SessionStatus};

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use transport::HeaderInjection;

/// A credentialed identity usable against the upstream API.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    /// Credential headers (cookies, bearer token, csrf token)
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
    /// Proxy this session is pinned to, if any
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Entry of the session listing, in stable pool order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub active: bool,
}

/// Boxed future returned by pool operations.
pub type PoolFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Pool contract consumed by the queue client.
///
/// Implementations must guarantee at most one holder per session per queue.
/// Uses boxed futures for dyn-compatibility (`Arc<dyn SessionPool>`).
pub trait SessionPool: Send + Sync {
    /// Hand out a session for `queue`, suspending until one is free.
    ///
    /// Returns `None` when the pool has no active sessions at all, since
    /// waiting could never succeed.
    fn acquire_for_queue<'a>(&'a self, queue: &'a str) -> PoolFuture<'a, Option<Session>>;

    /// Claim one specific session for `queue` without waiting.
    ///
    /// Returns `None` when the session is unknown, inactive, or already locked
    /// for that queue by anyone, including the caller.
    fn acquire_session<'a>(
        &'a self,
        id: &'a str,
        queue: &'a str,
    ) -> PoolFuture<'a, Option<Session>>;

    /// Look up a session by id, whatever its state.
    fn get_session<'a>(&'a self, id: &'a str) -> PoolFuture<'a, Option<Session>>;

    /// All sessions with their active flag, in stable order.
    fn list_active_sessions(&self) -> PoolFuture<'_, Vec<SessionInfo>>;

    /// Return a session for `queue`; it becomes available again.
    fn release_unlock<'a>(
        &'a self,
        id: &'a str,
        queue: &'a str,
        success_count: u32,
    ) -> PoolFuture<'a, ()>;

    /// Return a session for `queue`, unavailable until `reset_at` (unix seconds).
    fn release_lock_until<'a>(
        &'a self,
        id: &'a str,
        queue: &'a str,
        reset_at: i64,
        success_count: u32,
    ) -> PoolFuture<'a, ()>;

    /// Remove a session from rotation permanently.
    fn mark_inactive<'a>(&'a self, id: &'a str, reason: Option<&'a str>) -> PoolFuture<'a, ()>;
}
