//! Request usage counters with expiry
//!
//! Tracks how many successful requests each session (and the whole client
//! fleet) served inside a rolling 24-hour window. The numbers only steer which
//! session gets picked next; nothing depends on them for correctness, so
//! callers log counter failures and carry on.
//!
//! The store is injected as `Arc<dyn UsageCounter>` so several queue clients can
//! share it. Implementations must make `increment` atomic.

pub mod memory;

pub use memory::MemoryCounter;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Key of the fleet-wide request counter.
pub const TOTAL_COUNT_KEY: &str = "accounts_total_count";

/// Prefix of the per-session request counters.
pub const SESSION_COUNT_PREFIX: &str = "account_req_count_";

/// Lifetime of a counter key from its first increment.
pub const COUNT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Counter key for one session.
pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_COUNT_PREFIX}{session_id}")
}

/// Errors from a counter backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("counter backend unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for counter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed future returned by counter operations.
pub type CounterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Key-value counter store with per-key expiry.
pub trait UsageCounter: Send + Sync {
    /// Current value, `None` when the key is absent or expired.
    fn get<'a>(&'a self, key: &'a str) -> CounterFuture<'a, Option<i64>>;

    /// Overwrite a key and restart its expiry.
    fn set_with_expiry<'a>(&'a self, key: &'a str, value: i64, ttl: Duration)
    -> CounterFuture<'a, ()>;

    /// Atomically add one and return the new value. A key created by this call
    /// expires after `ttl`; an existing key keeps its expiry.
    fn increment<'a>(&'a self, key: &'a str, ttl: Duration) -> CounterFuture<'a, i64>;
}
