//! Session-rotating API client
//!
//! `QueueClient` sends requests for one named queue through a pool of
//! credentialed sessions. Each response is classified; rate limits, bans and
//! transient failures decide whether the client retries on the same session,
//! rotates to another one, or gives up.
//!
//! Lifecycle:
//! 1. Build with `QueueClient::new(pool, connector, options)`, optionally
//!    `.with_counter(..)` for usage-based switching and `.with_dump(..)`.
//! 2. Call `request` / `get` as often as needed; the held session is reused
//!    until a classification or the switch schedule says otherwise.
//! 3. `close` (or `scoped`) hands the session back to the pool. Dropping a
//!    client that still holds a session releases it on a background task.

pub mod classify;
pub mod client;
pub mod connect;
pub mod decision;
pub mod dump;
pub mod error;
pub mod metrics;
pub mod options;
pub mod selection;

#[cfg(test)]
mod test_support;

pub use classify::{Classification, Outcome, RateLimit, classify};
pub use client::{QueueClient, ScopedFuture, SessionResponse};
pub use connect::{Connector, HttpConnector};
pub use dump::DumpSink;
pub use error::{Error, Result};
pub use options::ClientOptions;
pub use selection::Strategy;
