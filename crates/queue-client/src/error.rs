//! Queue client errors

use transport::TransportError;

/// Errors surfaced by `QueueClient` requests.
///
/// Usage-counter failures never show up here; they are logged and ignored.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Consecutive connect failures on the active session hit the limit
    #[error("connection failed {attempts} times in a row: {source}")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The upstream rejected the request construction; nothing further is sent
    #[error("update required, request is missing features: {0}")]
    FeatureMissing(String),

    /// The client stopped after an earlier `FeatureMissing`
    #[error("client halted: {0}")]
    Halted(String),

    /// The configured attempt ceiling was reached
    #[error("gave up after {0} attempts")]
    AttemptsExhausted(u32),

    /// A transport could not be built for the session
    #[error("cannot open session {session_id}: {source}")]
    Open {
        session_id: String,
        #[source]
        source: TransportError,
    },

    #[error("session pool: {0}")]
    Pool(#[from] session_pool::Error),
}

/// Result type alias for queue client operations
pub type Result<T> = std::result::Result<T, Error>;
