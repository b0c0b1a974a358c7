//! Error types for session pool operations

/// Errors reported by a session pool backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session store error: {0}")]
    Store(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
