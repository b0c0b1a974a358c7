//! Request loop state machine
//!
//! Pure state machine: receives the result of one attempt, returns
//! (new_counters, action). The caller (`client.rs`) performs the pool and
//! transport I/O implied by each action.

use transport::{ApiResponse, TransportError};

use crate::classify::Outcome;

/// Consecutive connect failures that end the request with an error.
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Unexpected errors tolerated on one session before it is cooled down.
pub const MAX_UNKNOWN_RETRIES: u32 = 3;

/// Cool-down applied when the upstream gives no reset time (15 minutes).
pub const FALLBACK_LOCK_SECS: i64 = 15 * 60;

/// Retry counters of a single request call. Reset on success and rotation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounters {
    pub unknown: u32,
    pub connection: u32,
}

/// Result of one attempt.
#[derive(Debug)]
pub enum Event {
    /// A response came back and was classified
    Response {
        outcome: Outcome,
        response: ApiResponse,
    },
    /// No response: the transport failed
    Transport(TransportError),
}

/// How the current session goes back to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Available again right away
    Unlock,
    /// Unavailable for this queue until the unix timestamp
    LockUntil(i64),
    /// Out of rotation for good
    Inactive(Option<String>),
}

impl Release {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Release::Unlock => "unlock",
            Release::LockUntil(_) => "lock_until",
            Release::Inactive(_) => "inactive",
        }
    }
}

/// Actions the caller should execute after an attempt
#[derive(Debug)]
pub enum Action {
    /// Hand the response to the caller
    Succeed(ApiResponse),
    /// Release the session as given, pick another one and retry
    Rotate(Release),
    /// Retry on the same session
    RetrySameSession,
    /// Give up on this request; the caller gets no response
    Abort,
    /// Connect failures hit the limit; surface the last one
    Fail(TransportError),
    /// Requests are built wrong; stop the client entirely
    Halt(String),
}

/// Handle one attempt. Pure function: no I/O.
///
/// `now` is the current unix time, used for cool-downs without a reset time.
pub fn handle_event(counters: RetryCounters, event: Event, now: i64) -> (RetryCounters, Action) {
    match event {
        // --- Classified responses ---
        Event::Response {
            outcome: Outcome::Ok,
            response,
        } => (RetryCounters::default(), Action::Succeed(response)),

        Event::Response {
            outcome: Outcome::RateLimited { reset_at },
            ..
        } => (
            RetryCounters::default(),
            Action::Rotate(Release::LockUntil(reset_at)),
        ),

        Event::Response {
            outcome: Outcome::Banned { reason },
            ..
        } => (
            RetryCounters::default(),
            Action::Rotate(Release::Inactive(reason)),
        ),

        Event::Response {
            outcome: Outcome::Aborted,
            ..
        } => (counters, Action::Abort),

        Event::Response {
            outcome: Outcome::UnhandledStatus,
            ..
        } => (
            RetryCounters::default(),
            Action::Rotate(Release::LockUntil(now + FALLBACK_LOCK_SECS)),
        ),

        Event::Response {
            outcome: Outcome::FeatureMissing(message),
            ..
        } => (counters, Action::Halt(message)),

        // --- Transport failures ---
        Event::Transport(TransportError::ReadTimeout(_) | TransportError::Proxy(_)) => {
            (counters, Action::RetrySameSession)
        }

        Event::Transport(
            err @ (TransportError::Connect(_) | TransportError::ConnectTimeout(_)),
        ) => {
            let counters = RetryCounters {
                connection: counters.connection + 1,
                ..counters
            };
            if counters.connection >= MAX_CONNECT_RETRIES {
                (counters, Action::Fail(err))
            } else {
                (counters, Action::RetrySameSession)
            }
        }

        Event::Transport(TransportError::Other(_)) => {
            let counters = RetryCounters {
                unknown: counters.unknown + 1,
                ..counters
            };
            if counters.unknown >= MAX_UNKNOWN_RETRIES {
                (
                    RetryCounters::default(),
                    Action::Rotate(Release::LockUntil(now + FALLBACK_LOCK_SECS)),
                )
            } else {
                (counters, Action::RetrySameSession)
            }
        }
    }
}
