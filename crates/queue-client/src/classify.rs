//! Response classification
//!
//! Maps one upstream response onto an `Outcome` the request loop acts on. The
//! upstream reports most problems as `{"errors":[{"code":N,"message":"..."}]}`
//! entries, often with a 200 status, so the error entries matter more than the
//! status code. Rate-limit headers are read first because they are the only
//! signal that tells a temporary quota apart from a ban.

use serde_json::Value;
use tracing::{debug, error, trace, warn};
use transport::ApiResponse;

/// Message used when the response carries no error entries.
pub const OK_MESSAGE: &str = "OK";

/// Request construction is missing a feature flag the API now requires.
const FEATURE_MISSING: &str = "(336) The following features cannot be null";

/// Rate-limit error while quota remains: the session is banned, not throttled.
const RATE_LIMIT_BAN: &str = "(88) Rate limit exceeded";

/// Error entries that always mean the session is no longer usable.
const BAN_SIGNATURES: &[&str] = &[
    "(326) Authorization: Denied by access control",
    "(32) Could not authenticate you",
];

/// Upstream-side failure; the request cannot succeed on any session.
const DEPENDENCY_ERROR: &str = "(131) Dependency: Internal error";

/// Requested content is gone. An empty result, not a failure.
const CONTENT_NOT_FOUND: &str = "_Missing: No status found with that ID";

/// Rate-limit headers of a response. Missing or unparseable values are -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: i64,
    pub limit: i64,
    /// Unix timestamp (seconds) at which the quota resets
    pub reset: i64,
}

impl RateLimit {
    pub fn from_response(response: &ApiResponse) -> Self {
        let read = |name: &str| {
            response
                .header(name)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(-1)
        };
        Self {
            remaining: read("x-rate-limit-remaining"),
            limit: read("x-rate-limit-limit"),
            reset: read("x-rate-limit-reset"),
        }
    }

    /// `remaining/limit - session` with both numbers padded to the same width.
    pub fn label(&self, session_id: &str) -> String {
        let remaining = self.remaining.to_string();
        let limit = self.limit.to_string();
        let width = remaining.len().max(limit.len());
        format!("{remaining:>width$}/{limit:>width$} - {session_id}")
    }
}

/// What the request loop should make of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Usable response (possibly empty or carrying tolerated warnings)
    Ok,
    /// Quota exhausted until `reset_at`; the session itself is fine
    RateLimited { reset_at: i64 },
    /// Session is unusable and must leave the rotation
    Banned { reason: Option<String> },
    /// Upstream failure; skip this request without retrying
    Aborted,
    /// Unexpected HTTP status; cool the session down
    UnhandledStatus,
    /// Requests are built wrong; nothing further should be sent
    FeatureMissing(String),
}

impl Outcome {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::RateLimited { .. } => "rate_limited",
            Outcome::Banned { .. } => "banned",
            Outcome::Aborted => "aborted",
            Outcome::UnhandledStatus => "unhandled_status",
            Outcome::FeatureMissing(_) => "feature_missing",
        }
    }
}

/// Classification result with the signals it was derived from.
#[derive(Debug, Clone)]
pub struct Classification {
    pub outcome: Outcome,
    pub rate_limit: RateLimit,
    /// Joined error entries, or `OK_MESSAGE`
    pub message: String,
}

/// Parse the body, falling back to `{"_raw": text}` for non-JSON bodies.
pub fn parse_body(response: &ApiResponse) -> Value {
    response
        .json()
        .unwrap_or_else(|_| serde_json::json!({ "_raw": response.text() }))
}

/// Error entries formatted as `(code) message`, deduplicated in first-seen order.
pub fn error_entries(body: &Value) -> Vec<String> {
    let Some(errors) = body.get("errors").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut entries: Vec<String> = Vec::with_capacity(errors.len());
    for err in errors {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = err.get("message").and_then(Value::as_str).unwrap_or("");
        let entry = format!("({code}) {message}");
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }
    entries
}

/// Classify a response received on `session_id`.
///
/// Precedence: missing feature, rate limit, ban signatures, 403 without errors,
/// dependency error, content-not-found, tolerated 200 warnings, unexpected
/// status, ok.
pub fn classify(response: &ApiResponse, session_id: &str) -> Classification {
    let rate_limit = RateLimit::from_response(response);
    let body = parse_body(response);
    let entries = error_entries(&body);
    let message = if entries.is_empty() {
        OK_MESSAGE.to_string()
    } else {
        entries.join("; ")
    };

    let status = response.status;
    let log_msg = format!(
        "{status:3} - {} - {message}",
        rate_limit.label(session_id)
    );
    trace!("{log_msg}");

    let has = |signature: &str| entries.iter().any(|e| e.starts_with(signature));

    let outcome = if has(FEATURE_MISSING) {
        error!("[DEV] Update required: {message}");
        Outcome::FeatureMissing(message.clone())
    } else if rate_limit.remaining == 0 && rate_limit.reset > 0 {
        debug!("Rate limited: {log_msg}");
        Outcome::RateLimited {
            reset_at: rate_limit.reset,
        }
    } else if (has(RATE_LIMIT_BAN) && rate_limit.remaining > 0)
        || BAN_SIGNATURES.iter().any(|sig| has(sig))
    {
        warn!("Ban detected: {log_msg}");
        Outcome::Banned {
            reason: Some(message.clone()),
        }
    } else if message == OK_MESSAGE && status == 403 {
        warn!("Session expired or banned: {log_msg}");
        Outcome::Banned { reason: None }
    } else if has(DEPENDENCY_ERROR) && !(status == 200 && has_user_data(&body)) {
        warn!("Dependency error (request skipped): {message}");
        Outcome::Aborted
    } else {
        // A dependency error next to real user data is ignored.
        let tolerated = message == OK_MESSAGE || has(DEPENDENCY_ERROR);
        if status == 200 && message.contains(CONTENT_NOT_FOUND) {
            Outcome::Ok
        } else if status == 200 && !tolerated {
            if message.contains("Authorization") {
                warn!("Authorization unknown error: {log_msg}");
            } else {
                warn!("API unknown error: {log_msg}");
            }
            Outcome::Ok
        } else if !(200..400).contains(&status) {
            error!("Unhandled API response code: {log_msg}");
            Outcome::UnhandledStatus
        } else {
            Outcome::Ok
        }
    };

    Classification {
        outcome,
        rate_limit,
        message,
    }
}

fn has_user_data(body: &Value) -> bool {
    body.get("data").and_then(|data| data.get("user")).is_some()
}
