//! Sessions file loading
//!
//! JSON array of sessions:
//! `[{"id": "alice", "proxy": null, "headers": [{"name": "cookie", "value": "..."}]}]`

use session_pool::Session;
use std::path::Path;
use tracing::warn;

/// Read and validate the sessions file.
pub fn load(path: &Path) -> common::Result<Vec<Session>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!(
            "failed to read sessions_file {}: {e}",
            path.display()
        ))
    })?;
    let sessions: Vec<Session> = serde_json::from_str(&contents)?;

    if let Some(pos) = sessions.iter().position(|s| s.id.trim().is_empty()) {
        return Err(common::Error::Config(format!(
            "session at index {pos} has an empty id"
        )));
    }

    if sessions.is_empty() {
        warn!(path = %path.display(), "sessions file lists no sessions");
    }
    for session in &sessions {
        if session.headers.is_empty() {
            warn!(session_id = %session.id, "session has no credential headers");
        }
        for header in session.headers.iter().filter(|h| h.value.is_blank()) {
            warn!(session_id = %session.id, header = %header.name, "credential header is blank");
        }
    }

    Ok(sessions)
}
