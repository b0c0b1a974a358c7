//! Response dumps for debugging
//!
//! Writes every received response to its own numbered file. Failures to write
//! are logged and never affect the request.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};
use transport::ApiResponse;

use crate::classify::RateLimit;

/// Directory sink for raw responses.
#[derive(Debug)]
pub struct DumpSink {
    dir: PathBuf,
    written: AtomicU64,
}

impl DumpSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: AtomicU64::new(0),
        }
    }

    /// Sink in a fresh timestamped directory under the system temp dir.
    pub fn in_temp_dir() -> Self {
        let dir = std::env::temp_dir().join(format!("queue-client-{}", common::unix_now()));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for one response; the session id is reduced to filename-safe characters.
    fn path_for(&self, index: u64, status: u16, session_id: &str) -> PathBuf {
        let session: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{index:05}_{status}_{session}.txt"))
    }

    /// Write one response. Returns the file path on success.
    pub async fn write(&self, response: &ApiResponse, session_id: &str) -> Option<PathBuf> {
        let index = self.written.fetch_add(1, Ordering::Relaxed);
        let path = self.path_for(index, response.status, session_id);
        let contents = render(index, response, session_id);

        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&path, contents).await
        }
        .await;

        match result {
            Ok(()) => {
                debug!(path = %path.display(), "response dumped");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to dump response");
                None
            }
        }
    }
}

/// Dump file contents: index and rate-limit label, status line, headers, body.
/// JSON bodies are pretty-printed, anything else is written as received.
pub fn render(index: u64, response: &ApiResponse, session_id: &str) -> String {
    let label = RateLimit::from_response(response).label(session_id);
    let mut out = format!(
        "{index} - {label}\n{} {} {}\n\n",
        response.status, response.method, response.url
    );
    for (name, value) in &response.headers {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(value.to_str().unwrap_or("<binary>"));
        out.push('\n');
    }
    out.push('\n');
    match response
        .json()
        .and_then(|body| serde_json::to_string_pretty(&body))
    {
        Ok(pretty) => out.push_str(&pretty),
        Err(_) => out.push_str(&response.text()),
    }
    out.push('\n');
    out
}
