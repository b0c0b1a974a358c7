//! In-memory session pool with per-queue locks
//!
//! Holds per-session status (Active, Inactive) and per-queue locks (InUse,
//! Until) and hands sessions out round-robin. Lock expiry is lazy: a session
//! locked until a past timestamp is simply free the next time it is scanned.
//!
//! Waiters in `acquire_for_queue` sleep until either a release wakes them or the
//! earliest lock expires, capped by the poll interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::unix_now;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::{PoolFuture, Session, SessionInfo, SessionPool};

/// Longest a waiter sleeps before rescanning the pool.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Lock a session holds for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueLock {
    /// Handed out and not yet released
    InUse,
    /// Unavailable until this unix timestamp (seconds)
    Until(i64),
}

/// Pool-wide status of a session.
///
/// Transitions:
/// - Active → Inactive (ban detected, via `mark_inactive`)
/// - Inactive is terminal for this pool instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Inactive { reason: Option<String> },
}

impl SessionStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Inactive { .. } => "inactive",
        }
    }
}

struct Entry {
    session: Session,
    status: SessionStatus,
    locks: HashMap<String, QueueLock>,
    served: HashMap<String, u64>,
}

impl Entry {
    fn is_free_for(&self, queue: &str, now: i64) -> bool {
        if self.status != SessionStatus::Active {
            return false;
        }
        match self.locks.get(queue) {
            None => true,
            Some(QueueLock::InUse) => false,
            Some(QueueLock::Until(until)) => *until <= now,
        }
    }
}

enum Scan {
    Acquired(Session),
    Busy { next_unlock: Option<i64> },
    NoActive,
}

/// Session pool kept entirely in process memory.
pub struct MemoryPool {
    entries: RwLock<Vec<Entry>>,
    next_index: AtomicUsize,
    released: Notify,
    poll_interval: Duration,
}

impl MemoryPool {
    /// Create a pool with all sessions active. Duplicate ids keep the first entry.
    pub fn new(sessions: Vec<Session>) -> Self {
        let mut entries: Vec<Entry> = Vec::with_capacity(sessions.len());
        for session in sessions {
            if entries.iter().any(|e| e.session.id == session.id) {
                warn!(session_id = %session.id, "duplicate session id, keeping first");
                continue;
            }
            entries.push(Entry {
                session,
                status: SessionStatus::Active,
                locks: HashMap::new(),
                served: HashMap::new(),
            });
        }
        info!(sessions = entries.len(), "session pool initialized");
        Self {
            entries: RwLock::new(entries),
            next_index: AtomicUsize::new(0),
            released: Notify::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override how long waiters sleep between rescans.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Current status of a session.
    pub async fn status(&self, id: &str) -> Option<SessionStatus> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|e| e.session.id == id)
            .map(|e| e.status.clone())
    }

    /// Lock a session currently holds for `queue`, if any.
    pub async fn queue_lock(&self, id: &str, queue: &str) -> Option<QueueLock> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|e| e.session.id == id)
            .and_then(|e| e.locks.get(queue).cloned())
    }

    /// Successful requests a session reported for `queue`.
    pub async fn served(&self, id: &str, queue: &str) -> u64 {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|e| e.session.id == id)
            .and_then(|e| e.served.get(queue).copied())
            .unwrap_or(0)
    }

    /// Pool health summary.
    ///
    /// Status mapping: every session active → healthy, some active → degraded,
    /// none active → unhealthy. Locks are reported per queue.
    pub async fn health(&self) -> serde_json::Value {
        let entries = self.entries.read().await;
        let now = unix_now();

        let mut sessions = Vec::with_capacity(entries.len());
        let mut active = 0usize;
        let mut inactive = 0usize;
        let mut locked = 0usize;

        for entry in entries.iter() {
            let mut locks = serde_json::Map::new();
            let mut has_future_lock = false;
            for (queue, lock) in &entry.locks {
                let value = match lock {
                    QueueLock::InUse => serde_json::json!("in_use"),
                    QueueLock::Until(until) => {
                        if *until > now {
                            has_future_lock = true;
                        }
                        serde_json::json!({ "until": until, "remaining_secs": (*until - now).max(0) })
                    }
                };
                locks.insert(queue.clone(), value);
            }

            match &entry.status {
                SessionStatus::Active => {
                    active += 1;
                    if has_future_lock {
                        locked += 1;
                    }
                }
                SessionStatus::Inactive { .. } => inactive += 1,
            }

            let mut session = serde_json::json!({
                "id": entry.session.id,
                "status": entry.status.label(),
                "locks": locks,
                "served": entry.served,
            });
            if let SessionStatus::Inactive {
                reason: Some(reason),
            } = &entry.status
            {
                session["reason"] = serde_json::json!(reason);
            }
            sessions.push(session);
        }

        let total = entries.len();
        let status = if active == total && total > 0 {
            "healthy"
        } else if active > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "sessions_total": total,
            "sessions_active": active,
            "sessions_locked": locked,
            "sessions_inactive": inactive,
            "sessions": sessions,
        })
    }

    /// One round-robin pass over the pool for `queue`.
    async fn scan(&self, queue: &str) -> Scan {
        let mut entries = self.entries.write().await;
        if !entries.iter().any(|e| e.status == SessionStatus::Active) {
            return Scan::NoActive;
        }

        let n = entries.len();
        let now = unix_now();
        let start = self.next_index.fetch_add(1, Ordering::Relaxed) % n;

        for offset in 0..n {
            let entry = &mut entries[(start + offset) % n];
            if !entry.is_free_for(queue, now) {
                continue;
            }
            if let Some(QueueLock::Until(until)) = entry.locks.get(queue) {
                info!(session_id = %entry.session.id, queue, until, "queue lock expired, session available again");
            }
            entry.locks.insert(queue.to_string(), QueueLock::InUse);
            return Scan::Acquired(entry.session.clone());
        }

        let next_unlock = entries
            .iter()
            .filter(|e| e.status == SessionStatus::Active)
            .filter_map(|e| match e.locks.get(queue) {
                Some(QueueLock::Until(until)) => Some(*until),
                _ => None,
            })
            .min();
        Scan::Busy { next_unlock }
    }

    async fn release(&self, id: &str, queue: &str, lock: Option<i64>, success_count: u32) -> Result<()> {
        {
            let mut entries = self.entries.write().await;
            let entry = entries
                .iter_mut()
                .find(|e| e.session.id == id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            *entry.served.entry(queue.to_string()).or_insert(0) += u64::from(success_count);
            match lock {
                Some(until) => {
                    info!(session_id = id, queue, until, success_count, "session locked for queue");
                    entry.locks.insert(queue.to_string(), QueueLock::Until(until));
                }
                None => {
                    debug!(session_id = id, queue, success_count, "session released");
                    entry.locks.remove(queue);
                }
            }
        }
        self.released.notify_waiters();
        Ok(())
    }
}

impl SessionPool for MemoryPool {
    fn acquire_for_queue<'a>(&'a self, queue: &'a str) -> PoolFuture<'a, Option<Session>> {
        Box::pin(async move {
            loop {
                // Register before scanning so a release between scan and wait is not lost.
                let released = self.released.notified();
                tokio::pin!(released);
                released.as_mut().enable();

                match self.scan(queue).await {
                    Scan::Acquired(session) => {
                        debug!(session_id = %session.id, queue, "session acquired");
                        return Ok(Some(session));
                    }
                    Scan::NoActive => {
                        warn!(queue, "no active sessions in pool");
                        return Ok(None);
                    }
                    Scan::Busy { next_unlock } => {
                        let wait = match next_unlock {
                            Some(until) => self
                                .poll_interval
                                .min(Duration::from_secs((until - unix_now()).max(1) as u64)),
                            None => self.poll_interval,
                        };
                        debug!(queue, wait_ms = wait.as_millis() as u64, "no session free for queue, waiting");
                        let _ = tokio::time::timeout(wait, released).await;
                    }
                }
            }
        })
    }

    fn acquire_session<'a>(
        &'a self,
        id: &'a str,
        queue: &'a str,
    ) -> PoolFuture<'a, Option<Session>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.iter_mut().find(|e| e.session.id == id) else {
                return Ok(None);
            };
            if !entry.is_free_for(queue, unix_now()) {
                debug!(session_id = id, queue, "session not free for queue");
                return Ok(None);
            }
            entry.locks.insert(queue.to_string(), QueueLock::InUse);
            debug!(session_id = id, queue, "session claimed");
            Ok(Some(entry.session.clone()))
        })
    }

    fn get_session<'a>(&'a self, id: &'a str) -> PoolFuture<'a, Option<Session>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries
                .iter()
                .find(|e| e.session.id == id)
                .map(|e| e.session.clone()))
        })
    }

    fn list_active_sessions(&self) -> PoolFuture<'_, Vec<SessionInfo>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries
                .iter()
                .map(|e| SessionInfo {
                    id: e.session.id.clone(),
                    active: e.status == SessionStatus::Active,
                })
                .collect())
        })
    }

    fn release_unlock<'a>(
        &'a self,
        id: &'a str,
        queue: &'a str,
        success_count: u32,
    ) -> PoolFuture<'a, ()> {
        Box::pin(self.release(id, queue, None, success_count))
    }

    fn release_lock_until<'a>(
        &'a self,
        id: &'a str,
        queue: &'a str,
        reset_at: i64,
        success_count: u32,
    ) -> PoolFuture<'a, ()> {
        Box::pin(self.release(id, queue, Some(reset_at), success_count))
    }

    fn mark_inactive<'a>(&'a self, id: &'a str, reason: Option<&'a str>) -> PoolFuture<'a, ()> {
        Box::pin(async move {
            {
                let mut entries = self.entries.write().await;
                let entry = entries
                    .iter_mut()
                    .find(|e| e.session.id == id)
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                warn!(session_id = id, reason = reason.unwrap_or("-"), "session marked inactive");
                entry.status = SessionStatus::Inactive {
                    reason: reason.map(str::to_string),
                };
                entry.locks.retain(|_, lock| *lock != QueueLock::InUse);
            }
            // Waiters may need to notice the pool ran out of active sessions.
            self.released.notify_waiters();
            Ok(())
        })
    }
}
