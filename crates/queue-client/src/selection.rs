//! Session selection strategies
//!
//! Direct: lock a session through the pool and keep it until it has to go.
//! UsageBalanced: rank active sessions by their usage counters and claim the
//! least-used one the pool reports free for the queue.

use session_pool::SessionPool;
use tracing::warn;
use usage_counter::{UsageCounter, session_key};

/// How the client picks its next session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    UsageBalanced,
}

impl Strategy {
    /// Balanced selection needs a counter store; without one the client
    /// falls back to direct acquisition.
    pub fn resolve(balanced: bool, has_counter: bool) -> Self {
        if balanced && has_counter {
            Strategy::UsageBalanced
        } else {
            Strategy::Direct
        }
    }
}

/// Whether the fleet-wide count calls for a session switch.
///
/// Due when the count is a positive multiple of `change`. `last_switch_at` is
/// the count that triggered the previous switch, so one count value triggers at
/// most one switch even when the count does not move between calls.
pub fn rotation_due(total: Option<i64>, change: u32, last_switch_at: Option<i64>) -> bool {
    let change = i64::from(change.max(1));
    match total {
        Some(total) if total > 0 && total % change == 0 => last_switch_at != Some(total),
        _ => false,
    }
}

/// Candidates ordered least-used first.
///
/// Candidates with no usage recorded come first, in candidate order. The rest
/// follow by ascending count, ties kept in candidate order.
pub fn rank_by_usage(candidates: &[(String, Option<i64>)]) -> Vec<&str> {
    let mut ranked: Vec<&(String, Option<i64>)> = candidates.iter().collect();
    ranked.sort_by_key(|(_, usage)| match usage {
        None => (0, 0),
        Some(count) => (1, *count),
    });
    ranked.into_iter().map(|(id, _)| id.as_str()).collect()
}

/// Ids of active sessions, least-used first.
///
/// Counter read failures count as "no usage recorded".
pub async fn sessions_by_usage(
    pool: &dyn SessionPool,
    counter: &dyn UsageCounter,
) -> session_pool::Result<Vec<String>> {
    let sessions = pool.list_active_sessions().await?;
    let mut candidates = Vec::with_capacity(sessions.len());
    for info in sessions.into_iter().filter(|s| s.active) {
        let usage = match counter.get(&session_key(&info.id)).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(session_id = %info.id, error = %e, "usage counter read failed");
                None
            }
        };
        candidates.push((info.id, usage));
    }
    Ok(rank_by_usage(&candidates)
        .into_iter()
        .map(str::to_string)
        .collect())
}
