//! Wall-clock helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp in seconds.
///
/// Rate-limit reset headers and pool lock deadlines are expressed in unix
/// seconds, so every comparison against them goes through this function.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
