//! In-process counter store
//!
//! Expiry runs on the tokio clock so tests can pause and advance time.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::{CounterFuture, UsageCounter};

struct Slot {
    value: i64,
    expires_at: Instant,
}

/// Counter store backed by a mutex-guarded map. Share it via `Arc`.
#[derive(Default)]
pub struct MemoryCounter {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageCounter for MemoryCounter {
    fn get<'a>(&'a self, key: &'a str) -> CounterFuture<'a, Option<i64>> {
        Box::pin(async move {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            let live = slots
                .get(key)
                .map(|slot| (slot.value, slot.expires_at > now));
            match live {
                Some((value, true)) => Ok(Some(value)),
                Some((_, false)) => {
                    trace!(key, "counter expired");
                    slots.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn set_with_expiry<'a>(
        &'a self,
        key: &'a str,
        value: i64,
        ttl: Duration,
    ) -> CounterFuture<'a, ()> {
        Box::pin(async move {
            let mut slots = self.slots.lock().await;
            slots.insert(
                key.to_string(),
                Slot {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        })
    }

    fn increment<'a>(&'a self, key: &'a str, ttl: Duration) -> CounterFuture<'a, i64> {
        Box::pin(async move {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            let slot = slots.entry(key.to_string()).or_insert(Slot {
                value: 0,
                expires_at: now + ttl,
            });
            if slot.expires_at <= now {
                slot.value = 0;
                slot.expires_at = now + ttl;
            }
            slot.value += 1;
            trace!(key, value = slot.value, "counter incremented");
            Ok(slot.value)
        })
    }
}
