//! In-process counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::entry::RateLimitEntry;
use super::store::{CounterStore, UpdateFn};
use crate::error::Result;

/// A counter store held in process memory.
///
/// Updates run under the shard lock of the key's entry, which serializes
/// concurrent checks for the same identifier without a global lock. State is
/// not shared between processes: each process enforces its own quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all entries.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>> {
        Ok(self.entries.get(key).map(|e| *e))
    }

    async fn update(&self, key: &str, apply: &UpdateFn) -> Result<Option<RateLimitEntry>> {
        let previous = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let previous = *occupied.get();
                if let Some(next) = apply(Some(previous)) {
                    occupied.insert(next);
                }
                Some(previous)
            }
            Entry::Vacant(vacant) => {
                if let Some(next) = apply(None) {
                    vacant.insert(next);
                }
                None
            }
        };
        Ok(previous)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn sweep(&self, horizon_ms: u64) -> Result<usize> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.reset_time >= horizon_ms;
            if !keep {
                removed += 1;
            }
            keep
        });
        trace!(removed, horizon_ms, "Swept expired entries");
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
