//! Counter store trait for abstracting local and distributed entry storage.

use async_trait::async_trait;

use super::entry::RateLimitEntry;
use crate::error::Result;

/// Read-modify-write step applied atomically to one identifier's entry.
///
/// Receives the stored entry (if any) and returns the entry to write back,
/// or `None` to leave the store untouched.
pub type UpdateFn = dyn Fn(Option<RateLimitEntry>) -> Option<RateLimitEntry> + Send + Sync;

/// Trait for counter store implementations.
///
/// The admission logic lives in the limiter; stores only have to guarantee
/// that `update` is atomic per key, so concurrent checks for one identifier
/// cannot both observe the same count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the entry stored for `key`.
    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>>;

    /// Apply `apply` to the entry for `key` atomically.
    ///
    /// Returns the entry as it was observed before the update.
    async fn update(&self, key: &str, apply: &UpdateFn) -> Result<Option<RateLimitEntry>>;

    /// Drop the entry for `key`.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Delete entries whose `reset_time` is before `horizon_ms`.
    ///
    /// Returns the number of entries removed.
    async fn sweep(&self, horizon_ms: u64) -> Result<usize>;

    /// Number of entries held by this process.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
