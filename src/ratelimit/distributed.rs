//! Distributed counter store using Chitchat cluster state.
//!
//! This module provides a counter store that shares rate limit windows
//! across multiple nodes through gossip-based state synchronization.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::entry::RateLimitEntry;
use super::store::{CounterStore, UpdateFn};
use crate::error::Result;
use crate::mesh::Cluster;

/// A counter store backed by Chitchat cluster state.
///
/// Each node publishes only its own share of a window and sums the shares of
/// every live node when checking. Gossip is eventually consistent: between
/// rounds, nodes may each admit up to the limit, so the cluster bounds the
/// global quota rather than enforcing it exactly. Updates on one node are
/// serialized by the chitchat state lock, and a round-trip to the cluster
/// state blocks the check instead of failing open.
#[derive(Debug)]
pub struct MeshStore {
    cluster: Arc<Cluster>,
}

impl MeshStore {
    /// Create a new mesh store over a running cluster.
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self { cluster }
    }

    /// Get the cluster.
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Get the number of live nodes in the cluster.
    pub async fn live_node_count(&self) -> usize {
        self.cluster.live_node_count().await
    }
}

#[async_trait]
impl CounterStore for MeshStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>> {
        Ok(self.cluster.entry(key).await)
    }

    async fn update(&self, key: &str, apply: &UpdateFn) -> Result<Option<RateLimitEntry>> {
        trace!(identifier = key, "Updating distributed entry");
        Ok(self.cluster.update_entry(key, apply).await)
    }

    /// Only this node's share is withdrawn; peers keep theirs until their
    /// windows expire.
    async fn remove(&self, key: &str) -> Result<()> {
        self.cluster.remove_local(key).await;
        Ok(())
    }

    async fn sweep(&self, horizon_ms: u64) -> Result<usize> {
        Ok(self.cluster.sweep_local(horizon_ms).await)
    }

    fn len(&self) -> usize {
        self.cluster.local_key_count()
    }
}
