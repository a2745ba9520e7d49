//! Cluster management using Chitchat.
//!
//! This module wraps the chitchat library to provide cluster membership,
//! failure detection, and gossip of rate limit window counts.

use std::net::SocketAddr;
use std::time::Duration;

use chitchat::transport::UdpTransport;
use chitchat::{
    spawn_chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig,
};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::ratelimit::{RateLimitEntry, UpdateFn};

const KEY_PREFIX: &str = "counter|";

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to start cluster: {0}")]
    StartError(String),
    #[error("Failed to shut down cluster: {0}")]
    ShutdownError(String),
}

/// Configuration for the cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Unique node identifier.
    pub node_id: String,
    /// The address to listen on for gossip.
    pub listen_addr: SocketAddr,
    /// The address to advertise to other nodes.
    pub advertise_addr: SocketAddr,
    /// Seed nodes to bootstrap cluster membership.
    pub seed_nodes: Vec<String>,
    /// Cluster identifier (nodes must have matching cluster IDs).
    pub cluster_id: String,
    /// How often to gossip with peers.
    pub gossip_interval: Duration,
    /// Grace period before considering a dead node's state deletable.
    pub dead_node_grace_period: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let default_addr = SocketAddr::from(([0, 0, 0, 0], 7946));
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            listen_addr: default_addr,
            advertise_addr: default_addr,
            seed_nodes: Vec::new(),
            cluster_id: "ratewarden".to_string(),
            gossip_interval: Duration::from_millis(100),
            dead_node_grace_period: Duration::from_secs(3600),
        }
    }
}

/// One node's share of an identifier's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution {
    /// Reset time of the window this count belongs to (epoch ms).
    pub reset_time: u64,
    /// Requests this node admitted in that window.
    pub count: u64,
}

impl Contribution {
    /// Encode as a chitchat value: `"{reset_time}|{count}"`.
    pub fn encode(&self) -> String {
        format!("{}|{}", self.reset_time, self.count)
    }

    pub fn decode(value: &str) -> Option<Self> {
        let (reset_time, count) = value.split_once('|')?;
        Some(Self {
            reset_time: reset_time.parse().ok()?,
            count: count.parse().ok()?,
        })
    }
}

/// Convert an identifier to its chitchat key.
pub fn counter_key(identifier: &str) -> String {
    format!("{}{}", KEY_PREFIX, identifier)
}

/// Merge the contributions for one identifier into a single entry.
///
/// Only the newest window counts; contributions left over from earlier windows
/// are ignored.
pub fn merge_contributions<I>(contributions: I) -> Option<RateLimitEntry>
where
    I: IntoIterator<Item = Contribution>,
{
    contributions
        .into_iter()
        .fold(None, |merged: Option<RateLimitEntry>, c| match merged {
            Some(e) if e.reset_time > c.reset_time => Some(e),
            Some(e) if e.reset_time == c.reset_time => Some(RateLimitEntry {
                count: e.count + c.count,
                reset_time: e.reset_time,
            }),
            _ => Some(RateLimitEntry {
                count: c.count,
                reset_time: c.reset_time,
            }),
        })
}

/// The cluster handle for distributed state management.
pub struct Cluster {
    /// Our node ID.
    node_id: String,
    /// Chitchat handle.
    handle: ChitchatHandle,
    /// Keys this node has published, with their window reset times.
    own_keys: DashMap<String, u64>,
    config: ClusterConfig,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("node_id", &self.node_id)
            .field("config", &self.config)
            .finish()
    }
}

impl Cluster {
    /// Create and start a new cluster node.
    pub async fn start(config: ClusterConfig) -> Result<Self, ClusterError> {
        info!(
            node_id = %config.node_id,
            listen_addr = %config.listen_addr,
            advertise_addr = %config.advertise_addr,
            seed_nodes = ?config.seed_nodes,
            cluster_id = %config.cluster_id,
            "Starting cluster node"
        );

        let chitchat_id = ChitchatId {
            node_id: config.node_id.clone(),
            generation_id: 0,
            gossip_advertise_addr: config.advertise_addr,
        };

        let chitchat_config = ChitchatConfig {
            chitchat_id,
            cluster_id: config.cluster_id.clone(),
            gossip_interval: config.gossip_interval,
            listen_addr: config.listen_addr,
            seed_nodes: config.seed_nodes.clone(),
            failure_detector_config: FailureDetectorConfig {
                initial_interval: config.gossip_interval,
                ..Default::default()
            },
            marked_for_deletion_grace_period: config.dead_node_grace_period,
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let transport = UdpTransport;
        let handle = spawn_chitchat(chitchat_config, Vec::new(), &transport)
            .await
            .map_err(|e| ClusterError::StartError(e.to_string()))?;

        info!("Cluster node started successfully");

        Ok(Self {
            node_id: config.node_id.clone(),
            handle,
            own_keys: DashMap::new(),
            config,
        })
    }

    /// Get our node ID.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Apply `apply` to the cluster-wide entry for `identifier`.
    ///
    /// Runs under the chitchat lock, so checks on this node are serialized.
    /// The change is published as this node's own contribution; peers only
    /// learn of it on the next gossip round. Returns the entry as observed
    /// before the update.
    pub async fn update_entry(
        &self,
        identifier: &str,
        apply: &UpdateFn,
    ) -> Option<RateLimitEntry> {
        let key = counter_key(identifier);
        let chitchat_arc = self.handle.chitchat();
        let mut chitchat = chitchat_arc.lock().await;

        let previous = Self::merged_entry(&chitchat, &key);
        let Some(next) = apply(previous) else {
            return previous;
        };

        let already_counted = match previous {
            Some(p) if p.reset_time == next.reset_time => p.count,
            _ => 0,
        };
        let delta = next.count.saturating_sub(already_counted);

        let own = chitchat
            .self_node_state()
            .get(&key)
            .and_then(Contribution::decode);
        let own_count = match own {
            Some(c) if c.reset_time == next.reset_time => c.count + delta,
            _ => delta,
        };

        let contribution = Contribution {
            reset_time: next.reset_time,
            count: own_count,
        };
        chitchat.self_node_state().set(&key, contribution.encode());
        self.own_keys.insert(key.clone(), next.reset_time);

        debug!(
            key = %key,
            local_count = own_count,
            reset_time = next.reset_time,
            "Published local contribution"
        );

        previous
    }

    /// Get the cluster-wide entry for an identifier.
    pub async fn entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        let key = counter_key(identifier);
        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;
        Self::merged_entry(&chitchat, &key)
    }

    /// Withdraw this node's contribution for an identifier.
    pub async fn remove_local(&self, identifier: &str) {
        let key = counter_key(identifier);
        let chitchat_arc = self.handle.chitchat();
        let mut chitchat = chitchat_arc.lock().await;
        if self.own_keys.remove(&key).is_some() {
            chitchat.self_node_state().delete(&key);
        }
    }

    /// Delete this node's contributions for windows that ended before `horizon_ms`.
    pub async fn sweep_local(&self, horizon_ms: u64) -> usize {
        let expired: Vec<String> = self
            .own_keys
            .iter()
            .filter(|e| *e.value() < horizon_ms)
            .map(|e| e.key().clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let chitchat_arc = self.handle.chitchat();
        let mut chitchat = chitchat_arc.lock().await;
        let mut removed = 0;
        for key in expired {
            // Re-check under the lock: the key may have moved to a new window.
            if self
                .own_keys
                .remove_if(&key, |_, reset| *reset < horizon_ms)
                .is_some()
            {
                chitchat.self_node_state().delete(&key);
                removed += 1;
            }
        }
        removed
    }

    /// Number of identifiers this node currently publishes.
    pub fn local_key_count(&self) -> usize {
        self.own_keys.len()
    }

    /// Merge every live node's contribution for a key.
    fn merged_entry(chitchat: &chitchat::Chitchat, key: &str) -> Option<RateLimitEntry> {
        let contributions = chitchat.live_nodes().filter_map(|node_id| {
            chitchat
                .node_state(node_id)
                .and_then(|state| state.get(key))
                .and_then(Contribution::decode)
        });
        merge_contributions(contributions)
    }

    /// Get the number of live nodes in the cluster.
    pub async fn live_node_count(&self) -> usize {
        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;
        chitchat.live_nodes().count()
    }

    /// Shutdown the cluster node gracefully.
    pub async fn shutdown(self) -> Result<(), ClusterError> {
        info!(node_id = %self.node_id, "Shutting down cluster node");
        self.handle
            .shutdown()
            .await
            .map_err(|e| ClusterError::ShutdownError(format!("{:?}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(port: u16) -> ClusterConfig {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        ClusterConfig {
            node_id: format!("test-node-{}", port),
            listen_addr: addr,
            advertise_addr: addr,
            seed_nodes: Vec::new(),
            cluster_id: "test-cluster".to_string(),
            gossip_interval: Duration::from_millis(50),
            dead_node_grace_period: Duration::from_secs(60),
        }
    }

    fn bump(current: Option<RateLimitEntry>) -> Option<RateLimitEntry> {
        match current {
            Some(e) if e.reset_time > 1_000 => Some(RateLimitEntry { count: e.count + 1, ..e }),
            _ => Some(RateLimitEntry::open(1_000, 60_000)),
        }
    }

    #[test]
    fn test_counter_key() {
        let key = counter_key("auth:203.0.113.7");
        assert_eq!(key, "counter|auth:203.0.113.7");
    }

    #[test]
    fn test_contribution_encoding() {
        let c = Contribution { reset_time: 1_704_067_200_000, count: 7 };
        assert_eq!(c.encode(), "1704067200000|7");
        assert_eq!(Contribution::decode(&c.encode()), Some(c));

        assert!(Contribution::decode("7").is_none());
        assert!(Contribution::decode("a|b").is_none());
    }

    #[test]
    fn test_merge_keeps_newest_window() {
        let merged = merge_contributions(vec![
            Contribution { reset_time: 100, count: 9 },
            Contribution { reset_time: 200, count: 2 },
            Contribution { reset_time: 200, count: 3 },
        ]);
        assert_eq!(merged, Some(RateLimitEntry { count: 5, reset_time: 200 }));

        assert!(merge_contributions(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_cluster_start() {
        let config = test_config(17946);
        let cluster = Cluster::start(config).await.unwrap();

        assert_eq!(cluster.node_id(), "test-node-17946");
        assert_eq!(cluster.live_node_count().await, 1); // Just ourselves

        cluster.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cluster_update_entry() {
        let config = test_config(17947);
        let cluster = Cluster::start(config).await.unwrap();

        let previous = cluster.update_entry("api:10.0.0.1", &bump).await;
        assert!(previous.is_none());

        let previous = cluster.update_entry("api:10.0.0.1", &bump).await;
        assert_eq!(previous.map(|e| e.count), Some(1));

        let entry = cluster.entry("api:10.0.0.1").await.unwrap();
        assert_eq!(entry, RateLimitEntry { count: 2, reset_time: 61_000 });
        assert_eq!(cluster.local_key_count(), 1);

        assert_eq!(cluster.sweep_local(61_001).await, 1);
        assert!(cluster.entry("api:10.0.0.1").await.is_none());

        cluster.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cluster_two_nodes() {
        // Start first node
        let config1 = test_config(17948);
        let cluster1 = Cluster::start(config1).await.unwrap();

        // Start second node with first as seed
        let mut config2 = test_config(17949);
        config2.seed_nodes = vec!["127.0.0.1:17948".to_string()];
        let cluster2 = Cluster::start(config2).await.unwrap();

        // Give them time to discover each other
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(cluster1.live_node_count().await, 2);
        assert_eq!(cluster2.live_node_count().await, 2);

        cluster1.update_entry("general:10.0.0.9", &bump).await;
        cluster1.update_entry("general:10.0.0.9", &bump).await;

        // Give time for gossip
        tokio::time::sleep(Duration::from_millis(300)).await;

        let seen = cluster2.entry("general:10.0.0.9").await.unwrap();
        assert_eq!(seen.count, 2);

        // Node 2 adds to the same window
        cluster2.update_entry("general:10.0.0.9", &bump).await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(cluster1.entry("general:10.0.0.9").await.unwrap().count, 3);
        assert_eq!(cluster2.entry("general:10.0.0.9").await.unwrap().count, 3);

        cluster1.shutdown().await.unwrap();
        cluster2.shutdown().await.unwrap();
    }
}
