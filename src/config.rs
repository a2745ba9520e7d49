//! Configuration management for Ratewarden.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `RATEWARDEN__`-prefixed environment variables (`__` separates sections,
//! e.g. `RATEWARDEN__SERVER__GRPC_ADDR=0.0.0.0:8081`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;
use crate::mesh::ClusterConfig;
use crate::ratelimit::FailurePolicy;

const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Gossip mesh configuration, used when the store is `mesh`
    #[serde(default)]
    pub mesh: MeshConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Which counter store backs the limiters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Per-process memory
    #[default]
    Memory,
    /// Gossip-shared counters across nodes
    Mesh,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the route class rules file; built-in classes are used when unset
    pub rules_path: Option<String>,

    /// Interval between background sweeps of expired entries, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Behavior when the counter store fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Counter store backend
    #[serde(default)]
    pub store: StoreKind,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            sweep_interval_secs: default_sweep_interval(),
            failure_policy: FailurePolicy::default(),
            store: StoreKind::default(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Gossip mesh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Unique node identifier; generated when unset
    pub node_id: Option<String>,

    #[serde(default = "default_gossip_addr")]
    pub listen_addr: SocketAddr,

    /// Address advertised to peers; defaults to `listen_addr`
    pub advertise_addr: Option<SocketAddr>,

    #[serde(default)]
    pub seed_nodes: Vec<String>,

    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    #[serde(default = "default_gossip_interval")]
    pub gossip_interval_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            listen_addr: default_gossip_addr(),
            advertise_addr: None,
            seed_nodes: Vec::new(),
            cluster_id: default_cluster_id(),
            gossip_interval_ms: default_gossip_interval(),
        }
    }
}

fn default_gossip_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7946))
}

fn default_cluster_id() -> String {
    "ratewarden".to_string()
}

fn default_gossip_interval() -> u64 {
    100
}

impl MeshConfig {
    /// Build the cluster configuration for this node.
    pub fn cluster_config(&self) -> ClusterConfig {
        let defaults = ClusterConfig::default();
        ClusterConfig {
            node_id: self.node_id.clone().unwrap_or(defaults.node_id),
            listen_addr: self.listen_addr,
            advertise_addr: self.advertise_addr.unwrap_or(self.listen_addr),
            seed_nodes: self.seed_nodes.clone(),
            cluster_id: self.cluster_id.clone(),
            gossip_interval: Duration::from_millis(self.gossip_interval_ms.max(1)),
            dead_node_grace_period: defaults.dead_node_grace_period,
        }
    }
}

impl WardenConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("mesh.seed_nodes"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
