//! Peer mesh networking module using Chitchat.
//!
//! This module implements the peer-to-peer mesh network used to share rate
//! limit windows between Ratewarden nodes. Each node gossips its own share of
//! every window and reads the others' shares to compute the cluster total.

mod cluster;

pub use cluster::{
    counter_key, merge_contributions, Cluster, ClusterConfig, ClusterError, Contribution,
};
