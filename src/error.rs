//! Error types for the Ratewarden service.

use thiserror::Error;

use crate::mesh::ClusterError;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors, including invalid limiter parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// The counter store could not serve a read or update
    #[error("Counter store error: {0}")]
    Store(String),

    /// No route class has the requested name
    #[error("Unknown route class: {0}")]
    UnknownRouteClass(String),

    /// An identifier namespace that cannot be used as a key prefix
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Gossip cluster errors
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for WardenError {
    fn from(err: config::ConfigError) -> Self {
        WardenError::Config(err.to_string())
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
