//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::ratewarden::v1::rate_limit_service_server::RateLimitServiceServer;
use super::service::RateLimitServiceImpl;
use crate::error::{Result, WardenError};
use crate::ratelimit::RouteLimiters;

/// gRPC server for the rate limit service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The route class limiters
    limiters: Arc<RouteLimiters>,
}

impl GrpcServer {
    /// Create a new gRPC server.
    pub fn new(addr: SocketAddr, limiters: Arc<RouteLimiters>) -> Self {
        Self { addr, limiters }
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = RateLimitServiceImpl::new(self.limiters);

        info!(
            addr = %self.addr,
            "Starting gRPC server for RateLimitService with graceful shutdown"
        );

        Server::builder()
            .add_service(RateLimitServiceServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                WardenError::Grpc(e)
            })
    }
}
