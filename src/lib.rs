//! Ratewarden - Fixed-Window Request Rate Limiting
//!
//! This crate implements a per-identifier fixed-window rate limiter and a
//! gRPC decision service that HTTP interceptors consult once per request.
//! Counters live in process memory by default or are shared between nodes
//! over a gossip mesh.

pub mod config;
pub mod error;
pub mod grpc;
pub mod mesh;
pub mod ratelimit;
