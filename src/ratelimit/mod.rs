//! Rate limiting logic and state management.

mod clock;
mod distributed;
mod entry;
mod headers;
mod identifier;
mod limiter;
mod memory;
mod routes;
mod rules;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use distributed::MeshStore;
pub use entry::{Decision, RateLimitEntry};
pub use headers::{
    format_reset, rejection_body, status_code, RateLimitHeaders, HEADER_LIMIT, HEADER_REMAINING,
    HEADER_RESET, STATUS_OK, STATUS_TOO_MANY_REQUESTS,
};
pub use identifier::{validate_namespace, Identifier, FALLBACK_CLIENT_IP};
pub use limiter::{FailurePolicy, RateLimiter};
pub use memory::MemoryStore;
pub use routes::{RouteClass, RouteDecision, RouteLimiters};
pub use rules::{RateLimitConfig, RateLimitRule, RouteClassConfig, TimeUnit};
pub use store::{CounterStore, UpdateFn};
pub use sweeper::spawn_sweeper;
