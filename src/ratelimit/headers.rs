//! Client-visible quota headers and the over-limit response body.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::entry::Decision;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

pub const STATUS_OK: u16 = 200;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, Serialize)]
struct OverLimitBody<'a> {
    error: &'a str,
    message: &'a str,
}

/// Headers an interceptor attaches to the response for a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: String,
    pub remaining: String,
    /// ISO-8601 UTC timestamp of the reset
    pub reset: String,
}

impl RateLimitHeaders {
    pub fn from_decision(decision: &Decision) -> Self {
        Self {
            limit: decision.limit.to_string(),
            remaining: decision.remaining.to_string(),
            reset: format_reset(decision.reset),
        }
    }

    /// Header name/value pairs in a stable order.
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            (HEADER_LIMIT, self.limit.as_str()),
            (HEADER_REMAINING, self.remaining.as_str()),
            (HEADER_RESET, self.reset.as_str()),
        ]
    }
}

/// HTTP status to answer with for a decision.
pub fn status_code(decision: &Decision) -> u16 {
    if decision.success {
        STATUS_OK
    } else {
        STATUS_TOO_MANY_REQUESTS
    }
}

/// JSON body for a rejected request, or `None` when the request was admitted.
pub fn rejection_body(decision: &Decision) -> Option<String> {
    if decision.success {
        return None;
    }
    let body = OverLimitBody {
        error: "Too many requests",
        message: "Rate limit exceeded. Please try again later.",
    };
    serde_json::to_string(&body).ok()
}

/// Render an epoch-millisecond timestamp as ISO-8601, e.g. `2024-01-01T00:15:00.000Z`.
pub fn format_reset(reset_ms: u64) -> String {
    let reset_ms = i64::try_from(reset_ms).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(reset_ms)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
