//! Per-identifier window state and the admission decision it produces.

use serde::{Deserialize, Serialize};

/// Request-count state for one identifier within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    /// Requests counted in the current window
    pub count: u64,
    /// Epoch milliseconds at which the current window ends
    pub reset_time: u64,
}

impl RateLimitEntry {
    /// Open a fresh window at `now` holding a single request.
    pub fn open(now: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_time: now.saturating_add(window_ms),
        }
    }

    /// Windows are right-open, so the reset millisecond itself belongs to the next window.
    pub fn is_expired(&self, now: u64) -> bool {
        self.reset_time <= now
    }
}

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request was admitted
    pub success: bool,
    /// Configured requests per window
    pub limit: u64,
    /// Requests still available in the current window
    pub remaining: u64,
    /// Epoch milliseconds at which quota is next available
    pub reset: u64,
}

impl Decision {
    pub fn admit(limit: u64, remaining: u64, reset: u64) -> Self {
        Self {
            success: true,
            limit,
            remaining,
            reset,
        }
    }

    pub fn reject(limit: u64, reset: u64) -> Self {
        Self {
            success: false,
            limit,
            remaining: 0,
            reset,
        }
    }
}

/// Result of evaluating a request against the stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Verdict {
    /// Entry to write back, `None` when the store must stay untouched
    pub next: Option<RateLimitEntry>,
    pub decision: Decision,
}

/// Fixed-window admission rule.
///
/// This is a pure function of the current entry so any store can apply it
/// inside its own atomic update and the caller can re-derive the same
/// decision from the entry the store observed.
pub(crate) fn evaluate(
    current: Option<RateLimitEntry>,
    now: u64,
    limit: u64,
    window_ms: u64,
) -> Verdict {
    match current {
        Some(entry) if !entry.is_expired(now) => {
            if entry.count >= limit {
                Verdict {
                    next: None,
                    decision: Decision::reject(limit, entry.reset_time),
                }
            } else {
                let next = RateLimitEntry {
                    count: entry.count + 1,
                    reset_time: entry.reset_time,
                };
                Verdict {
                    next: Some(next),
                    decision: Decision::admit(limit, limit - next.count, next.reset_time),
                }
            }
        }
        _ => {
            let next = RateLimitEntry::open(now, window_ms);
            Verdict {
                next: Some(next),
                decision: Decision::admit(limit, limit - 1, next.reset_time),
            }
        }
    }
}
