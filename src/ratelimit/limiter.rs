//! Core rate limiter implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::entry::{evaluate, Decision, RateLimitEntry};
use super::memory::MemoryStore;
use super::store::CounterStore;
use crate::error::{Result, WardenError};

/// What to answer when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request as if it opened a fresh window.
    #[default]
    Open,
    /// Reject the request until the store recovers.
    Closed,
}

impl FailurePolicy {
    fn decision(&self, limit: u64, now: u64, window_ms: u64) -> Decision {
        let reset = now.saturating_add(window_ms);
        match self {
            FailurePolicy::Open => Decision::admit(limit, limit - 1, reset),
            FailurePolicy::Closed => Decision::reject(limit, reset),
        }
    }
}

/// A fixed-window rate limiter admitting `limit` requests per window for each identifier.
///
/// This struct is thread-safe and can be shared across multiple tasks. The
/// entries live in an injected [`CounterStore`], so several limiters may share
/// one store as long as their identifiers are namespaced apart.
pub struct RateLimiter {
    /// Maximum admitted requests per window
    limit: u64,
    /// Window length in milliseconds
    window_ms: u64,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    failure_policy: FailurePolicy,
    /// Epoch ms of the last opportunistic sweep
    last_sweep: AtomicU64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("window_ms", &self.window_ms)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter backed by its own in-memory store and the system clock.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        Self::with_store(
            limit,
            window,
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
        )
    }

    /// Create a rate limiter over an explicit store and clock.
    ///
    /// Fails when `limit` or `window` is zero, or the window does not fit in
    /// epoch milliseconds.
    pub fn with_store(
        limit: u64,
        window: Duration,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if limit == 0 {
            return Err(WardenError::Config(
                "rate limit must allow at least one request per window".to_string(),
            ));
        }

        let window_ms = u64::try_from(window.as_millis()).map_err(|_| {
            WardenError::Config(format!("rate limit window {:?} is too long", window))
        })?;
        if window_ms == 0 {
            return Err(WardenError::Config(
                "rate limit window must be at least one millisecond".to_string(),
            ));
        }

        let last_sweep = AtomicU64::new(clock.now_ms());
        Ok(Self {
            limit,
            window_ms,
            store,
            clock,
            failure_policy: FailurePolicy::default(),
            last_sweep,
        })
    }

    /// Set the policy applied when the store fails.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Check and count one request for `identifier`.
    ///
    /// The read-compare-increment runs as a single atomic store update, and a
    /// rejected request is never counted.
    pub async fn check(&self, identifier: &str) -> Decision {
        let now = self.clock.now_ms();
        self.maybe_sweep(now).await;

        let (limit, window_ms) = (self.limit, self.window_ms);

        trace!(identifier, now, "Checking rate limit");

        let previous = match self
            .store
            .update(identifier, &move |current| {
                evaluate(current, now, limit, window_ms).next
            })
            .await
        {
            Ok(previous) => previous,
            Err(e) => {
                warn!(
                    identifier,
                    error = %e,
                    policy = ?self.failure_policy,
                    "Counter store unavailable, applying failure policy"
                );
                return self.failure_policy.decision(limit, now, window_ms);
            }
        };

        let verdict = evaluate(previous, now, limit, window_ms);

        if previous.map_or(true, |e| e.is_expired(now)) {
            debug!(
                identifier,
                limit,
                reset = verdict.decision.reset,
                "Opened new rate limit window"
            );
        }

        if !verdict.decision.success {
            debug!(identifier, reset = verdict.decision.reset, "Rate limit exceeded");
        }

        verdict.decision
    }

    /// Sweep expired entries at most once per window.
    ///
    /// Failures are logged only; stale entries are handled lazily by `check` anyway.
    async fn maybe_sweep(&self, now: u64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.window_ms {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // Another task won the race and is sweeping.
            return;
        }

        let horizon = now.saturating_sub(self.window_ms);
        match self.store.sweep(horizon).await {
            Ok(removed) if removed > 0 => debug!(removed, horizon, "Evicted expired entries"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Opportunistic sweep failed"),
        }
    }

    /// Get the stored entry for an identifier without counting a request.
    pub async fn entry(&self, identifier: &str) -> Result<Option<RateLimitEntry>> {
        self.store.get(identifier).await
    }

    /// Forget an identifier's window so its next request starts fresh.
    pub async fn reset(&self, identifier: &str) -> Result<()> {
        self.store.remove(identifier).await
    }

    /// Get the configured requests per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::store::UpdateFn;
    use async_trait::async_trait;

    fn manual_limiter(limit: u64, window: Duration) -> (RateLimiter, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::with_store(limit, window, store.clone(), clock.clone()).unwrap();
        (limiter, clock, store)
    }

    /// A store whose backend is always unreachable.
    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<RateLimitEntry>> {
            Err(WardenError::Store("connection refused".to_string()))
        }

        async fn update(&self, _key: &str, _apply: &UpdateFn) -> Result<Option<RateLimitEntry>> {
            Err(WardenError::Store("connection refused".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(WardenError::Store("connection refused".to_string()))
        }

        async fn sweep(&self, _horizon_ms: u64) -> Result<usize> {
            Err(WardenError::Store("connection refused".to_string()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    /// A working store whose sweeps always fail.
    #[derive(Default)]
    struct UnsweepableStore {
        inner: MemoryStore,
        sweeps: AtomicU64,
    }

    #[async_trait]
    impl CounterStore for UnsweepableStore {
        async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>> {
            self.inner.get(key).await
        }

        async fn update(&self, key: &str, apply: &UpdateFn) -> Result<Option<RateLimitEntry>> {
            self.inner.update(key, apply).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }

        async fn sweep(&self, _horizon_ms: u64) -> Result<usize> {
            self.sweeps.fetch_add(1, Ordering::Relaxed);
            Err(WardenError::Store("scan timed out".to_string()))
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_zero_limit_rejected() {
        let result = RateLimiter::new(0, Duration::from_secs(60));
        assert!(matches!(result, Err(WardenError::Config(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = RateLimiter::new(10, Duration::ZERO);
        assert!(matches!(result, Err(WardenError::Config(_))));

        let result = RateLimiter::new(10, Duration::from_micros(999));
        assert!(matches!(result, Err(WardenError::Config(_))));
    }

    #[test]
    fn test_oversized_window_rejected() {
        let result = RateLimiter::new(10, Duration::MAX);
        assert!(matches!(result, Err(WardenError::Config(_))));

        let limiter = RateLimiter::new(10, Duration::from_millis(u64::MAX)).unwrap();
        assert_eq!(limiter.window(), Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn test_admits_under_quota() {
        let (limiter, _clock, _store) = manual_limiter(10, Duration::from_secs(60));

        for expected in (0..10).rev() {
            let decision = limiter.check("general:10.0.0.1").await;
            assert!(decision.success);
            assert_eq!(decision.limit, 10);
            assert_eq!(decision.remaining, expected);
        }
    }

    #[tokio::test]
    async fn test_rejects_over_quota_with_unchanged_reset() {
        let (limiter, clock, _store) = manual_limiter(3, Duration::from_secs(60));

        let mut last = None;
        for _ in 0..3 {
            last = Some(limiter.check("api:1.2.3.4").await);
            clock.advance(Duration::from_millis(10));
        }
        let last = last.unwrap();

        let rejected = limiter.check("api:1.2.3.4").await;
        assert!(!rejected.success);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset, last.reset);
    }

    #[tokio::test]
    async fn test_rejection_does_not_count() {
        let (limiter, _clock, _store) = manual_limiter(2, Duration::from_secs(60));

        limiter.check("k").await;
        limiter.check("k").await;
        for _ in 0..5 {
            let decision = limiter.check("k").await;
            assert!(!decision.success);
            assert_eq!(decision.remaining, 0);
        }

        let entry = limiter.entry("k").await.unwrap().unwrap();
        assert_eq!(entry.count, 2);
    }

    #[tokio::test]
    async fn test_window_resets_after_reset_time() {
        let (limiter, clock, _store) = manual_limiter(2, Duration::from_secs(60));

        limiter.check("k").await;
        let second = limiter.check("k").await;
        assert!(!limiter.check("k").await.success);

        clock.set(second.reset);
        let fresh = limiter.check("k").await;
        assert!(fresh.success);
        assert_eq!(fresh.remaining, 1);
        assert_eq!(fresh.reset, second.reset + 60_000);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let (limiter, _clock, _store) = manual_limiter(1, Duration::from_secs(60));

        assert!(limiter.check("a").await.success);
        assert!(!limiter.check("a").await.success);

        let other = limiter.check("b").await;
        assert!(other.success);
        assert_eq!(other.remaining, 0);
    }

    #[tokio::test]
    async fn test_auth_scenario() {
        let (limiter, clock, _store) = manual_limiter(5, Duration::from_millis(900_000));
        let id = "auth:203.0.113.7";

        let remaining: Vec<u64> = {
            let mut seen = Vec::new();
            for _ in 0..5 {
                let decision = limiter.check(id).await;
                assert!(decision.success);
                seen.push(decision.remaining);
            }
            seen
        };
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let sixth = limiter.check(id).await;
        assert!(!sixth.success);
        assert_eq!(sixth.remaining, 0);

        clock.advance(Duration::from_millis(900_001));
        let seventh = limiter.check(id).await;
        assert!(seventh.success);
        assert_eq!(seventh.remaining, 4);
    }

    #[tokio::test]
    async fn test_general_scenario_with_concurrent_neighbour() {
        let (limiter, _clock, _store) = manual_limiter(100, Duration::from_secs(60));
        let limiter = Arc::new(limiter);

        for _ in 0..100 {
            assert!(limiter.check("general:10.0.0.1").await.success);
        }

        let (hot, neighbour) = tokio::join!(
            limiter.check("general:10.0.0.1"),
            limiter.check("general:10.0.0.2"),
        );
        assert!(!hot.success);
        assert!(neighbour.success);
        assert_eq!(neighbour.remaining, 99);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_over_admit() {
        let (limiter, _clock, _store) = manual_limiter(50, Duration::from_secs(60));
        let limiter = Arc::new(limiter);

        let tasks = (0..200).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check("api:198.51.100.1").await })
        });
        let decisions = futures::future::join_all(tasks).await;

        let admitted = decisions
            .into_iter()
            .map(|d| d.unwrap())
            .filter(|d| d.success)
            .count();
        assert_eq!(admitted, 50);
        assert_eq!(
            limiter.entry("api:198.51.100.1").await.unwrap().unwrap().count,
            50
        );
    }

    #[tokio::test]
    async fn test_opportunistic_sweep_evicts_stale_entries() {
        let (limiter, clock, store) = manual_limiter(5, Duration::from_secs(1));

        limiter.check("stale").await;
        assert_eq!(store.len(), 1);

        // Past reset + window, the next check sweeps "stale" before counting "fresh".
        clock.advance(Duration::from_millis(2_001));
        limiter.check("fresh").await;

        assert!(store.get("stale").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_failure_does_not_change_decisions() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(UnsweepableStore::default());
        let limiter =
            RateLimiter::with_store(2, Duration::from_secs(60), store.clone(), clock.clone())
                .unwrap();

        // Past one window, so this check attempts a sweep first.
        clock.advance(Duration::from_millis(60_001));
        let reset = clock.now_ms() + 60_000;

        let first = limiter.check("api:192.0.2.1").await;
        assert_eq!(store.sweeps.load(Ordering::Relaxed), 1);
        assert!(first.success);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.reset, reset);

        let second = limiter.check("api:192.0.2.1").await;
        assert!(second.success);
        assert_eq!(second.remaining, 0);

        let rejected = limiter.check("api:192.0.2.1").await;
        assert!(!rejected.success);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset, reset);
        assert_eq!(limiter.entry("api:192.0.2.1").await.unwrap().unwrap().count, 2);

        // The failed attempt still counts as this window's sweep.
        assert_eq!(store.sweeps.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_reset_forgets_identifier() {
        let (limiter, _clock, _store) = manual_limiter(1, Duration::from_secs(60));

        limiter.check("k").await;
        assert!(!limiter.check("k").await.success);

        limiter.reset("k").await.unwrap();
        assert!(limiter.check("k").await.success);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open_by_default() {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter =
            RateLimiter::with_store(5, Duration::from_secs(60), Arc::new(UnreachableStore), clock)
                .unwrap();

        // Answered as if the request opened a fresh window.
        let decision = limiter.check("k").await;
        assert!(decision.success);
        assert_eq!(decision.limit, 5);
        assert_eq!(decision.remaining, limiter.limit() - 1);
        assert_eq!(decision.reset, 70_000);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed_when_configured() {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter =
            RateLimiter::with_store(5, Duration::from_secs(60), Arc::new(UnreachableStore), clock)
                .unwrap()
                .with_failure_policy(FailurePolicy::Closed);

        let decision = limiter.check("k").await;
        assert!(!decision.success);
        assert_eq!(decision.remaining, 0);
    }
}
