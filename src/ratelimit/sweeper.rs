//! Periodic eviction of expired entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::clock::Clock;
use super::store::CounterStore;

/// Spawn a task that deletes entries whose window has already ended.
///
/// Windows are right-open, so an entry whose `reset_time` equals the current
/// millisecond is already expired and is swept too.
///
/// Sweeping only bounds memory; a failed sweep is logged and retried on the
/// next tick. Abort the returned handle to stop the task.
pub fn spawn_sweeper(
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> JoinHandle<()> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(interval);

    tokio::spawn(async move {
        debug!(period = ?period, "Starting entry sweeper");
        while ticks.next().await.is_some() {
            let horizon = clock.now_ms().saturating_add(1);
            match store.sweep(horizon).await {
                Ok(removed) if removed > 0 => {
                    debug!(removed, remaining = store.len(), "Swept expired entries")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Entry sweep failed"),
            }
        }
    })
}
