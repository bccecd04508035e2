use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::producer::OrderedBatchProducer;

/// Fire `producer.on_tick()` every `period`, first one a full period after start.
///
/// Every tick runs as its own task, so a slow batch neither delays nor
/// cancels the next one. On cancellation no new ticks start and batches
/// still in flight are awaited.
pub fn spawn_periodic(
    producer: Arc<OrderedBatchProducer>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut batches = JoinSet::new();
        let mut fired = 0u64;

        tracing::info!(period_ms = period.as_millis() as u64, "scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    fired += 1;
                    tracing::debug!(tick = fired, in_flight = batches.len(), "tick");
                    let producer = producer.clone();
                    batches.spawn(async move { producer.on_tick().await });
                }
                Some(joined) = batches.join_next(), if !batches.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "batch task panicked");
                    }
                }
                _ = token.cancelled() => break,
            }
        }

        tracing::info!(in_flight = batches.len(), "scheduler stopping, draining batches");
        while batches.join_next().await.is_some() {}
        tracing::info!(ticks = fired, "scheduler stopped");
    })
}
