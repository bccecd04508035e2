use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use relay_api::{
    DelayStrategy, HandlerError, HandlingState, InFlightHandling, InboundSource,
    LifecycleObserver, MessageHandler,
};

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Length of one delay unit handed out by the [`DelayStrategy`].
    pub time_unit: Duration,
    /// Cap on concurrently handled messages. `None` spawns one task per
    /// message without limit.
    pub max_in_flight: Option<usize>,
    /// Capacity of the merged completion channel.
    pub completion_buffer: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            time_unit: Duration::from_secs(1),
            max_in_flight: None,
            completion_buffer: 1024,
        }
    }
}

/// Default handler: the work is only the simulated delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedHandler;

impl MessageHandler for SimulatedHandler {
    fn handle<'a>(
        &'a self,
        handling: &'a InFlightHandling,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(handling.simulated_delay()).await;
            Ok(())
        })
    }
}

/// Logs every lifecycle transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn on_transition(&self, handling: &InFlightHandling) {
        let seq = handling.seq();
        let payload = handling.payload();
        match handling.state() {
            HandlingState::Arrived => tracing::info!(
                seq,
                payload,
                delay_ms = handling.simulated_delay().as_millis() as u64,
                "incoming"
            ),
            HandlingState::Handling => tracing::debug!(seq, payload, "handling"),
            HandlingState::Handled => tracing::info!(seq, payload, "handled"),
            HandlingState::Consumed => tracing::info!(
                seq,
                payload,
                latency_ms = handling.started_at().elapsed().as_millis() as u64,
                "consumed"
            ),
            HandlingState::Failed => tracing::warn!(seq, payload, "handling failed"),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    arrived: AtomicU64,
    handled: AtomicU64,
    consumed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time counters of a consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub arrived: u64,
    pub handled: u64,
    pub consumed: u64,
    pub failed: u64,
}

impl Counters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            arrived: self.arrived.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// One message that went all the way to `Consumed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed {
    pub seq: u64,
    pub payload: i64,
    pub simulated_delay: Duration,
}

/// Handles every inbound message in its own task and merges the results in
/// completion order.
///
/// No ordering is kept across messages: a later arrival with a shorter delay
/// completes first. A failing or panicking handler only affects its own
/// message.
pub struct ConcurrentConsumer {
    handler: Arc<dyn MessageHandler>,
    delays: Arc<Mutex<Box<dyn DelayStrategy>>>,
    observer: Arc<dyn LifecycleObserver>,
    options: ConsumerOptions,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for ConcurrentConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentConsumer")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConcurrentConsumer {
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        delays: Box<dyn DelayStrategy>,
        observer: Arc<dyn LifecycleObserver>,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            handler,
            delays: Arc::new(Mutex::new(delays)),
            observer,
            options,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Subscribe to `source` and return the merged completion stream.
    ///
    /// The stream ends once the source ends and every in-flight message has
    /// settled. Dropping it stops intake.
    pub async fn consume(&self, source: &dyn InboundSource) -> Result<Completions, EngineError> {
        let mut inbound = source.subscribe().await?;
        let (tx, rx) = mpsc::channel::<InFlightHandling>(self.options.completion_buffer.max(1));

        let handler = self.handler.clone();
        let delays = self.delays.clone();
        let observer = self.observer.clone();
        let counters = self.counters.clone();
        let time_unit = self.options.time_unit;
        let limit = self
            .options
            .max_in_flight
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        let intake = CancellationToken::new();
        let stop = intake.clone();

        tokio::spawn(async move {
            let mut seq = 0u64;
            loop {
                // With a cap, intake waits for a free slot before pulling the
                // next message, so a saturated consumer leaves the rest queued.
                let permit = match &limit {
                    Some(limit) => tokio::select! {
                        permit = limit.clone().acquire_owned() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => break,
                        },
                        _ = stop.cancelled() => break,
                        _ = tx.closed() => break,
                    },
                    None => None,
                };

                let message = tokio::select! {
                    message = inbound.next() => message,
                    _ = stop.cancelled() => None,
                    _ = tx.closed() => None,
                };
                let Some(message) = message else { break };

                seq += 1;
                let units = delays.lock().await.next_delay(&message);
                let mut handling =
                    InFlightHandling::arrived(seq, message, time_unit.saturating_mul(units));
                counters.arrived.fetch_add(1, Ordering::Relaxed);
                observer.on_transition(&handling);

                let handler = handler.clone();
                let observer = observer.clone();
                let counters = counters.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    transition(&mut handling, HandlingState::Handling, &*observer);

                    let result = AssertUnwindSafe(handler.handle(&handling))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));

                    match result {
                        Ok(()) => {
                            transition(&mut handling, HandlingState::Handled, &*observer);
                            counters.handled.fetch_add(1, Ordering::Relaxed);
                            if let Err(mpsc::error::SendError(handling)) = tx.send(handling).await {
                                tracing::warn!(
                                    seq = handling.seq(),
                                    payload = handling.payload(),
                                    "completion stream closed, result dropped"
                                );
                            }
                        }
                        Err(e) => {
                            transition(&mut handling, HandlingState::Failed, &*observer);
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                seq = handling.seq(),
                                payload = handling.payload(),
                                error = %e,
                                "handler failure isolated"
                            );
                        }
                    }
                });
            }
            tracing::info!(arrived = seq, "intake stopped");
        });

        Ok(Completions {
            rx,
            intake,
            observer: self.observer.clone(),
            counters: self.counters.clone(),
        })
    }

    /// Drain `source` for the lifetime of the process, or until `token` fires.
    ///
    /// Cancellation only stops intake: messages already arrived keep running
    /// and are consumed before this returns.
    pub async fn run(
        &self,
        source: &dyn InboundSource,
        token: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut completions = self.consume(source).await?;
        let mut draining = false;
        loop {
            tokio::select! {
                completed = completions.next() => {
                    if completed.is_none() {
                        break;
                    }
                }
                _ = token.cancelled(), if !draining => {
                    draining = true;
                    let stats = self.stats();
                    tracing::info!(
                        in_flight = stats.arrived.saturating_sub(stats.consumed + stats.failed),
                        "stopping intake, draining in-flight messages"
                    );
                    completions.close();
                }
            }
        }
        let stats = self.stats();
        tracing::info!(
            arrived = stats.arrived,
            consumed = stats.consumed,
            failed = stats.failed,
            "consumer stopped"
        );
        Ok(())
    }
}

fn transition(handling: &mut InFlightHandling, next: HandlingState, observer: &dyn LifecycleObserver) {
    match handling.advance(next) {
        Ok(_) => observer.on_transition(handling),
        Err(e) => tracing::error!(error = %e, "lifecycle violation"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Merged completion stream of a [`ConcurrentConsumer`], in completion order.
///
/// Taking an item off the stream is what moves a message to `Consumed`.
pub struct Completions {
    rx: mpsc::Receiver<InFlightHandling>,
    intake: CancellationToken,
    observer: Arc<dyn LifecycleObserver>,
    counters: Arc<Counters>,
}

impl Completions {
    /// Stop pulling from the source. The stream still yields every message
    /// already arrived, then ends.
    pub fn close(&self) {
        self.intake.cancel();
    }

    fn finish(&self, mut handling: InFlightHandling) -> Consumed {
        transition(&mut handling, HandlingState::Consumed, &*self.observer);
        self.counters.consumed.fetch_add(1, Ordering::Relaxed);
        Consumed {
            seq: handling.seq(),
            payload: handling.payload(),
            simulated_delay: handling.simulated_delay(),
        }
    }
}

impl Stream for Completions {
    type Item = Consumed;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(handling)) => Poll::Ready(Some(this.finish(handling))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
