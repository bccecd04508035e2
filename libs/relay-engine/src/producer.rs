use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use relay_api::{Ack, Message, OutgoingMetadata};

use crate::error::BatchError;
use crate::sink::FlowControlledSink;

/// How a tick picks the ordering group of its batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// `"{prefix}-{tick}"`: every tick is its own group, ticks may overlap.
    #[default]
    PerTick,
    /// The bare prefix for every tick. Overlapping ticks run one after another.
    Fixed,
}

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Messages per batch; payloads are `0..batch_size`.
    pub batch_size: usize,
    pub group_prefix: String,
    pub group_mode: GroupMode,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            group_prefix: "group".into(),
            group_mode: GroupMode::PerTick,
        }
    }
}

/// Outcome of a fully acknowledged batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub group_id: String,
    pub acked: Vec<Ack>,
    pub elapsed: Duration,
}

/// Emits one ordered batch per tick through a [`FlowControlledSink`].
///
/// Message `i + 1` is submitted only after message `i` is acked, so the
/// broker sees the batch in payload order. The first failure aborts the
/// rest of the batch; the next tick starts over with a fresh group.
pub struct OrderedBatchProducer {
    sink: Arc<FlowControlledSink>,
    options: ProducerOptions,
    next_tick: AtomicU64,
    /// Serializes batches that share one group (`GroupMode::Fixed`).
    fixed_group: Mutex<()>,
}

impl std::fmt::Debug for OrderedBatchProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedBatchProducer")
            .field("sink", &self.sink)
            .field("options", &self.options)
            .finish()
    }
}

impl OrderedBatchProducer {
    pub fn new(sink: Arc<FlowControlledSink>, options: ProducerOptions) -> Self {
        Self {
            sink,
            options,
            next_tick: AtomicU64::new(now_ms()),
            fixed_group: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &ProducerOptions {
        &self.options
    }

    /// Build and send one batch. Resolves when every message is acked or
    /// the batch aborts.
    pub async fn on_tick(&self) -> Result<BatchReport, BatchError> {
        let _serial = match self.options.group_mode {
            GroupMode::Fixed => Some(self.fixed_group.lock().await),
            GroupMode::PerTick => None,
        };

        let group_id = self.next_group_id();
        let batch_size = self.options.batch_size;
        let start = Instant::now();
        let mut acked = Vec::with_capacity(batch_size);

        for index in 0..batch_size {
            let metadata = OutgoingMetadata::builder()
                .with_group_id(group_id.clone())
                .build();
            let message = Message::of(index as i64).with_metadata(metadata);

            match self.sink.send(message).await {
                Ok(ack) => {
                    tracing::debug!(
                        queue = %ack.queue,
                        group = %group_id,
                        payload = index,
                        delivery_tag = ack.delivery_tag,
                        "acked"
                    );
                    acked.push(ack);
                }
                Err(e) => {
                    tracing::error!(
                        queue = %self.sink.queue(),
                        group = %group_id,
                        index,
                        dropped = batch_size - index - 1,
                        kind = %e.kind(),
                        error = %e,
                        "batch aborted"
                    );
                    return Err(BatchError {
                        group_id,
                        index,
                        batch_size,
                        source: e,
                    });
                }
            }
        }

        let elapsed = start.elapsed();
        tracing::info!(
            queue = %self.sink.queue(),
            group = %group_id,
            count = acked.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "batch acked"
        );
        Ok(BatchReport {
            group_id,
            acked,
            elapsed,
        })
    }

    fn next_group_id(&self) -> String {
        match self.options.group_mode {
            GroupMode::Fixed => self.options.group_prefix.clone(),
            GroupMode::PerTick => {
                let tick = self.next_tick.fetch_add(1, Ordering::Relaxed);
                format!("{}-{tick}", self.options.group_prefix)
            }
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
