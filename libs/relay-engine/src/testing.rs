//! Fake broker links shared by the unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use relay_api::{Ack, DEFAULT_MAX_METADATA_BYTES, Message, OutboundChannel, SinkError};

type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<Ack, SinkError>> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct SendRecord {
    pub payload: i64,
    pub group_id: Option<String>,
    pub started: Instant,
    pub settled: Instant,
}

/// Acks every message after `ack_delay`, recording timing and overlap.
pub struct RecordingChannel {
    name: String,
    window: usize,
    max_metadata_bytes: usize,
    ack_delay: Duration,
    fail_at: Option<(i64, SinkError)>,
    next_tag: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    records: Mutex<Vec<SendRecord>>,
}

impl RecordingChannel {
    pub fn new(name: &str, window: usize) -> Self {
        Self {
            name: name.to_string(),
            window,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
            ack_delay: Duration::ZERO,
            fail_at: None,
            next_tag: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    pub fn with_max_metadata_bytes(mut self, limit: usize) -> Self {
        self.max_metadata_bytes = limit;
        self
    }

    /// Fail the message carrying `payload` with `error`.
    pub fn failing_at(mut self, payload: i64, error: SinkError) -> Self {
        self.fail_at = Some((payload, error));
        self
    }

    pub fn records(&self) -> Vec<SendRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<i64> {
        self.records().iter().map(|r| r.payload).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl OutboundChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn credit_window(&self) -> usize {
        self.window
    }

    fn max_metadata_bytes(&self) -> usize {
        self.max_metadata_bytes
    }

    fn send(&self, message: Message) -> SendFuture<'_> {
        Box::pin(async move {
            let started = Instant::now();
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.ack_delay.is_zero() {
                tokio::time::sleep(self.ack_delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.records.lock().unwrap().push(SendRecord {
                payload: message.payload(),
                group_id: message.group_id().map(str::to_string),
                started,
                settled: Instant::now(),
            });

            if let Some((payload, error)) = &self.fail_at {
                if *payload == message.payload() {
                    return Err(error.clone());
                }
            }
            Ok(Ack {
                delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
                queue: self.name.clone(),
            })
        })
    }
}

/// Holds every message until the test opens the gate.
pub struct GatedChannel {
    name: String,
    window: usize,
    gate: Semaphore,
    next_tag: AtomicU64,
    sent: Mutex<Vec<i64>>,
}

impl GatedChannel {
    pub fn new(name: &str, window: usize) -> Self {
        Self {
            name: name.to_string(),
            window,
            gate: Semaphore::new(0),
            next_tag: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Let `n` waiting messages through, in arrival order.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn sent(&self) -> Vec<i64> {
        self.sent.lock().unwrap().clone()
    }
}

impl OutboundChannel for GatedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn credit_window(&self) -> usize {
        self.window
    }

    fn send(&self, message: Message) -> SendFuture<'_> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(message.payload());
            self.gate
                .acquire()
                .await
                .map_err(|_| SinkError::unavailable(&self.name, "gate closed"))?
                .forget();
            Ok(Ack {
                delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
                queue: self.name.clone(),
            })
        })
    }
}

/// Never settles anything.
pub struct StalledChannel {
    name: String,
    window: usize,
}

impl StalledChannel {
    pub fn new(name: &str, window: usize) -> Self {
        Self {
            name: name.to_string(),
            window,
        }
    }
}

impl OutboundChannel for StalledChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn credit_window(&self) -> usize {
        self.window
    }

    fn send(&self, _message: Message) -> SendFuture<'_> {
        Box::pin(futures::future::pending())
    }
}
