use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, mpsc};

use relay_api::{
    Ack, DEFAULT_MAX_METADATA_BYTES, InboundSource, Message, OutboundChannel, SinkError,
    SourceError,
};

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Credit advertised to senders on this queue.
    pub credit_window: usize,
    /// Messages the queue buffers before it rejects new ones.
    pub max_depth: usize,
    /// Largest metadata block the queue accepts, in bytes.
    pub max_metadata_bytes: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            credit_window: 16,
            max_depth: 10_000,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
        }
    }
}

/// An in-process broker queue.
///
/// Buffers up to `max_depth` messages; beyond that submissions are rejected.
/// Subscribers compete for messages, so each one is delivered once. A queue
/// with a route forwards everything to its target instead of buffering.
pub struct MemoryQueue {
    name: String,
    options: QueueOptions,
    next_tag: AtomicU64,
    tx: mpsc::Sender<Message>,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    route: RwLock<Option<Arc<MemoryQueue>>>,
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, options: QueueOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.max_depth.max(1));
        Self {
            name: name.into(),
            options,
            next_tag: AtomicU64::new(0),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            route: RwLock::new(None),
        }
    }

    /// Messages waiting for a subscriber.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn routed_to(&self) -> Option<Arc<MemoryQueue>> {
        self.route
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Accept `message` or refuse it; never waits.
    pub fn deliver(&self, message: Message) -> Result<Ack, SinkError> {
        let meta_len = message.metadata().encoded_len();
        if meta_len > self.options.max_metadata_bytes {
            return Err(SinkError::rejected(
                &self.name,
                format!("metadata is {meta_len} bytes, limit is {}", self.options.max_metadata_bytes),
            ));
        }
        if let Some(target) = self.routed_to() {
            target.deliver(message)?;
        } else {
            match self.tx.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(queue = %self.name, depth = self.options.max_depth, "queue full, rejecting");
                    return Err(SinkError::rejected(&self.name, "queue full"));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(SinkError::unavailable(&self.name, "queue closed"));
                }
            }
        }
        Ok(Ack {
            delivery_tag: self.next_tag.fetch_add(1, Ordering::Relaxed),
            queue: self.name.clone(),
        })
    }
}

impl OutboundChannel for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn credit_window(&self) -> usize {
        self.options.credit_window
    }

    fn max_metadata_bytes(&self) -> usize {
        self.options.max_metadata_bytes
    }

    fn send(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, SinkError>> + Send + '_>> {
        let result = self.deliver(message);
        Box::pin(async move { result })
    }
}

impl InboundSource for MemoryQueue {
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<BoxStream<'static, Message>, SourceError>> + Send + '_>>
    {
        let rx = self.rx.clone();
        let name = self.name.clone();
        Box::pin(async move {
            tracing::info!(queue = %name, "subscribed");
            let stream = futures::stream::unfold(rx, |rx| async move {
                let message = rx.lock().await.recv().await;
                message.map(|m| (m, rx))
            });
            Ok(stream.boxed())
        })
    }
}

/// Registry of named [`MemoryQueue`]s.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    queues: RwLock<HashMap<String, Arc<MemoryQueue>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name`, or return it unchanged if it already exists.
    pub fn declare(&self, name: &str, options: QueueOptions) -> Arc<MemoryQueue> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    queue = %name,
                    credit_window = options.credit_window,
                    max_depth = options.max_depth,
                    "declared queue"
                );
                Arc::new(MemoryQueue::new(name, options))
            })
            .clone()
    }

    pub fn queue(&self, name: &str) -> Result<Arc<MemoryQueue>, EngineError> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::QueueNotFound(name.to_string()))
    }

    /// Forward everything sent to `from` into `to`.
    pub fn route(&self, from: &str, to: &str) -> Result<(), EngineError> {
        if from == to {
            return Err(EngineError::Config(format!("queue '{from}' cannot route to itself")));
        }
        let source = self.queue(from)?;
        let target = self.queue(to)?;
        if target.routed_to().is_some() {
            return Err(EngineError::Config(format!("queue '{to}' is already routed, chains are not supported")));
        }
        *source.route.write().unwrap_or_else(PoisonError::into_inner) = Some(target);
        tracing::info!(from = %from, to = %to, "route installed");
        Ok(())
    }

    pub fn queues(&self) -> Vec<String> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}
