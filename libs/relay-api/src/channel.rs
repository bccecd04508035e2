use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;

use crate::{Ack, Message, SinkError, SourceError};

/// Metadata limit of a broker that does not advertise its own.
pub const DEFAULT_MAX_METADATA_BYTES: usize = 256;

/// Sending half of a broker link (e.g. an AMQP sender on `outbox-events`).
///
/// The transport itself lives outside the relay; implementations only need
/// to deliver one message and resolve once the broker acks or refuses it.
pub trait OutboundChannel: Send + Sync {
    /// Queue address this channel sends to.
    fn name(&self) -> &str;

    /// Number of unacknowledged messages the broker lets this sender keep
    /// in flight.
    fn credit_window(&self) -> usize;

    /// Largest encoded metadata block the broker accepts, in bytes.
    fn max_metadata_bytes(&self) -> usize {
        DEFAULT_MAX_METADATA_BYTES
    }

    /// Hand one message to the broker and wait for its verdict.
    fn send(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, SinkError>> + Send + '_>>;
}

/// Receiving half of a broker link (e.g. an AMQP receiver on `inbox-events`).
pub trait InboundSource: Send + Sync {
    /// Open a new subscription.
    ///
    /// Each call yields an independent, lazy and logically infinite stream.
    /// The source applies no backpressure of its own.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<BoxStream<'static, Message>, SourceError>> + Send + '_>>;
}

type StreamFactory = dyn Fn() -> BoxStream<'static, Message> + Send + Sync;

/// Adapts any `futures::Stream` factory into an [`InboundSource`].
///
/// The factory runs once per subscription, so every subscriber starts its
/// own sequence.
pub struct StreamSource {
    factory: Box<StreamFactory>,
}

impl StreamSource {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> BoxStream<'static, Message> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }
}

impl InboundSource for StreamSource {
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<BoxStream<'static, Message>, SourceError>> + Send + '_>>
    {
        let stream = (self.factory)();
        Box::pin(async move { Ok(stream) })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test]
    fn stream_source_restarts_per_subscription() {
        let source = StreamSource::new(|| futures::stream::iter((0..3).map(Message::of)).boxed());

        let first: Vec<i64> = futures::executor::block_on(async {
            let stream = source.subscribe().await.unwrap();
            stream.map(|m| m.payload()).collect().await
        });
        let second: Vec<i64> = futures::executor::block_on(async {
            let stream = source.subscribe().await.unwrap();
            stream.map(|m| m.payload()).collect().await
        });

        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(second, first);
    }
}
