use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{Semaphore, oneshot};

use relay_api::{Ack, Message, OutboundChannel, SinkError};

#[derive(Debug, Clone, Default)]
pub struct SinkOptions {
    /// Give up waiting for an ack after this long. `None` waits forever.
    pub ack_timeout: Option<Duration>,
}

/// Credit-bounded front of an [`OutboundChannel`].
///
/// Each in-flight submission holds one unit of the broker-advertised credit
/// window until the broker settles it. Submissions beyond the window wait
/// for credit instead of being dropped.
pub struct FlowControlledSink {
    channel: Arc<dyn OutboundChannel>,
    credits: Arc<Semaphore>,
    options: SinkOptions,
}

impl std::fmt::Debug for FlowControlledSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowControlledSink")
            .field("queue", &self.channel.name())
            .field("available_credit", &self.credits.available_permits())
            .field("options", &self.options)
            .finish()
    }
}

impl FlowControlledSink {
    pub fn new(channel: Arc<dyn OutboundChannel>, options: SinkOptions) -> Self {
        let window = channel.credit_window();
        if window == 0 {
            tracing::warn!(queue = %channel.name(), "broker advertised zero credit, sends wait for a grant");
        }
        Self {
            channel,
            credits: Arc::new(Semaphore::new(window)),
            options,
        }
    }

    pub fn queue(&self) -> &str {
        self.channel.name()
    }

    /// Credit not currently held by an in-flight submission.
    pub fn available_credit(&self) -> usize {
        self.credits.available_permits()
    }

    /// Broker replenished or widened the window by `credit` units.
    pub fn grant_credit(&self, credit: usize) {
        self.credits.add_permits(credit);
        tracing::debug!(queue = %self.queue(), credit, available = self.available_credit(), "credit granted");
    }

    /// Hand `message` to the broker once credit is available.
    ///
    /// Suspends while the window is exhausted. The returned [`PendingAck`]
    /// resolves when the broker settles the message.
    pub async fn submit(&self, message: Message) -> Result<PendingAck, SinkError> {
        let queue = self.queue().to_string();

        let meta_len = message.metadata().encoded_len();
        let limit = self.channel.max_metadata_bytes();
        if meta_len > limit {
            return Err(SinkError::rejected(
                queue,
                format!("metadata is {meta_len} bytes, limit is {limit}"),
            ));
        }

        let permit = self
            .credits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SinkError::unavailable(&queue, "credit window closed"))?;

        tracing::debug!(
            queue = %queue,
            payload = message.payload(),
            group = ?message.group_id(),
            "submitted"
        );

        let (tx, rx) = oneshot::channel();
        let channel = self.channel.clone();
        let ack_timeout = self.options.ack_timeout;
        tokio::spawn(async move {
            let result = match ack_timeout {
                Some(limit) => match tokio::time::timeout(limit, channel.send(message)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::AckTimeout {
                        queue: channel.name().to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                },
                None => channel.send(message).await,
            };
            // Settled: the credit goes back before the caller sees the outcome.
            drop(permit);
            let _ = tx.send(result);
        });

        Ok(PendingAck { queue, rx })
    }

    /// `submit` and wait for the ack in one step.
    pub async fn send(&self, message: Message) -> Result<Ack, SinkError> {
        self.submit(message).await?.await
    }
}

/// Single-slot completion of one submission.
#[derive(Debug)]
pub struct PendingAck {
    queue: String,
    rx: oneshot::Receiver<Result<Ack, SinkError>>,
}

impl Future for PendingAck {
    type Output = Result<Ack, SinkError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SinkError::unavailable(
                this.queue.clone(),
                "ack slot dropped",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_api::OutgoingMetadata;

    use super::*;
    use crate::testing::{GatedChannel, RecordingChannel, StalledChannel};

    #[tokio::test(start_paused = true)]
    async fn submissions_beyond_window_wait_for_credit() {
        let channel = Arc::new(GatedChannel::new("outbox-events", 2));
        let sink = FlowControlledSink::new(channel.clone(), SinkOptions::default());

        let first = sink.submit(Message::of(0)).await.unwrap();
        let second = sink.submit(Message::of(1)).await.unwrap();
        assert_eq!(sink.available_credit(), 0);

        let third = tokio::time::timeout(Duration::from_secs(5), sink.submit(Message::of(2))).await;
        assert!(third.is_err(), "third submission must wait for credit");

        channel.release(1);
        assert_eq!(first.await.unwrap().delivery_tag, 0);

        let third = sink.submit(Message::of(2)).await.unwrap();
        channel.release(2);
        second.await.unwrap();
        third.await.unwrap();
        assert_eq!(channel.sent(), vec![0, 1, 2]);
        assert_eq!(sink.available_credit(), 2);
    }

    #[tokio::test]
    async fn granted_credit_unblocks_zero_window() {
        let channel = Arc::new(RecordingChannel::new("outbox-events", 0));
        let sink = Arc::new(FlowControlledSink::new(channel.clone(), SinkOptions::default()));

        let pending = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.send(Message::of(9)).await })
        };
        tokio::task::yield_now().await;
        assert!(channel.payloads().is_empty());

        sink.grant_credit(1);
        let ack = pending.await.unwrap().unwrap();
        assert_eq!(ack.queue, "outbox-events");
        assert_eq!(channel.payloads(), vec![9]);
    }

    #[tokio::test]
    async fn oversized_metadata_is_rejected_without_taking_credit() {
        let channel = Arc::new(RecordingChannel::new("outbox-events", 1).with_max_metadata_bytes(4));
        let sink = FlowControlledSink::new(channel.clone(), SinkOptions::default());

        let meta = OutgoingMetadata::builder().with_group_id("too-long").build();
        let err = sink.submit(Message::of(1).with_metadata(meta)).await.unwrap_err();

        assert!(matches!(err, SinkError::Rejected { .. }));
        assert_eq!(sink.available_credit(), 1);
        assert!(channel.payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out_and_returns_credit() {
        let sink = FlowControlledSink::new(
            Arc::new(StalledChannel::new("outbox-events", 1)),
            SinkOptions {
                ack_timeout: Some(Duration::from_millis(250)),
            },
        );

        let err = sink.send(Message::of(1)).await.unwrap_err();
        assert_eq!(
            err,
            SinkError::AckTimeout {
                queue: "outbox-events".into(),
                timeout_ms: 250
            }
        );
        assert_eq!(sink.available_credit(), 1);
    }

    #[tokio::test]
    async fn broker_errors_propagate_unchanged() {
        let channel = Arc::new(RecordingChannel::new("outbox-events", 4).failing_at(
            3,
            SinkError::unavailable("outbox-events", "link detached"),
        ));
        let sink = FlowControlledSink::new(channel, SinkOptions::default());

        sink.send(Message::of(2)).await.unwrap();
        let err = sink.send(Message::of(3)).await.unwrap_err();
        assert_eq!(err, SinkError::unavailable("outbox-events", "link detached"));
        assert_eq!(sink.available_credit(), 4);
    }
}
