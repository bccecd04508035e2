//! Async dataflow core of the relay: flow-controlled ordered emission on one
//! side, concurrent unordered consumption on the other.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod delay;
pub mod error;
pub mod producer;
pub mod sink;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::{MemoryBroker, MemoryQueue, QueueOptions};
pub use consumer::{
    Completions, ConcurrentConsumer, ConsumerOptions, ConsumerStats, Consumed, SimulatedHandler,
    TracingObserver,
};
pub use delay::SeededDelays;
pub use error::{BatchError, EngineError};
pub use producer::{BatchReport, GroupMode, OrderedBatchProducer, ProducerOptions};
pub use sink::{FlowControlledSink, PendingAck, SinkOptions};
pub use trigger::spawn_periodic;
