pub mod channel;
pub mod error;
pub mod handling;
pub mod message;

pub use channel::{DEFAULT_MAX_METADATA_BYTES, InboundSource, OutboundChannel, StreamSource};
pub use error::{ErrorKind, HandlerError, SinkError, SourceError};
pub use handling::{
    DelayStrategy, HandlingState, InFlightHandling, InvalidTransition, LifecycleObserver,
    MessageHandler,
};
pub use message::{Ack, Message, OutgoingMetadata};
