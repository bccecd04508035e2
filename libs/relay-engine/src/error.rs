use relay_api::{SinkError, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

/// An outbound batch stopped at `index`; messages after it were never sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("batch '{group_id}' aborted at message {index} of {batch_size}: {source}")]
pub struct BatchError {
    pub group_id: String,
    pub index: usize,
    pub batch_size: usize,
    #[source]
    pub source: SinkError,
}
