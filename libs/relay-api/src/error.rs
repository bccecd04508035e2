/// Category of a sink failure. Lets callers tell a refusal by the broker
/// apart from a broken transport without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The broker refused the submission.
    Rejected,
    /// Transport-level failure: link closed, ack lost or never arrived.
    Unavailable,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Rejected => f.write_str("rejected"),
            ErrorKind::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Failure of a single outbound submission. Never retried by the relay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("rejected by '{queue}': {reason}")]
    Rejected { queue: String, reason: String },

    #[error("'{queue}' unavailable: {reason}")]
    Unavailable { queue: String, reason: String },

    #[error("no ack from '{queue}' within {timeout_ms} ms")]
    AckTimeout { queue: String, timeout_ms: u64 },
}

impl SinkError {
    pub fn rejected(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Rejected { .. } => ErrorKind::Rejected,
            SinkError::Unavailable { .. } | SinkError::AckTimeout { .. } => ErrorKind::Unavailable,
        }
    }
}

/// Failure of one inbound handling task. Isolated to that message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    #[error("subscription to '{queue}' failed: {reason}")]
    Subscribe { queue: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_counts_as_unavailable() {
        let err = SinkError::AckTimeout {
            queue: "outbox-events".into(),
            timeout_ms: 10,
        };
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(SinkError::rejected("q", "full").kind(), ErrorKind::Rejected);
    }
}
