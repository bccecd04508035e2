/// Metadata attached to an outgoing message.
///
/// Only the ordering group is modelled: the broker delivers all messages
/// carrying the same `group_id` to a consumer in send order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMetadata {
    group_id: Option<String>,
}

impl OutgoingMetadata {
    pub fn builder() -> OutgoingMetadataBuilder {
        OutgoingMetadataBuilder::default()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Encoded size of the metadata in bytes, checked against the broker limit.
    pub fn encoded_len(&self) -> usize {
        self.group_id.as_ref().map_or(0, String::len)
    }
}

#[derive(Debug, Default)]
pub struct OutgoingMetadataBuilder {
    group_id: Option<String>,
}

impl OutgoingMetadataBuilder {
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn build(self) -> OutgoingMetadata {
        OutgoingMetadata {
            group_id: self.group_id,
        }
    }
}

/// A single relay message: an `i64` payload plus optional metadata.
///
/// Immutable once built; producers and the broker hand messages around by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: i64,
    metadata: OutgoingMetadata,
}

impl Message {
    pub fn of(payload: i64) -> Self {
        Self {
            payload,
            metadata: OutgoingMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: OutgoingMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn payload(&self) -> i64 {
        self.payload
    }

    pub fn metadata(&self) -> &OutgoingMetadata {
        &self.metadata
    }

    pub fn group_id(&self) -> Option<&str> {
        self.metadata.group_id()
    }
}

/// Broker confirmation that a submitted message was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Per-queue, monotonically increasing tag assigned by the channel.
    pub delivery_tag: u64,
    /// Queue that accepted the message.
    pub queue: String,
}
