//! Outbox entries awaiting external publication.

use crate::event::{Event, EventError, ReservationEvent};
use crate::types::{EntryId, PartitionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publication state of an outbox entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    /// Waiting to be published (possibly after a failed attempt)
    Pending,
    /// Delivered to the publish target
    Published,
    /// Parked for an operator after a permanent failure or an exhausted retry budget
    Failed,
}

/// A message to append to the outbox; the store assigns the entry id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxMessage {
    /// Ordering group
    pub partition: PartitionKey,
    /// Versioned event type name
    pub event_type: String,
    /// Serialized event
    pub payload: Vec<u8>,
}

impl OutboxMessage {
    /// Encode a reservation event, partitioned by its resource.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the event cannot be encoded.
    pub fn from_event(event: &ReservationEvent) -> Result<Self, EventError> {
        Ok(Self {
            partition: PartitionKey::from(event.resource_id()),
            event_type: event.event_type().to_string(),
            payload: event.to_bytes()?,
        })
    }
}

/// One durable outbox record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Store-assigned, monotonically increasing id
    pub entry_id: EntryId,
    /// Ordering group
    pub partition: PartitionKey,
    /// Versioned event type name
    pub event_type: String,
    /// Serialized event
    pub payload: Vec<u8>,
    /// Append time
    pub created_at: DateTime<Utc>,
    /// Publication state
    pub publish_state: PublishState,
    /// Publish attempts made so far, successful one included
    pub attempt_count: u32,
    /// Earliest time of the next attempt while `Pending`
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Last publish error
    pub last_error: Option<String>,
    /// Time the entry was published
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// A pending entry built from a message.
    #[must_use]
    pub fn pending(entry_id: EntryId, message: OutboxMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            entry_id,
            partition: message.partition,
            event_type: message.event_type,
            payload: message.payload,
            created_at,
            publish_state: PublishState::Pending,
            attempt_count: 0,
            next_attempt_at: None,
            last_error: None,
            published_at: None,
        }
    }

    /// Whether a pending entry may be attempted at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.publish_state == PublishState::Pending
            && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}
