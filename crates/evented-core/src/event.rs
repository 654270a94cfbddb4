//! Domain event abstractions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{AggregateKey, Version};
use crate::upgrade::Upgrade;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata<K> {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to. Assigned on publish.
    pub aggregate_id: K,
    /// Aggregate version produced by this event. Assigned on publish.
    pub version: Version,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl<K> EventMetadata<K> {
    /// Creates metadata for a new, not yet published event.
    ///
    /// The version stays at [`Version::INITIAL`] until the aggregate
    /// publishes the event.
    #[must_use]
    pub fn new(aggregate_id: K, correlation_id: Uuid, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            version: Version::INITIAL,
            correlation_id,
            causation_id: correlation_id,
            occurred_at,
        }
    }

    /// Sets the causation ID.
    #[must_use]
    pub fn caused_by(mut self, causation_id: Uuid) -> Self {
        self.causation_id = causation_id;
        self
    }
}

/// Trait that all domain events implement.
pub trait DomainEvent: Upgrade + Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Key type of the aggregate that produces this event.
    type Key: AggregateKey;

    /// Returns the event type name (stable tag used for routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata<Self::Key>;

    /// Returns the metadata for this event mutably.
    fn metadata_mut(&mut self) -> &mut EventMetadata<Self::Key>;

    /// Returns the id of the aggregate that produced this event.
    fn aggregate_id(&self) -> &Self::Key {
        &self.metadata().aggregate_id
    }

    /// Returns the aggregate version produced by this event.
    fn version(&self) -> Version {
        self.metadata().version
    }

    /// Builds the envelope handed to outbound streams and stores.
    fn to_envelope(&self, aggregate_kind: &str) -> EventEnvelope {
        let meta = self.metadata();
        EventEnvelope {
            event_id: meta.event_id,
            aggregate_kind: aggregate_kind.to_owned(),
            aggregate_id: meta.aggregate_id.to_string(),
            event_type: self.event_type().to_owned(),
            payload: self.to_payload(),
            schema_version: self.schema_version(),
            version: meta.version,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            occurred_at: meta.occurred_at,
        }
    }
}

/// Type-erased representation of a published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Kind of the aggregate that produced the event.
    pub aggregate_kind: String,
    /// Aggregate key, rendered as a string.
    pub aggregate_id: String,
    /// Event type name.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Schema version the payload was written with.
    pub schema_version: u32,
    /// Aggregate version produced by this event.
    pub version: Version,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}
