//! Session context threaded through repository operations.
//!
//! A [`Session`] carries the outbound event stream and the flush
//! enlistment of the hosting process. It is passed explicitly to
//! `get_by_id` and `add` instead of living in ambient state.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::event::EventEnvelope;

/// Receives every event published by tracked aggregates, in production order.
pub trait EventStream: Send + Sync {
    /// Publishes one event.
    fn publish(&self, event: &EventEnvelope);
}

/// Registration that tells the host a resource has changes to flush.
pub trait FlushEnlistment: Send + Sync {
    /// Enlists `aggregate_id` under `resource_id`.
    ///
    /// Called once per aggregate id, the first time it changes in a session.
    fn enlist(&self, resource_id: &str, aggregate_id: &str);
}

/// Stream and enlistment that ignore everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl EventStream for Discard {
    fn publish(&self, _event: &EventEnvelope) {}
}

impl FlushEnlistment for Discard {
    fn enlist(&self, _resource_id: &str, _aggregate_id: &str) {}
}

/// One logical session of work.
#[derive(Clone)]
pub struct Session {
    correlation_id: Uuid,
    stream: Arc<dyn EventStream>,
    enlistment: Arc<dyn FlushEnlistment>,
}

impl Session {
    /// Creates a session with a fresh correlation ID.
    #[must_use]
    pub fn new(stream: Arc<dyn EventStream>, enlistment: Arc<dyn FlushEnlistment>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            stream,
            enlistment,
        }
    }

    /// Creates a session whose events and enlistments go nowhere.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(Arc::new(Discard), Arc::new(Discard))
    }

    /// Replaces the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Returns the correlation ID.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Writes `event` to the outbound stream.
    pub fn publish(&self, event: &EventEnvelope) {
        self.stream.publish(event);
    }

    /// Enlists an aggregate for flushing.
    pub fn enlist(&self, resource_id: &str, aggregate_id: &str) {
        self.enlistment.enlist(resource_id, aggregate_id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}
