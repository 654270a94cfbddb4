//! Recording outbound stream and flush enlistment.

use std::sync::{Arc, Mutex};

use evented_core::event::EventEnvelope;
use evented_core::session::{EventStream, FlushEnlistment, Session};

/// An event stream that keeps every published envelope in order.
#[derive(Debug, Default)]
pub struct RecordingEventStream {
    published: Mutex<Vec<EventEnvelope>>,
}

impl RecordingEventStream {
    /// Returns every envelope published so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published.lock().unwrap().clone()
    }

    /// Returns the event types published so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn event_types(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|envelope| envelope.event_type.clone())
            .collect()
    }
}

impl EventStream for RecordingEventStream {
    fn publish(&self, event: &EventEnvelope) {
        self.published.lock().unwrap().push(event.clone());
    }
}

/// A flush enlistment that records every `(resource_id, aggregate_id)` call.
#[derive(Debug, Default)]
pub struct RecordingEnlistment {
    enlisted: Mutex<Vec<(String, String)>>,
}

impl RecordingEnlistment {
    /// Returns every enlistment in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn enlisted(&self) -> Vec<(String, String)> {
        self.enlisted.lock().unwrap().clone()
    }

    /// Returns the aggregate ids enlisted under `resource_id`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn for_resource(&self, resource_id: &str) -> Vec<String> {
        self.enlisted
            .lock()
            .unwrap()
            .iter()
            .filter(|(resource, _)| resource == resource_id)
            .map(|(_, id)| id.clone())
            .collect()
    }
}

impl FlushEnlistment for RecordingEnlistment {
    fn enlist(&self, resource_id: &str, aggregate_id: &str) {
        self.enlisted
            .lock()
            .unwrap()
            .push((resource_id.to_owned(), aggregate_id.to_owned()));
    }
}

/// Builds a session backed by a fresh recording stream and enlistment.
#[must_use]
pub fn recording_session() -> (Session, Arc<RecordingEventStream>, Arc<RecordingEnlistment>) {
    let stream = Arc::new(RecordingEventStream::default());
    let enlistment = Arc::new(RecordingEnlistment::default());
    let session = Session::new(stream.clone(), enlistment.clone());
    (session, stream, enlistment)
}
