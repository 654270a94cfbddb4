//! Shared test doubles and fixtures for evented.

mod account;
mod clock;
mod store;
mod stream;

pub use account::{Account, AccountEvent, AccountEventKind, AccountSnapshot};
pub use clock::FixedClock;
pub use store::{EmptyBackingStore, FailingBackingStore, InMemoryBackingStore};
pub use stream::{RecordingEnlistment, RecordingEventStream, recording_session};
