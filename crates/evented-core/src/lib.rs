//! Evented Core — event-sourced persistence building blocks.
//!
//! Aggregates publish versioned events through an embedded
//! [`AggregateRoot`](aggregate::AggregateRoot). A [`Repository`] tracks every
//! aggregate touched in a [`Session`] through a unit of work, and on flush
//! hands a [`ChangeSet`] of inserts, updates and deletes to a
//! [`BackingStore`]. Stored aggregates come back as [`AggregateDataSet`]s
//! and are rebuilt from a snapshot, a creation event, or both, after every
//! part is upgraded to its latest schema.
//!
//! The crate contains no infrastructure code: concrete stores, outbound
//! streams and enlistment live in the hosting process.

pub mod aggregate;
pub mod change_set;
pub mod clock;
pub mod config;
pub mod data_set;
pub mod error;
pub mod event;
pub mod handle;
pub mod identity;
pub mod repository;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod unit_of_work;
pub mod upgrade;

pub use aggregate::{Aggregate, AggregateRoot, PublishListener, Unhandled};
pub use change_set::ChangeSet;
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, RepositoryConfig};
pub use data_set::AggregateDataSet;
pub use error::DomainError;
pub use event::{DomainEvent, EventEnvelope, EventMetadata};
pub use handle::AggregateHandle;
pub use identity::{AggregateKey, Version, VersionedIdentity};
pub use repository::{BackingStore, Repository};
pub use session::{Discard, EventStream, FlushEnlistment, Session};
pub use snapshot::{NoSnapshot, Snapshot};
pub use state::{AggregateState, StateKind};
pub use unit_of_work::UnitOfWork;
pub use upgrade::{Upgrade, upgrade_to_latest};
