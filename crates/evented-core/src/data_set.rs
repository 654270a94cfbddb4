//! Aggregate data sets and the factory that restores aggregates from them.

use std::fmt;

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::identity::Version;
use crate::snapshot::Snapshot;
use crate::upgrade::upgrade_to_latest;

/// The durable representation of one aggregate: an optional snapshot plus
/// the ordered events recorded after it.
pub struct AggregateDataSet<A: Aggregate> {
    id: A::Key,
    snapshot: Option<A::Snapshot>,
    events: Vec<A::Event>,
}

impl<A: Aggregate> AggregateDataSet<A> {
    /// Creates a data set.
    #[must_use]
    pub fn new(id: A::Key, snapshot: Option<A::Snapshot>, events: Vec<A::Event>) -> Self {
        Self {
            id,
            snapshot,
            events,
        }
    }

    /// Creates a data set holding only events.
    #[must_use]
    pub fn from_events(id: A::Key, events: Vec<A::Event>) -> Self {
        Self::new(id, None, events)
    }

    /// Returns the aggregate key.
    #[must_use]
    pub fn id(&self) -> &A::Key {
        &self.id
    }

    /// Returns the snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<&A::Snapshot> {
        self.snapshot.as_ref()
    }

    /// Returns the events in order.
    #[must_use]
    pub fn events(&self) -> &[A::Event] {
        &self.events
    }

    /// Returns the highest version recorded by the snapshot or the events.
    #[must_use]
    pub fn version(&self) -> Version {
        let snapshot = self
            .snapshot
            .as_ref()
            .map_or(Version::INITIAL, |snapshot| snapshot.version());
        let events = self
            .events
            .iter()
            .map(|event| event.version())
            .max()
            .unwrap_or(Version::INITIAL);
        snapshot.max(events)
    }

    /// Splits the data set into its parts.
    #[must_use]
    pub fn into_parts(self) -> (A::Key, Option<A::Snapshot>, Vec<A::Event>) {
        (self.id, self.snapshot, self.events)
    }

    /// Merges `other` into this data set.
    ///
    /// Keeps the newer of the two snapshots (either one when only one is
    /// present, `other`'s on equal versions) and appends `other`'s events
    /// after this set's events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidArgument` if the ids differ.
    pub fn append(self, other: Self) -> Result<Self, DomainError> {
        if self.id != other.id {
            return Err(DomainError::InvalidArgument(format!(
                "cannot append data set of {} to data set of {}",
                other.id, self.id
            )));
        }

        let snapshot = match (self.snapshot, other.snapshot) {
            (Some(mine), Some(theirs)) => {
                if theirs.version() >= mine.version() {
                    Some(theirs)
                } else {
                    Some(mine)
                }
            }
            (mine, theirs) => theirs.or(mine),
        };

        let mut events = self.events;
        events.extend(other.events);

        Ok(Self {
            id: self.id,
            snapshot,
            events,
        })
    }

    /// Reconstructs the aggregate.
    ///
    /// Every snapshot and event is first upgraded to its latest schema. With
    /// a snapshot, the aggregate is restored from it and the events are
    /// replayed on top. Without one, the first event must be a creation
    /// event that builds the aggregate; the rest are replayed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MissingSnapshotOrCreatedEvent` when there is
    /// nothing to build the aggregate from, and propagates upgrade, restore
    /// and replay errors.
    pub fn restore(self) -> Result<A, DomainError> {
        let Self {
            id,
            snapshot,
            events,
        } = self;

        let snapshot = snapshot.map(upgrade_to_latest).transpose()?;
        let events = events
            .into_iter()
            .map(upgrade_to_latest)
            .collect::<Result<Vec<_>, _>>()?;

        let (mut aggregate, history) = if let Some(snapshot) = snapshot {
            (snapshot.restore()?, events)
        } else {
            let mut events = events.into_iter();
            let aggregate = events
                .next()
                .as_ref()
                .and_then(A::create_from)
                .ok_or_else(|| DomainError::MissingSnapshotOrCreatedEvent(id.to_string()))?;
            (aggregate, events.collect())
        };

        if aggregate.id() != &id {
            return Err(DomainError::InvalidArgument(format!(
                "data set for {id} restored aggregate {}",
                aggregate.id()
            )));
        }

        aggregate.load_from_history(history)?;
        Ok(aggregate)
    }
}

impl<A: Aggregate> Clone for AggregateDataSet<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            snapshot: self.snapshot.clone(),
            events: self.events.clone(),
        }
    }
}

impl<A: Aggregate> fmt::Debug for AggregateDataSet<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateDataSet")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot)
            .field("events", &self.events)
            .finish()
    }
}
