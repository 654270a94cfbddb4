//! Snapshot abstractions.

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::identity::Version;
use crate::upgrade::Upgrade;

/// A point-in-time capture of an aggregate's full state.
///
/// A snapshot doubles as the factory that restores its aggregate.
pub trait Snapshot<A: Aggregate>: Upgrade + Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Returns the id of the captured aggregate.
    fn aggregate_id(&self) -> &A::Key;

    /// Returns the aggregate version at capture time.
    fn version(&self) -> Version;

    /// Rebuilds the aggregate from this snapshot.
    ///
    /// # Errors
    ///
    /// Returns a `DomainError` if the captured state is inconsistent.
    fn restore(self) -> Result<A, DomainError>;
}

/// Snapshot type for aggregates without snapshot support.
///
/// Uninhabited, so a data set for such an aggregate never carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSnapshot {}

impl Upgrade for NoSnapshot {}

impl<A: Aggregate> Snapshot<A> for NoSnapshot {
    fn aggregate_id(&self) -> &A::Key {
        match *self {}
    }

    fn version(&self) -> Version {
        match *self {}
    }

    fn restore(self) -> Result<A, DomainError> {
        match self {}
    }
}
