//! Change sets produced by a unit of work for one flush.

use std::fmt;

use crate::aggregate::Aggregate;
use crate::data_set::AggregateDataSet;
use crate::error::DomainError;

/// The inserts, updates and deletes collected for one flush.
pub struct ChangeSet<A: Aggregate> {
    inserts: Vec<AggregateDataSet<A>>,
    updates: Vec<AggregateDataSet<A>>,
    deletes: Vec<A::Key>,
}

impl<A: Aggregate> ChangeSet<A> {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Records a new aggregate together with the events it produced.
    ///
    /// # Errors
    ///
    /// Propagates snapshot failures other than `NotSupported`.
    pub fn add_to_insert(
        &mut self,
        aggregate: &A,
        events: Vec<A::Event>,
    ) -> Result<(), DomainError> {
        self.inserts.push(capture(aggregate, events)?);
        Ok(())
    }

    /// Records a modified aggregate together with the events it produced.
    ///
    /// # Errors
    ///
    /// Propagates snapshot failures other than `NotSupported`.
    pub fn add_to_update(
        &mut self,
        aggregate: &A,
        events: Vec<A::Event>,
    ) -> Result<(), DomainError> {
        self.updates.push(capture(aggregate, events)?);
        Ok(())
    }

    /// Records the id of a removed aggregate.
    pub fn add_to_delete(&mut self, id: A::Key) {
        self.deletes.push(id);
    }

    /// Returns the data sets to insert.
    #[must_use]
    pub fn inserts(&self) -> &[AggregateDataSet<A>] {
        &self.inserts
    }

    /// Returns the data sets to update.
    #[must_use]
    pub fn updates(&self) -> &[AggregateDataSet<A>] {
        &self.updates
    }

    /// Returns the ids to delete.
    #[must_use]
    pub fn deletes(&self) -> &[A::Key] {
        &self.deletes
    }

    /// Returns the total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    /// Returns true if there is nothing to flush.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits the change set into inserts, updates and deletes.
    #[must_use]
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Vec<AggregateDataSet<A>>,
        Vec<AggregateDataSet<A>>,
        Vec<A::Key>,
    ) {
        (self.inserts, self.updates, self.deletes)
    }
}

fn capture<A: Aggregate>(
    aggregate: &A,
    events: Vec<A::Event>,
) -> Result<AggregateDataSet<A>, DomainError> {
    let snapshot = match aggregate.take_snapshot() {
        Ok(snapshot) => Some(snapshot),
        Err(DomainError::NotSupported(_)) => None,
        Err(err) => return Err(err),
    };
    Ok(AggregateDataSet::new(aggregate.id().clone(), snapshot, events))
}

impl<A: Aggregate> Default for ChangeSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> Clone for ChangeSet<A> {
    fn clone(&self) -> Self {
        Self {
            inserts: self.inserts.clone(),
            updates: self.updates.clone(),
            deletes: self.deletes.clone(),
        }
    }
}

impl<A: Aggregate> fmt::Debug for ChangeSet<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("inserts", &self.inserts)
            .field("updates", &self.updates)
            .field("deletes", &self.deletes)
            .finish()
    }
}
