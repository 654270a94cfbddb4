//! Test backing stores — `BackingStore` implementations for tests.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use evented_core::aggregate::Aggregate;
use evented_core::change_set::ChangeSet;
use evented_core::data_set::AggregateDataSet;
use evented_core::error::DomainError;
use evented_core::event::DomainEvent;
use evented_core::identity::Version;
use evented_core::repository::BackingStore;

/// A backing store that keeps one merged data set per aggregate id.
///
/// Flushes are validated as a whole before anything is written: inserting
/// an existing id fails with `DuplicateKey`, and an update whose first
/// event does not directly follow the stored version fails with
/// `ConcurrencyConflict`. Every select is counted and every accepted change
/// set is recorded.
#[derive(Debug)]
pub struct InMemoryBackingStore<A: Aggregate> {
    rows: Mutex<HashMap<A::Key, AggregateDataSet<A>>>,
    selects: AtomicUsize,
    flushed: Mutex<Vec<ChangeSet<A>>>,
}

impl<A: Aggregate> InMemoryBackingStore<A> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            selects: AtomicUsize::new(0),
            flushed: Mutex::new(Vec::new()),
        }
    }

    /// Stores `data_set` directly, replacing any existing row.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seed(&self, data_set: AggregateDataSet<A>) {
        self.rows
            .lock()
            .unwrap()
            .insert(data_set.id().clone(), data_set);
    }

    /// Returns the stored data set for `id`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn stored(&self, id: &A::Key) -> Option<AggregateDataSet<A>> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    /// Returns the number of `select_by_id` calls.
    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    /// Returns every change set accepted so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn flushed(&self) -> Vec<ChangeSet<A>> {
        self.flushed.lock().unwrap().clone()
    }
}

impl<A: Aggregate> Default for InMemoryBackingStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_update<A: Aggregate>(
    rows: &HashMap<A::Key, AggregateDataSet<A>>,
    update: &AggregateDataSet<A>,
) -> Result<(), DomainError> {
    let Some(row) = rows.get(update.id()) else {
        return Err(DomainError::AggregateNotFound(update.id().to_string()));
    };
    let Some(first) = update.events().first() else {
        return Ok(());
    };
    let expected = Version::new(first.version().value().saturating_sub(1));
    let actual = row.version();
    if expected != actual {
        return Err(DomainError::ConcurrencyConflict {
            aggregate_id: update.id().to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[async_trait]
impl<A: Aggregate> BackingStore<A> for InMemoryBackingStore<A> {
    async fn select_by_id(&self, id: &A::Key) -> Result<Option<AggregateDataSet<A>>, DomainError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored(id))
    }

    async fn flush(&self, change_set: ChangeSet<A>) -> Result<(), DomainError> {
        let mut rows = self.rows.lock().unwrap();

        for insert in change_set.inserts() {
            if rows.contains_key(insert.id()) {
                return Err(DomainError::DuplicateKey {
                    aggregate_kind: A::KIND,
                    aggregate_id: insert.id().to_string(),
                });
            }
        }
        for update in change_set.updates() {
            check_update(&rows, update)?;
        }

        self.flushed.lock().unwrap().push(change_set.clone());
        let (inserts, updates, deletes) = change_set.into_parts();
        for insert in inserts {
            rows.insert(insert.id().clone(), insert);
        }
        for update in updates {
            let id = update.id().clone();
            let merged = match rows.remove(&id) {
                Some(row) => row.append(update)?,
                None => update,
            };
            rows.insert(id, merged);
        }
        for id in deletes {
            rows.remove(&id);
        }
        Ok(())
    }
}

/// A backing store that never finds anything and accepts every flush.
#[derive(Debug)]
pub struct EmptyBackingStore<A>(PhantomData<fn() -> A>);

impl<A> Default for EmptyBackingStore<A> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<A: Aggregate> BackingStore<A> for EmptyBackingStore<A> {
    async fn select_by_id(&self, _id: &A::Key) -> Result<Option<AggregateDataSet<A>>, DomainError> {
        Ok(None)
    }

    async fn flush(&self, _change_set: ChangeSet<A>) -> Result<(), DomainError> {
        Ok(())
    }
}

/// A backing store that fails every call with an infrastructure error.
/// Useful for testing error-handling paths.
#[derive(Debug)]
pub struct FailingBackingStore<A>(PhantomData<fn() -> A>);

impl<A> Default for FailingBackingStore<A> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<A: Aggregate> BackingStore<A> for FailingBackingStore<A> {
    async fn select_by_id(&self, _id: &A::Key) -> Result<Option<AggregateDataSet<A>>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn flush(&self, _change_set: ChangeSet<A>) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
