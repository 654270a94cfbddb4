//! Shared handle to a tracked aggregate.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::aggregate::Aggregate;

/// A cheaply cloneable reference to an aggregate tracked by a unit of work.
///
/// Every clone points at the same instance, so a caller holding a handle
/// across a flush keeps mutating the aggregate the repository keeps resident.
pub struct AggregateHandle<A> {
    inner: Arc<Mutex<A>>,
}

impl<A: Aggregate> AggregateHandle<A> {
    /// Wraps `aggregate` in a new handle.
    #[must_use]
    pub fn new(aggregate: A) -> Self {
        Self {
            inner: Arc::new(Mutex::new(aggregate)),
        }
    }

    /// Locks the aggregate for reading or mutation.
    ///
    /// A poisoned lock is recovered: aggregate state only changes through
    /// `publish`, which validates before mutating.
    pub fn lock(&self) -> MutexGuard<'_, A> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the aggregate locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    /// Returns a clone of the aggregate key.
    #[must_use]
    pub fn id(&self) -> A::Key {
        self.lock().id().clone()
    }

    /// Returns true if both handles point at the same aggregate instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A> Clone for AggregateHandle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Aggregate> fmt::Debug for AggregateHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(aggregate) => f
                .debug_struct("AggregateHandle")
                .field("kind", &A::KIND)
                .field("id", aggregate.id())
                .field("version", &aggregate.version())
                .finish(),
            Err(_) => f
                .debug_struct("AggregateHandle")
                .field("kind", &A::KIND)
                .finish_non_exhaustive(),
        }
    }
}
