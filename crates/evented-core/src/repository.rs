//! Repository façade over an abstract backing store.
//!
//! [`Repository`] delegates tracking to its active [`UnitOfWork`] and all
//! durable I/O to a [`BackingStore`]. Flushing commits the active unit of
//! work, swaps in the committed one, then builds the change set from the
//! old one and hands it to the store.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::Aggregate;
use crate::change_set::ChangeSet;
use crate::config::RepositoryConfig;
use crate::data_set::AggregateDataSet;
use crate::error::DomainError;
use crate::handle::AggregateHandle;
use crate::session::Session;
use crate::state::StateKind;
use crate::unit_of_work::{Lookup, UnitOfWork};

/// Durable storage a repository reads from and flushes to.
#[async_trait]
pub trait BackingStore<A: Aggregate>: Send + Sync {
    /// Loads the data set stored for `id`. Absence is `Ok(None)`.
    async fn select_by_id(&self, id: &A::Key) -> Result<Option<AggregateDataSet<A>>, DomainError>;

    /// Persists one change set.
    ///
    /// Fails with `DomainError::ConcurrencyConflict` when an update was
    /// based on a stale version, `DomainError::DuplicateKey` when an insert
    /// collides, or `DomainError::Constraint` for other store constraints.
    /// Atomicity across aggregates is up to the implementation.
    async fn flush(&self, change_set: ChangeSet<A>) -> Result<(), DomainError>;
}

/// Session-scoped access to aggregates of one kind.
pub struct Repository<A: Aggregate> {
    store: Arc<dyn BackingStore<A>>,
    config: RepositoryConfig,
    active: Mutex<Arc<UnitOfWork<A>>>,
}

impl<A: Aggregate> Repository<A> {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore<A>>, config: RepositoryConfig) -> Self {
        let active = Mutex::new(Arc::new(UnitOfWork::new(resource_id::<A>(&config))));
        Self {
            store,
            config,
            active,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Returns the resource id this repository enlists under.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        resource_id::<A>(&self.config)
    }

    /// Returns the aggregate with `id`, or `None` if the store has none.
    ///
    /// A tracked id is answered from memory without reading the store.
    /// Otherwise the stored data set is selected, upgraded and restored, and
    /// the outcome (hit or miss) is tracked for the rest of the session.
    ///
    /// # Errors
    ///
    /// Returns the store's select error, or `DomainError::Restore` wrapping
    /// any failure to rebuild the aggregate.
    #[instrument(skip_all, fields(kind = A::KIND, id = %id))]
    pub async fn get_by_id(
        &self,
        session: &Session,
        id: &A::Key,
    ) -> Result<Option<AggregateHandle<A>>, DomainError> {
        let uow = self.active();
        if let Lookup::Resident(found) = uow.lookup(id) {
            return Ok(found);
        }

        let aggregate = match self.store.select_by_id(id).await? {
            Some(data_set) => Some(data_set.restore().map_err(|source| {
                warn!(error = %source, "failed to restore aggregate");
                DomainError::restore(id, source)
            })?),
            None => None,
        };

        // A concurrent caller may have tracked the id while the select ran.
        if let Lookup::Resident(found) = uow.lookup(id) {
            return Ok(found);
        }
        uow.track_loaded(session, id.clone(), aggregate)
    }

    /// Returns the aggregate with `id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` on a miss, plus everything
    /// [`get_by_id`](Self::get_by_id) returns.
    pub async fn get_required(
        &self,
        session: &Session,
        id: &A::Key,
    ) -> Result<AggregateHandle<A>, DomainError> {
        self.get_by_id(session, id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound(id.to_string()))
    }

    /// Starts tracking a new aggregate and returns its handle.
    ///
    /// The store is not consulted; an id that already exists in the store is
    /// reported by the store at flush time.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::DuplicateKey` if the id is already tracked in
    /// this session.
    #[instrument(skip_all, fields(kind = A::KIND))]
    pub fn add(&self, session: &Session, aggregate: A) -> Result<AggregateHandle<A>, DomainError> {
        self.active().add(session, aggregate)
    }

    /// Removes the tracked aggregate with `id`.
    ///
    /// Events published by the removal hook go to the session that first
    /// tracked the aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` if `id` was never loaded or
    /// is already removed, `DomainError::AggregateNotFound` if the load was
    /// a miss, or the aggregate's removal hook error.
    #[instrument(skip_all, fields(kind = A::KIND, id = %id))]
    pub fn remove_by_id(&self, id: &A::Key) -> Result<(), DomainError> {
        self.active().remove_by_id(id)
    }

    /// Returns true if any tracked aggregate has changes to flush.
    #[must_use]
    pub fn requires_flush(&self) -> bool {
        self.active().requires_flush()
    }

    /// Returns the tracked state of `id`.
    #[must_use]
    pub fn state_of(&self, id: &A::Key) -> StateKind {
        self.active().state_of(id)
    }

    /// Returns true if `id` is tracked in any state other than Unknown.
    #[must_use]
    pub fn contains(&self, id: &A::Key) -> bool {
        self.state_of(id) != StateKind::Unknown
    }

    /// Returns the number of tracked ids.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.active().tracked_count()
    }

    /// Flushes using the configured keep-in-memory policy.
    ///
    /// # Errors
    ///
    /// See [`flush`](Self::flush).
    pub async fn commit(&self) -> Result<(), DomainError> {
        self.flush(self.config.keep_in_memory()).await
    }

    /// Commits the active unit of work and flushes its change set.
    ///
    /// With `keep_in_memory`, the committed unit of work stays active, so
    /// flushed aggregates remain resident as Loaded. Otherwise it is
    /// replaced by an empty one and its aggregates are detached.
    ///
    /// # Errors
    ///
    /// Propagates snapshot and store errors. After a failed flush the
    /// session should be discarded.
    #[instrument(skip(self), fields(kind = A::KIND))]
    pub async fn flush(&self, keep_in_memory: bool) -> Result<(), DomainError> {
        let flushed = {
            let mut active = self.lock_active();
            let committed = Arc::new(active.commit());
            std::mem::replace(&mut *active, committed)
        };

        if !keep_in_memory {
            let discarded = std::mem::replace(
                &mut *self.lock_active(),
                Arc::new(UnitOfWork::new(self.resource_id())),
            );
            discarded.release();
        }

        let change_set = flushed.build_change_set().inspect_err(|error| {
            warn!(%error, "failed to build change set");
        })?;

        if change_set.is_empty() {
            debug!("nothing to flush");
            return Ok(());
        }

        let inserts = change_set.inserts().len();
        let updates = change_set.updates().len();
        let deletes = change_set.deletes().len();
        self.store.flush(change_set).await.inspect_err(|error| {
            warn!(%error, inserts, updates, deletes, "flush failed");
        })?;
        info!(inserts, updates, deletes, "flushed change set");
        Ok(())
    }

    fn active(&self) -> Arc<UnitOfWork<A>> {
        Arc::clone(&self.lock_active())
    }

    fn lock_active(&self) -> MutexGuard<'_, Arc<UnitOfWork<A>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: Aggregate> fmt::Debug for Repository<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("kind", &A::KIND)
            .field("config", &self.config)
            .field("active", &*self.lock_active())
            .finish_non_exhaustive()
    }
}

fn resource_id<A: Aggregate>(config: &RepositoryConfig) -> &str {
    config.resource_id().unwrap_or(A::KIND)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::aggregate::tests::{Tally, TallyEvent, TallyEventKind};
    use crate::event::DomainEvent;
    use crate::identity::Version;

    #[derive(Default)]
    struct MapStore {
        rows: Mutex<Vec<AggregateDataSet<Tally>>>,
        selects: Mutex<usize>,
        flushed: Mutex<Vec<ChangeSet<Tally>>>,
    }

    #[async_trait]
    impl BackingStore<Tally> for MapStore {
        async fn select_by_id(
            &self,
            id: &String,
        ) -> Result<Option<AggregateDataSet<Tally>>, DomainError> {
            *self.selects.lock().unwrap() += 1;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|row| row.id() == id)
                .cloned())
        }

        async fn flush(&self, change_set: ChangeSet<Tally>) -> Result<(), DomainError> {
            self.flushed.lock().unwrap().push(change_set);
            Ok(())
        }
    }

    fn stored(id: &str, events: u64) -> AggregateDataSet<Tally> {
        let mut history = vec![TallyEvent::stored(id, 1, TallyEventKind::Started)];
        for version in 2..=events {
            history.push(TallyEvent::stored(id, version, TallyEventKind::Added(1)));
        }
        AggregateDataSet::from_events(id.to_owned(), history)
    }

    fn repository(store: &Arc<MapStore>, keep: bool) -> Repository<Tally> {
        Repository::new(
            store.clone(),
            RepositoryConfig::new().with_keep_in_memory(keep),
        )
    }

    #[tokio::test]
    async fn test_get_by_id_reads_store_once_per_session() {
        // Arrange
        let store = Arc::new(MapStore::default());
        store.rows.lock().unwrap().push(stored("t-2", 5));
        let repo = repository(&store, false);
        let session = Session::detached();

        // Act
        let first = repo.get_by_id(&session, &"t-2".to_owned()).await.unwrap().unwrap();
        let second = repo.get_by_id(&session, &"t-2".to_owned()).await.unwrap().unwrap();

        // Assert
        assert!(first.ptr_eq(&second));
        assert_eq!(first.lock().version(), Version::new(5));
        assert_eq!(*store.selects.lock().unwrap(), 1);
        assert_eq!(repo.state_of(&"t-2".to_owned()), StateKind::Loaded);
    }

    #[tokio::test]
    async fn test_miss_is_remembered_and_required_fails() {
        let store = Arc::new(MapStore::default());
        let repo = repository(&store, false);
        let session = Session::detached();

        let missing = repo.get_by_id(&session, &"t-9".to_owned()).await.unwrap();
        let required = repo.get_required(&session, &"t-9".to_owned()).await;

        assert!(missing.is_none());
        assert!(matches!(required, Err(DomainError::AggregateNotFound(id)) if id == "t-9"));
        assert_eq!(*store.selects.lock().unwrap(), 1);
        assert!(repo.contains(&"t-9".to_owned()));
    }

    #[tokio::test]
    async fn test_restore_failure_is_wrapped() {
        let store = Arc::new(MapStore::default());
        store.rows.lock().unwrap().push(AggregateDataSet::from_events(
            "t-4".to_owned(),
            vec![TallyEvent::stored("t-4", 2, TallyEventKind::Added(1))],
        ));
        let repo = repository(&store, false);

        let result = repo.get_by_id(&Session::detached(), &"t-4".to_owned()).await;

        match result {
            Err(DomainError::Restore { aggregate_id, source }) => {
                assert_eq!(aggregate_id, "t-4");
                assert!(matches!(*source, DomainError::MissingSnapshotOrCreatedEvent(_)));
            }
            other => panic!("expected Restore, got {other:?}"),
        }
        assert!(!repo.contains(&"t-4".to_owned()));
    }

    #[tokio::test]
    async fn test_flush_sends_update_and_keeps_resident() {
        // Arrange
        let store = Arc::new(MapStore::default());
        store.rows.lock().unwrap().push(stored("t-2", 5));
        let repo = repository(&store, true);
        let session = Session::detached();
        let tally = repo.get_required(&session, &"t-2".to_owned()).await.unwrap();
        tally.lock().add(3).unwrap();
        assert!(repo.requires_flush());

        // Act
        repo.commit().await.unwrap();

        // Assert
        let flushed = store.flushed.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        let updates = flushed[0].updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].events()[0].version(), Version::new(6));
        assert!(flushed[0].inserts().is_empty());
        assert!(flushed[0].deletes().is_empty());
        drop(flushed);

        assert!(!repo.requires_flush());
        let again = repo.get_required(&session, &"t-2".to_owned()).await.unwrap();
        assert!(again.ptr_eq(&tally));
        assert_eq!(*store.selects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_without_keep_discards_tracking() {
        let store = Arc::new(MapStore::default());
        let repo = repository(&store, false);
        let session = Session::detached();
        let added = repo.add(&session, Tally::start("t-1")).unwrap();

        repo.flush(false).await.unwrap();
        added.lock().add(1).unwrap();

        assert_eq!(repo.tracked_count(), 0);
        assert_eq!(store.flushed.lock().unwrap()[0].inserts().len(), 1);
        assert_eq!(added.lock().root().pending_events().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_snapshot_still_discards_tracking() {
        // Arrange
        let store = Arc::new(MapStore::default());
        let repo = repository(&store, false);
        let session = Session::detached();
        let mut tally = Tally::start("t-1");
        tally.fail_snapshot = true;
        let added = repo.add(&session, tally).unwrap();

        // Act
        let result = repo.flush(false).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert_eq!(repo.tracked_count(), 0);
        assert!(!added.lock().root().is_subscribed());
        assert!(store.flushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_with_nothing_tracked_skips_store() {
        let store = Arc::new(MapStore::default());
        let repo = repository(&store, true);

        repo.commit().await.unwrap();

        assert!(store.flushed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resource_id_defaults_to_kind() {
        let store: Arc<MapStore> = Arc::new(MapStore::default());

        let default = Repository::<Tally>::new(store.clone(), RepositoryConfig::new());
        let named = Repository::<Tally>::new(
            store,
            RepositoryConfig::new().with_resource_id("tallies"),
        );

        assert_eq!(default.resource_id(), "tally");
        assert_eq!(named.resource_id(), "tallies");
    }
}
