//! Aggregate root abstraction.
//!
//! An aggregate embeds an [`AggregateRoot`] holding its versioned identity,
//! the buffer of events not yet flushed, the removed flag and an optional
//! publish listener. The [`Aggregate`] trait supplies the per-type parts
//! (event dispatch, creation, snapshots) and provides `publish`,
//! `load_from_history`, `flush_events` and `notify_removed` on top of them.

use std::fmt;
use std::sync::Arc;

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::identity::{AggregateKey, Version, VersionedIdentity};
use crate::snapshot::Snapshot;

/// Returned by [`Aggregate::apply`] when an event kind has no handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unhandled;

/// Receives events as an aggregate publishes them.
pub trait PublishListener<E>: Send + Sync {
    /// Observes a published event.
    ///
    /// Returns `None` when the listener claims the event, or hands it back
    /// to be buffered on the aggregate.
    fn on_published(&self, event: E) -> Option<E>;
}

/// Identity, pending events and lifecycle flags shared by every aggregate.
pub struct AggregateRoot<E: DomainEvent> {
    identity: VersionedIdentity<E::Key>,
    pending: Vec<E>,
    removed: bool,
    listener: Option<Arc<dyn PublishListener<E>>>,
}

impl<E: DomainEvent> AggregateRoot<E> {
    /// Creates the root of a fresh aggregate that has accepted no events.
    #[must_use]
    pub fn new(key: E::Key) -> Self {
        Self::restored(key, Version::INITIAL)
    }

    /// Creates the root of an aggregate restored at `version`.
    #[must_use]
    pub fn restored(key: E::Key, version: Version) -> Self {
        Self {
            identity: VersionedIdentity::new(key, version),
            pending: Vec::new(),
            removed: false,
            listener: None,
        }
    }

    /// Creates the root of an aggregate built from its creation event.
    #[must_use]
    pub fn from_created(event: &E) -> Self {
        Self::restored(event.aggregate_id().clone(), event.version())
    }

    /// Returns the aggregate key.
    #[must_use]
    pub fn id(&self) -> &E::Key {
        self.identity.key()
    }

    /// Returns the current version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.identity.version()
    }

    /// Returns the versioned identity.
    #[must_use]
    pub fn identity(&self) -> &VersionedIdentity<E::Key> {
        &self.identity
    }

    /// Returns true once the aggregate has been marked removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Returns the events published but not yet flushed.
    #[must_use]
    pub fn pending_events(&self) -> &[E] {
        &self.pending
    }

    /// Installs `listener`, replacing any previous one.
    pub fn subscribe(&mut self, listener: Arc<dyn PublishListener<E>>) {
        self.listener = Some(listener);
    }

    /// Removes and returns the current listener.
    pub fn unsubscribe(&mut self) -> Option<Arc<dyn PublishListener<E>>> {
        self.listener.take()
    }

    /// Returns true if a listener is installed.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.listener.is_some()
    }

    fn advance_to(&mut self, version: Version) -> Result<(), DomainError> {
        self.identity.advance_to(version)
    }

    fn dispatch(&mut self, event: E) {
        let unclaimed = match &self.listener {
            Some(listener) => listener.on_published(event),
            None => Some(event),
        };
        if let Some(event) = unclaimed {
            self.pending.push(event);
        }
    }

    // `&mut self` rules out a concurrent publish, so the swap is a single
    // exchange.
    fn take_pending(&mut self) -> Vec<E> {
        std::mem::take(&mut self.pending)
    }
}

impl<E: DomainEvent> fmt::Debug for AggregateRoot<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("identity", &self.identity)
            .field("pending", &self.pending.len())
            .field("removed", &self.removed)
            .field("subscribed", &self.listener.is_some())
            .finish()
    }
}

/// Trait for aggregate roots that publish and replay events.
///
/// Implementors provide the required items; the provided methods
/// (`publish`, `load_from_history`, `flush_events`, `notify_removed`) hold
/// the lifecycle rules and are not meant to be overridden.
pub trait Aggregate: Sized + Send + Sync + 'static {
    /// The aggregate key type.
    type Key: AggregateKey;

    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent<Key = Self::Key>;

    /// The snapshot type, or [`NoSnapshot`](crate::snapshot::NoSnapshot).
    type Snapshot: Snapshot<Self>;

    /// Stable name of the aggregate kind, used in logs and envelopes.
    const KIND: &'static str;

    /// Whether `publish` applies the event to the aggregate immediately.
    const APPLY_ON_PUBLISH: bool = true;

    /// Returns the embedded root.
    fn root(&self) -> &AggregateRoot<Self::Event>;

    /// Returns the embedded root mutably.
    fn root_mut(&mut self) -> &mut AggregateRoot<Self::Event>;

    /// Routes `event` to its handler.
    ///
    /// # Errors
    ///
    /// Returns [`Unhandled`] if this aggregate has no handler for the kind.
    fn apply(&mut self, event: &Self::Event) -> Result<(), Unhandled>;

    /// Builds the aggregate from a creation event.
    ///
    /// Returns `None` if `event` is not a creation event. The returned
    /// aggregate must be at the event's version, see
    /// [`AggregateRoot::from_created`].
    fn create_from(event: &Self::Event) -> Option<Self>;

    /// Captures the aggregate's full state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotSupported` unless overridden.
    fn take_snapshot(&self) -> Result<Self::Snapshot, DomainError> {
        Err(DomainError::NotSupported("snapshots"))
    }

    /// Hook run by `notify_removed` before the removed flag is set. May
    /// publish final events.
    ///
    /// # Errors
    ///
    /// Any error is returned from `notify_removed` after the flag is set.
    fn on_removed(&mut self) -> Result<(), DomainError> {
        Ok(())
    }

    /// Computes the version assigned to the next published event.
    fn next_version(&self) -> Version {
        self.version().next()
    }

    /// Returns the aggregate key.
    fn id(&self) -> &Self::Key {
        self.root().id()
    }

    /// Returns the current version.
    fn version(&self) -> Version {
        self.root().version()
    }

    /// Returns true once the aggregate has been marked removed.
    fn is_removed(&self) -> bool {
        self.root().is_removed()
    }

    /// Publishes a new event.
    ///
    /// Stamps the event with this aggregate's id and next version, applies
    /// it when [`APPLY_ON_PUBLISH`](Self::APPLY_ON_PUBLISH) is set, then
    /// offers it to the listener. Unclaimed events are buffered until
    /// [`flush_events`](Self::flush_events).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::IllegalOperationOnRemoved` after removal,
    /// `DomainError::VersionUpdate` if the next version does not increase,
    /// and `DomainError::MissingEventHandler` if the event cannot be applied.
    fn publish(&mut self, mut event: Self::Event) -> Result<(), DomainError> {
        if self.is_removed() {
            return Err(DomainError::IllegalOperationOnRemoved(self.id().to_string()));
        }

        let current = self.version();
        let next = self.next_version();
        if next <= current {
            return Err(DomainError::VersionUpdate {
                aggregate_id: self.id().to_string(),
                current,
                attempted: next,
            });
        }

        let meta = event.metadata_mut();
        meta.aggregate_id = self.id().clone();
        meta.version = next;

        if Self::APPLY_ON_PUBLISH {
            self.apply(&event)
                .map_err(|Unhandled| missing_handler::<Self>(&event))?;
        }
        self.root_mut().advance_to(next)?;
        self.root_mut().dispatch(event);
        Ok(())
    }

    /// Replays history onto this aggregate.
    ///
    /// Events for other aggregates or at or below the current version are
    /// skipped; the rest are applied in version order. Returns the number of
    /// events applied.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MissingEventHandler` if an event kind has no
    /// handler. Events applied before the failure stay applied.
    fn load_from_history<I>(&mut self, events: I) -> Result<usize, DomainError>
    where
        I: IntoIterator<Item = Self::Event>,
    {
        let current = self.version();
        let mut relevant: Vec<Self::Event> = events
            .into_iter()
            .filter(|event| event.aggregate_id() == self.id() && event.version() > current)
            .collect();
        relevant.sort_by_key(|event| event.version());

        let mut applied = 0;
        for event in relevant {
            // Duplicate versions in the input are applied once.
            if event.version() <= self.version() {
                continue;
            }
            self.apply(&event)
                .map_err(|Unhandled| missing_handler::<Self>(&event))?;
            self.root_mut().advance_to(event.version())?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Takes every buffered event, leaving the buffer empty.
    fn flush_events(&mut self) -> Vec<Self::Event> {
        self.root_mut().take_pending()
    }

    /// Runs the removal hook, then marks the aggregate removed.
    ///
    /// The flag is set even when the hook fails.
    ///
    /// # Errors
    ///
    /// Returns the hook's error, if any.
    fn notify_removed(&mut self) -> Result<(), DomainError> {
        let hook = self.on_removed();
        self.root_mut().removed = true;
        hook
    }
}

fn missing_handler<A: Aggregate>(event: &A::Event) -> DomainError {
    DomainError::MissingEventHandler {
        aggregate_kind: A::KIND,
        event_type: event.event_type(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::event::EventMetadata;
    use crate::snapshot::NoSnapshot;
    use crate::upgrade::Upgrade;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum TallyEventKind {
        Started,
        Added(i64),
        Unrouted,
    }

    #[derive(Debug, Clone)]
    pub(crate) struct TallyEvent {
        pub(crate) metadata: EventMetadata<String>,
        pub(crate) kind: TallyEventKind,
    }

    impl TallyEvent {
        pub(crate) fn new(kind: TallyEventKind) -> Self {
            let occurred_at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
            Self {
                metadata: EventMetadata::new(String::new(), Uuid::nil(), occurred_at),
                kind,
            }
        }

        pub(crate) fn stored(id: &str, version: u64, kind: TallyEventKind) -> Self {
            let mut event = Self::new(kind);
            event.metadata.aggregate_id = id.to_owned();
            event.metadata.version = Version::new(version);
            event
        }
    }

    impl Upgrade for TallyEvent {}

    impl DomainEvent for TallyEvent {
        type Key = String;

        fn event_type(&self) -> &'static str {
            match self.kind {
                TallyEventKind::Started => "tally.started",
                TallyEventKind::Added(_) => "tally.added",
                TallyEventKind::Unrouted => "tally.unrouted",
            }
        }

        fn to_payload(&self) -> serde_json::Value {
            match self.kind {
                TallyEventKind::Added(amount) => serde_json::json!({ "amount": amount }),
                _ => serde_json::Value::Null,
            }
        }

        fn metadata(&self) -> &EventMetadata<String> {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut EventMetadata<String> {
            &mut self.metadata
        }
    }

    #[derive(Debug)]
    pub(crate) struct Tally {
        root: AggregateRoot<TallyEvent>,
        pub(crate) total: i64,
        pub(crate) stuck: bool,
        pub(crate) fail_removal: bool,
        pub(crate) fail_snapshot: bool,
    }

    impl Tally {
        pub(crate) fn start(id: &str) -> Self {
            let mut tally = Self::at(id, Version::INITIAL);
            tally
                .publish(TallyEvent::new(TallyEventKind::Started))
                .unwrap();
            tally
        }

        pub(crate) fn at(id: &str, version: Version) -> Self {
            Self {
                root: AggregateRoot::restored(id.to_owned(), version),
                total: 0,
                stuck: false,
                fail_removal: false,
                fail_snapshot: false,
            }
        }

        pub(crate) fn add(&mut self, amount: i64) -> Result<(), DomainError> {
            self.publish(TallyEvent::new(TallyEventKind::Added(amount)))
        }
    }

    impl Aggregate for Tally {
        type Key = String;
        type Event = TallyEvent;
        type Snapshot = NoSnapshot;

        const KIND: &'static str = "tally";

        fn root(&self) -> &AggregateRoot<TallyEvent> {
            &self.root
        }

        fn root_mut(&mut self) -> &mut AggregateRoot<TallyEvent> {
            &mut self.root
        }

        fn apply(&mut self, event: &TallyEvent) -> Result<(), Unhandled> {
            match event.kind {
                TallyEventKind::Started => Ok(()),
                TallyEventKind::Added(amount) => {
                    self.total += amount;
                    Ok(())
                }
                TallyEventKind::Unrouted => Err(Unhandled),
            }
        }

        fn create_from(event: &TallyEvent) -> Option<Self> {
            match event.kind {
                TallyEventKind::Started => Some(Self {
                    root: AggregateRoot::from_created(event),
                    total: 0,
                    stuck: false,
                    fail_removal: false,
                    fail_snapshot: false,
                }),
                _ => None,
            }
        }

        fn take_snapshot(&self) -> Result<NoSnapshot, DomainError> {
            if self.fail_snapshot {
                return Err(DomainError::Infrastructure("tally snapshot failed".into()));
            }
            Err(DomainError::NotSupported("snapshots"))
        }

        fn on_removed(&mut self) -> Result<(), DomainError> {
            if self.fail_removal {
                return Err(DomainError::Validation("tally refused removal".into()));
            }
            self.add(-self.total)
        }

        fn next_version(&self) -> Version {
            if self.stuck {
                self.version()
            } else {
                self.version().next()
            }
        }
    }

    struct Claiming(Mutex<Vec<TallyEvent>>);

    impl PublishListener<TallyEvent> for Claiming {
        fn on_published(&self, event: TallyEvent) -> Option<TallyEvent> {
            self.0.lock().unwrap().push(event);
            None
        }
    }

    struct Observing(Mutex<usize>);

    impl PublishListener<TallyEvent> for Observing {
        fn on_published(&self, event: TallyEvent) -> Option<TallyEvent> {
            *self.0.lock().unwrap() += 1;
            Some(event)
        }
    }

    #[test]
    fn test_publish_stamps_id_and_next_version() {
        // Arrange
        let mut tally = Tally::start("t-1");

        // Act
        tally.add(5).unwrap();

        // Assert
        assert_eq!(tally.version(), Version::new(2));
        assert_eq!(tally.total, 5);
        let pending = tally.root().pending_events();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].aggregate_id(), "t-1");
        assert_eq!(pending[1].version(), Version::new(2));
    }

    #[test]
    fn test_publish_rejects_version_that_does_not_increase() {
        // Arrange
        let mut tally = Tally::at("t-1", Version::new(3));
        tally.stuck = true;

        // Act
        let result = tally.add(1);

        // Assert
        match result {
            Err(DomainError::VersionUpdate {
                current, attempted, ..
            }) => {
                assert_eq!(current, Version::new(3));
                assert_eq!(attempted, Version::new(3));
            }
            other => panic!("expected VersionUpdate, got {other:?}"),
        }
        assert!(tally.root().pending_events().is_empty());
        assert_eq!(tally.total, 0);
    }

    #[test]
    fn test_publish_at_the_version_ceiling_is_rejected() {
        // Arrange
        let mut tally = Tally::at("t-1", Version::new(u64::MAX));

        // Act
        let result = tally.add(1);

        // Assert
        match result {
            Err(DomainError::VersionUpdate {
                current, attempted, ..
            }) => {
                assert_eq!(current, Version::new(u64::MAX));
                assert_eq!(attempted, Version::new(u64::MAX));
            }
            other => panic!("expected VersionUpdate, got {other:?}"),
        }
        assert!(tally.root().pending_events().is_empty());
        assert_eq!(tally.version(), Version::new(u64::MAX));
    }

    #[test]
    fn test_publish_without_handler_fails_and_keeps_version() {
        let mut tally = Tally::at("t-1", Version::new(1));

        let result = tally.publish(TallyEvent::new(TallyEventKind::Unrouted));

        match result {
            Err(DomainError::MissingEventHandler {
                aggregate_kind,
                event_type,
            }) => {
                assert_eq!(aggregate_kind, "tally");
                assert_eq!(event_type, "tally.unrouted");
            }
            other => panic!("expected MissingEventHandler, got {other:?}"),
        }
        assert_eq!(tally.version(), Version::new(1));
    }

    #[test]
    fn test_listener_claiming_event_skips_pending_buffer() {
        // Arrange
        let mut tally = Tally::at("t-1", Version::new(4));
        let listener = Arc::new(Claiming(Mutex::new(Vec::new())));
        tally.root_mut().subscribe(listener.clone());

        // Act
        tally.add(2).unwrap();

        // Assert
        assert!(tally.root().pending_events().is_empty());
        let claimed = listener.0.lock().unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].version(), Version::new(5));
    }

    #[test]
    fn test_listener_returning_event_leaves_it_pending() {
        let mut tally = Tally::at("t-1", Version::new(4));
        let listener = Arc::new(Observing(Mutex::new(0)));
        tally.root_mut().subscribe(listener.clone());

        tally.add(2).unwrap();

        assert_eq!(*listener.0.lock().unwrap(), 1);
        assert_eq!(tally.root().pending_events().len(), 1);
    }

    #[test]
    fn test_flush_events_twice_returns_events_then_nothing() {
        let mut tally = Tally::start("t-1");
        tally.add(1).unwrap();

        let first = tally.flush_events();
        let second = tally.flush_events();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
    }

    #[test]
    fn test_load_from_history_applies_in_version_order() {
        // Arrange
        let mut tally = Tally::at("t-1", Version::new(2));
        let history = vec![
            TallyEvent::stored("t-1", 5, TallyEventKind::Added(100)),
            TallyEvent::stored("t-1", 3, TallyEventKind::Added(1)),
            TallyEvent::stored("t-1", 4, TallyEventKind::Added(10)),
        ];

        // Act
        let applied = tally.load_from_history(history).unwrap();

        // Assert
        assert_eq!(applied, 3);
        assert_eq!(tally.version(), Version::new(5));
        assert_eq!(tally.total, 111);
    }

    #[test]
    fn test_load_from_history_skips_applied_and_foreign_events() {
        // Arrange
        let mut tally = Tally::at("t-1", Version::new(3));
        let history = vec![
            TallyEvent::stored("t-1", 2, TallyEventKind::Added(1_000)),
            TallyEvent::stored("t-1", 3, TallyEventKind::Added(1_000)),
            TallyEvent::stored("t-2", 4, TallyEventKind::Added(1_000)),
        ];

        // Act
        let applied = tally.load_from_history(history).unwrap();

        // Assert
        assert_eq!(applied, 0);
        assert_eq!(tally.version(), Version::new(3));
        assert_eq!(tally.total, 0);
    }

    #[test]
    fn test_load_from_history_is_idempotent() {
        let history = vec![
            TallyEvent::stored("t-1", 1, TallyEventKind::Added(2)),
            TallyEvent::stored("t-1", 2, TallyEventKind::Added(3)),
        ];
        let mut tally = Tally::at("t-1", Version::INITIAL);

        tally.load_from_history(history.clone()).unwrap();
        let second = tally.load_from_history(history).unwrap();

        assert_eq!(second, 0);
        assert_eq!(tally.total, 5);
        assert_eq!(tally.version(), Version::new(2));
    }

    #[test]
    fn test_load_from_history_fails_on_missing_handler() {
        let mut tally = Tally::at("t-1", Version::INITIAL);
        let history = vec![
            TallyEvent::stored("t-1", 1, TallyEventKind::Added(2)),
            TallyEvent::stored("t-1", 2, TallyEventKind::Unrouted),
        ];

        let result = tally.load_from_history(history);

        assert!(matches!(
            result,
            Err(DomainError::MissingEventHandler { .. })
        ));
        assert_eq!(tally.version(), Version::new(1));
    }

    #[test]
    fn test_take_snapshot_is_not_supported_by_default() {
        let tally = Tally::start("t-1");

        assert!(matches!(
            tally.take_snapshot(),
            Err(DomainError::NotSupported(_))
        ));
    }

    #[test]
    fn test_notify_removed_runs_hook_then_blocks_publish() {
        // Arrange
        let mut tally = Tally::start("t-1");
        tally.add(7).unwrap();

        // Act
        tally.notify_removed().unwrap();
        let result = tally.add(1);

        // Assert
        assert_eq!(tally.total, 0);
        assert_eq!(tally.root().pending_events().len(), 3);
        assert!(tally.is_removed());
        assert!(matches!(
            result,
            Err(DomainError::IllegalOperationOnRemoved(id)) if id == "t-1"
        ));
    }

    #[test]
    fn test_notify_removed_sets_flag_when_hook_fails() {
        let mut tally = Tally::start("t-1");
        tally.fail_removal = true;

        let result = tally.notify_removed();

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(tally.is_removed());
    }
}
