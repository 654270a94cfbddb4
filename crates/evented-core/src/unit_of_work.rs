//! Unit of work: per-session tracking of aggregate lifecycle states.
//!
//! Each aggregate id touched in a session gets one entry holding its
//! [`AggregateState`]. Tracked aggregates are subscribed to their entry, so
//! every event they publish is recorded, written to the session's outbound
//! stream, and drives the entry's state forward.
//!
//! An entry stays bound to the session that first tracked it: its stream
//! receives the entry's events and its enlistment is called at most once.
//! Later lookups and removals from other sessions do not re-point it.
//!
//! Never hold an aggregate lock while calling into the unit of work: it
//! locks tracked aggregates to drain, subscribe and snapshot them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use crate::aggregate::{Aggregate, PublishListener};
use crate::change_set::ChangeSet;
use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::handle::AggregateHandle;
use crate::session::Session;
use crate::state::{Action, AggregateState, Rejected, StateKind};

/// Result of looking up an id that may already be tracked.
#[derive(Debug)]
pub enum Lookup<A: Aggregate> {
    /// The id is tracked; `None` means it is known to be absent or removed.
    Resident(Option<AggregateHandle<A>>),
    /// The id has not been seen; the store must be consulted.
    Untracked,
}

/// Tracks every aggregate touched during one session.
pub struct UnitOfWork<A: Aggregate> {
    resource_id: Arc<str>,
    entries: Mutex<Entries<A>>,
}

struct Entries<A: Aggregate> {
    index: HashMap<A::Key, usize>,
    slots: Vec<Arc<Entry<A>>>,
}

struct Entry<A: Aggregate> {
    id: A::Key,
    resource_id: Arc<str>,
    state: Mutex<AggregateState<A>>,
    session: Session,
    enlisted: AtomicBool,
}

struct EntryListener<A: Aggregate> {
    entry: Weak<Entry<A>>,
}

impl<A: Aggregate> UnitOfWork<A> {
    /// Creates an empty unit of work enlisting under `resource_id`.
    #[must_use]
    pub fn new(resource_id: impl Into<Arc<str>>) -> Self {
        Self {
            resource_id: resource_id.into(),
            entries: Mutex::new(Entries {
                index: HashMap::new(),
                slots: Vec::new(),
            }),
        }
    }

    /// Returns the resource id used for flush enlistment.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Looks up `id` without touching the store.
    pub fn lookup(&self, id: &A::Key) -> Lookup<A> {
        let Some(entry) = self.entry(id) else {
            return Lookup::Untracked;
        };
        let state = entry.lock_state();
        match &*state {
            AggregateState::Unknown => Lookup::Untracked,
            AggregateState::Removed => Lookup::Resident(None),
            tracked => Lookup::Resident(tracked.aggregate().cloned()),
        }
    }

    /// Records the outcome of a store select for `id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` if `id` is already tracked.
    pub fn track_loaded(
        &self,
        session: &Session,
        id: A::Key,
        aggregate: Option<A>,
    ) -> Result<Option<AggregateHandle<A>>, DomainError> {
        let handle = aggregate.map(AggregateHandle::new);
        let entry = self.entry_or_insert(id, session);
        entry
            .transition(Action::Load(handle.clone()))
            .map_err(|(_, error)| error)?;
        if let Some(handle) = &handle {
            entry.subscribe(handle);
        }
        Ok(handle)
    }

    /// Starts tracking a new aggregate.
    ///
    /// Events already pending on the aggregate are drained, recorded and
    /// written to the session's stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::DuplicateKey` if the id is already tracked, or
    /// `DomainError::InvalidTransition` if it was removed in this session.
    pub fn add(&self, session: &Session, aggregate: A) -> Result<AggregateHandle<A>, DomainError> {
        let handle = AggregateHandle::new(aggregate);
        let entry = self.entry_or_insert(handle.id(), session);

        let drained = handle.lock().flush_events();
        let envelopes: Vec<_> = drained
            .iter()
            .map(|event| event.to_envelope(A::KIND))
            .collect();
        entry
            .transition(Action::Add {
                aggregate: handle.clone(),
                drained,
            })
            .map_err(|(_, error)| error)?;

        for envelope in &envelopes {
            entry.session.publish(envelope);
        }
        entry.enlist();
        entry.subscribe(&handle);
        Ok(handle)
    }

    /// Marks the aggregate with `id` removed.
    ///
    /// The aggregate's removal hook runs first and may publish final events.
    /// The removal is recorded even if the hook fails; the hook's error is
    /// returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` if `id` is untracked or
    /// already removed, `DomainError::AggregateNotFound` if the store had no
    /// such aggregate, or the removal hook's error.
    pub fn remove_by_id(&self, id: &A::Key) -> Result<(), DomainError> {
        let Some(entry) = self.entry(id) else {
            return Err(DomainError::InvalidTransition {
                aggregate_id: id.to_string(),
                state: StateKind::Unknown.as_str(),
                action: "remove",
            });
        };
        let aggregate = entry.lock_state().aggregate().cloned();

        let hook = match &aggregate {
            Some(handle) => handle.lock().notify_removed(),
            None => Ok(()),
        };

        entry
            .transition(Action::Remove)
            .map_err(|(_, error)| error)?;
        if let Some(handle) = &aggregate {
            handle.lock().root_mut().unsubscribe();
        }
        entry.enlist();
        hook
    }

    /// Returns true if any tracked aggregate has changes to flush.
    #[must_use]
    pub fn requires_flush(&self) -> bool {
        self.lock_entries()
            .slots
            .iter()
            .any(|entry| entry.kind().is_dirty())
    }

    /// Returns the tracked state of `id`.
    #[must_use]
    pub fn state_of(&self, id: &A::Key) -> StateKind {
        self.entry(id).map_or(StateKind::Unknown, |entry| entry.kind())
    }

    /// Returns the number of ids in a state other than Unknown.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.lock_entries()
            .slots
            .iter()
            .filter(|entry| entry.kind() != StateKind::Unknown)
            .count()
    }

    /// Builds the unit of work that follows a commit.
    ///
    /// Every entry is replaced by its committed projection and resident
    /// aggregates are subscribed to the new entries. This unit of work keeps
    /// its states so the change set can still be built from it.
    #[must_use]
    pub fn commit(&self) -> Self {
        let next = Self::new(Arc::clone(&self.resource_id));
        let mut resubscribe = Vec::new();
        {
            let entries = self.lock_entries();
            let mut next_entries = next.lock_entries();
            for entry in &entries.slots {
                let projection = entry.lock_state().committed();
                if projection.kind() == StateKind::Unknown {
                    continue;
                }
                let handle = projection.aggregate().cloned();
                let committed = Arc::new(Entry::new(
                    entry.id.clone(),
                    Arc::clone(&self.resource_id),
                    projection,
                    entry.session.clone(),
                ));
                next_entries.insert(Arc::clone(&committed));
                if let Some(handle) = handle {
                    resubscribe.push((committed, handle));
                }
            }
        }
        for (entry, handle) in &resubscribe {
            entry.subscribe(handle);
        }
        next
    }

    /// Drains every tracked state into a change set.
    ///
    /// Each id contributes to at most one of inserts, updates and deletes.
    /// Afterwards every entry of this unit of work is Unknown.
    ///
    /// # Errors
    ///
    /// Propagates snapshot failures.
    pub fn build_change_set(&self) -> Result<ChangeSet<A>, DomainError> {
        let slots = self.lock_entries().slots.clone();
        let mut change_set = ChangeSet::new();
        for entry in slots {
            let state = std::mem::take(&mut *entry.lock_state());
            state.contribute(entry.id.clone(), &mut change_set)?;
        }
        Ok(change_set)
    }

    /// Unsubscribes every resident aggregate from this unit of work.
    ///
    /// Events published afterwards stay pending on the aggregate.
    pub fn release(&self) {
        let slots = self.lock_entries().slots.clone();
        for entry in slots {
            let aggregate = entry.lock_state().aggregate().cloned();
            if let Some(handle) = aggregate {
                handle.lock().root_mut().unsubscribe();
            }
        }
    }

    fn entry(&self, id: &A::Key) -> Option<Arc<Entry<A>>> {
        let entries = self.lock_entries();
        entries
            .index
            .get(id)
            .map(|&slot| Arc::clone(&entries.slots[slot]))
    }

    fn entry_or_insert(&self, id: A::Key, session: &Session) -> Arc<Entry<A>> {
        let mut entries = self.lock_entries();
        if let Some(&slot) = entries.index.get(&id) {
            return Arc::clone(&entries.slots[slot]);
        }
        let entry = Arc::new(Entry::new(
            id,
            Arc::clone(&self.resource_id),
            AggregateState::Unknown,
            session.clone(),
        ));
        entries.insert(Arc::clone(&entry));
        entry
    }

    fn lock_entries(&self) -> MutexGuard<'_, Entries<A>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: Aggregate> fmt::Debug for UnitOfWork<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("resource_id", &self.resource_id)
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

impl<A: Aggregate> Entries<A> {
    fn insert(&mut self, entry: Arc<Entry<A>>) {
        self.index.insert(entry.id.clone(), self.slots.len());
        self.slots.push(entry);
    }
}

impl<A: Aggregate> Entry<A> {
    fn new(
        id: A::Key,
        resource_id: Arc<str>,
        state: AggregateState<A>,
        session: Session,
    ) -> Self {
        Self {
            id,
            resource_id,
            state: Mutex::new(state),
            session,
            enlisted: AtomicBool::new(false),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AggregateState<A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn kind(&self) -> StateKind {
        self.lock_state().kind()
    }


    fn transition(&self, action: Action<A>) -> Result<(), (Action<A>, DomainError)> {
        let mut state = self.lock_state();
        let current = std::mem::take(&mut *state);
        let from = current.kind();
        let name = action.name();
        match current.transition(&self.id, action) {
            Ok(next) => {
                debug!(
                    kind = A::KIND,
                    id = %self.id,
                    action = name,
                    from = %from,
                    to = %next.kind(),
                    "aggregate state transition"
                );
                *state = next;
                Ok(())
            }
            Err(Rejected {
                state: previous,
                action,
                error,
            }) => {
                *state = previous;
                Err((action, error))
            }
        }
    }

    fn enlist(&self) {
        if !self.enlisted.swap(true, Ordering::AcqRel) {
            self.session
                .enlist(&self.resource_id, &self.id.to_string());
        }
    }

    fn subscribe(self: &Arc<Self>, handle: &AggregateHandle<A>) {
        let listener = EntryListener {
            entry: Arc::downgrade(self),
        };
        handle.lock().root_mut().subscribe(Arc::new(listener));
    }

    fn record_published(&self, event: A::Event) -> Option<A::Event> {
        let envelope = event.to_envelope(A::KIND);
        match self.transition(Action::Publish(event)) {
            Ok(()) => {
                self.session.publish(&envelope);
                self.enlist();
                None
            }
            Err((action, error)) => {
                warn!(kind = A::KIND, id = %self.id, %error, "published event not recorded");
                match action {
                    Action::Publish(event) => Some(event),
                    Action::Load(_) | Action::Add { .. } | Action::Remove => None,
                }
            }
        }
    }
}

impl<A: Aggregate> PublishListener<A::Event> for EntryListener<A> {
    fn on_published(&self, event: A::Event) -> Option<A::Event> {
        match self.entry.upgrade() {
            Some(entry) => entry.record_published(event),
            None => Some(event),
        }
    }
}
