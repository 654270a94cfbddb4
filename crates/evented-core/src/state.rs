//! Per-aggregate lifecycle states tracked by a unit of work.
//!
//! [`AggregateState::transition`] is the whole state machine: every
//! `(state, action)` pair is matched explicitly, and side effects (stream
//! writes, subscriptions, enlistment) are left to the unit of work.

use std::fmt;

use crate::aggregate::Aggregate;
use crate::change_set::ChangeSet;
use crate::error::DomainError;
use crate::handle::AggregateHandle;

/// Lifecycle state of one aggregate id within a session.
pub enum AggregateState<A: Aggregate> {
    /// Not yet seen in this session.
    Unknown,
    /// Selected from the store and not changed since. `None` records a miss.
    Loaded(Option<AggregateHandle<A>>),
    /// Added in this session, with every event it produced.
    Added {
        /// The tracked aggregate.
        aggregate: AggregateHandle<A>,
        /// Events produced in this session.
        events: Vec<A::Event>,
    },
    /// Loaded and then changed in this session.
    Modified {
        /// The tracked aggregate.
        aggregate: AggregateHandle<A>,
        /// Events produced in this session.
        events: Vec<A::Event>,
    },
    /// Removed in this session.
    Removed,
}

/// An operation requested against a tracked aggregate id.
pub enum Action<A: Aggregate> {
    /// The store was consulted; carries the restored aggregate on a hit.
    Load(Option<AggregateHandle<A>>),
    /// A new aggregate is added, with the events drained from it.
    Add {
        /// The aggregate being added.
        aggregate: AggregateHandle<A>,
        /// Events that were pending on the aggregate when it was added.
        drained: Vec<A::Event>,
    },
    /// The tracked aggregate published an event.
    Publish(A::Event),
    /// The aggregate is removed.
    Remove,
}

/// Discriminant of [`AggregateState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// See [`AggregateState::Unknown`].
    Unknown,
    /// See [`AggregateState::Loaded`].
    Loaded,
    /// See [`AggregateState::Added`].
    Added,
    /// See [`AggregateState::Modified`].
    Modified,
    /// See [`AggregateState::Removed`].
    Removed,
}

impl StateKind {
    /// Returns the state name used in errors and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Loaded => "loaded",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }

    /// Returns true for states that contribute to a change set.
    #[must_use]
    pub fn is_dirty(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Removed)
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<A: Aggregate> Action<A> {
    /// Returns the action name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Add { .. } => "add",
            Self::Publish(_) => "publish",
            Self::Remove => "remove",
        }
    }
}

/// A transition that was refused, handing back the untouched state and the
/// action that caused the refusal.
pub struct Rejected<A: Aggregate> {
    /// The state before the rejected action.
    pub state: AggregateState<A>,
    /// The rejected action.
    pub action: Action<A>,
    /// Why the action was rejected.
    pub error: DomainError,
}

impl<A: Aggregate> fmt::Debug for Rejected<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("state", &self.state.kind())
            .field("action", &self.action.name())
            .field("error", &self.error)
            .finish()
    }
}

impl<A: Aggregate> AggregateState<A> {
    /// Returns the discriminant.
    #[must_use]
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Unknown => StateKind::Unknown,
            Self::Loaded(_) => StateKind::Loaded,
            Self::Added { .. } => StateKind::Added,
            Self::Modified { .. } => StateKind::Modified,
            Self::Removed => StateKind::Removed,
        }
    }

    /// Returns the tracked aggregate, if the state holds one.
    #[must_use]
    pub fn aggregate(&self) -> Option<&AggregateHandle<A>> {
        match self {
            Self::Loaded(aggregate) => aggregate.as_ref(),
            Self::Added { aggregate, .. } | Self::Modified { aggregate, .. } => Some(aggregate),
            Self::Unknown | Self::Removed => None,
        }
    }

    /// Returns the events recorded in this session.
    #[must_use]
    pub fn events(&self) -> &[A::Event] {
        match self {
            Self::Added { events, .. } | Self::Modified { events, .. } => events,
            Self::Unknown | Self::Loaded(_) | Self::Removed => &[],
        }
    }

    /// Applies `action` to this state.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected`] for illegal pairs: `DomainError::DuplicateKey`
    /// when adding a tracked aggregate, `DomainError::AggregateNotFound` when
    /// removing a recorded miss, and `DomainError::InvalidTransition`
    /// otherwise.
    #[allow(clippy::result_large_err)]
    pub fn transition(self, id: &A::Key, action: Action<A>) -> Result<Self, Rejected<A>> {
        match (self, action) {
            (Self::Unknown, Action::Load(aggregate)) => Ok(Self::Loaded(aggregate)),

            (Self::Unknown | Self::Loaded(None), Action::Add { aggregate, drained }) => {
                Ok(Self::Added {
                    aggregate,
                    events: drained,
                })
            }
            (
                state @ (Self::Loaded(Some(_)) | Self::Added { .. } | Self::Modified { .. }),
                action @ Action::Add { .. },
            ) => Err(Rejected {
                state,
                action,
                error: DomainError::DuplicateKey {
                    aggregate_kind: A::KIND,
                    aggregate_id: id.to_string(),
                },
            }),

            (Self::Loaded(Some(aggregate)), Action::Publish(event)) => Ok(Self::Modified {
                aggregate,
                events: vec![event],
            }),
            (Self::Added { aggregate, mut events }, Action::Publish(event)) => {
                events.push(event);
                Ok(Self::Added { aggregate, events })
            }
            (Self::Modified { aggregate, mut events }, Action::Publish(event)) => {
                events.push(event);
                Ok(Self::Modified { aggregate, events })
            }

            (
                Self::Loaded(Some(_)) | Self::Added { .. } | Self::Modified { .. },
                Action::Remove,
            ) => Ok(Self::Removed),
            (state @ Self::Loaded(None), action @ Action::Remove) => Err(Rejected {
                state,
                action,
                error: DomainError::AggregateNotFound(id.to_string()),
            }),

            (
                state @ (Self::Loaded(_) | Self::Added { .. } | Self::Modified { .. }),
                action @ Action::Load(_),
            )
            | (state @ Self::Unknown, action @ (Action::Publish(_) | Action::Remove))
            | (state @ Self::Loaded(None), action @ Action::Publish(_))
            | (state @ Self::Removed, action) => {
                let error = DomainError::InvalidTransition {
                    aggregate_id: id.to_string(),
                    state: state.kind().as_str(),
                    action: action.name(),
                };
                Err(Rejected {
                    state,
                    action,
                    error,
                })
            }
        }
    }

    /// Returns the state this one becomes once its changes are committed.
    ///
    /// Added and Modified collapse to Loaded over the same aggregate,
    /// Removed is forgotten, and Loaded is kept.
    #[must_use]
    pub fn committed(&self) -> Self {
        match self {
            Self::Loaded(aggregate) => Self::Loaded(aggregate.clone()),
            Self::Added { aggregate, .. } | Self::Modified { aggregate, .. } => {
                Self::Loaded(Some(aggregate.clone()))
            }
            Self::Unknown | Self::Removed => Self::Unknown,
        }
    }

    /// Adds this state's changes to `change_set`.
    ///
    /// Added contributes an insert, Modified an update and Removed a
    /// delete; Unknown and Loaded contribute nothing.
    ///
    /// # Errors
    ///
    /// Propagates snapshot failures from the change set.
    pub fn contribute(self, id: A::Key, change_set: &mut ChangeSet<A>) -> Result<(), DomainError> {
        match self {
            Self::Added { aggregate, events } => {
                let aggregate = aggregate.lock();
                change_set.add_to_insert(&aggregate, events)
            }
            Self::Modified { aggregate, events } => {
                let aggregate = aggregate.lock();
                change_set.add_to_update(&aggregate, events)
            }
            Self::Removed => {
                change_set.add_to_delete(id);
                Ok(())
            }
            Self::Unknown | Self::Loaded(_) => Ok(()),
        }
    }
}

impl<A: Aggregate> Default for AggregateState<A> {
    fn default() -> Self {
        Self::Unknown
    }
}

impl<A: Aggregate> fmt::Debug for AggregateState<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateState")
            .field("kind", &self.kind())
            .field("events", &self.events().len())
            .finish()
    }
}
