//! Domain error types.

use thiserror::Error;

use crate::identity::Version;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),

    /// An aggregate with the same key is already tracked or stored.
    #[error("duplicate key for {aggregate_kind} aggregate {aggregate_id}")]
    DuplicateKey {
        /// The aggregate kind.
        aggregate_kind: &'static str,
        /// The conflicting aggregate key.
        aggregate_id: String,
    },

    /// Optimistic concurrency conflict detected by the backing store.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: String,
        /// The expected version.
        expected: Version,
        /// The actual version found.
        actual: Version,
    },

    /// The backing store rejected a change set on a constraint.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Reconstruction of an aggregate from its data set failed.
    #[error("failed to restore aggregate {aggregate_id}: {source}")]
    Restore {
        /// The aggregate being restored.
        aggregate_id: String,
        /// The underlying failure.
        #[source]
        source: Box<DomainError>,
    },

    /// Replay found no handler for an event kind.
    #[error("{aggregate_kind} has no handler for event {event_type}")]
    MissingEventHandler {
        /// The aggregate kind.
        aggregate_kind: &'static str,
        /// The unhandled event type.
        event_type: &'static str,
    },

    /// An assigned version did not strictly increase.
    #[error("version of aggregate {aggregate_id} must increase: current {current}, attempted {attempted}")]
    VersionUpdate {
        /// The aggregate whose version was updated.
        aggregate_id: String,
        /// The version before the update.
        current: Version,
        /// The rejected version.
        attempted: Version,
    },

    /// An event was published on an aggregate marked removed.
    #[error("aggregate {0} has been removed")]
    IllegalOperationOnRemoved(String),

    /// A data set had neither a snapshot nor a creation event.
    #[error("data set for aggregate {0} has no snapshot and no created event")]
    MissingSnapshotOrCreatedEvent(String),

    /// The operation is not supported by this aggregate.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// An argument failed a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A lifecycle action is not allowed in the aggregate's tracked state.
    #[error("cannot {action} aggregate {aggregate_id} in state {state}")]
    InvalidTransition {
        /// The aggregate key.
        aggregate_id: String,
        /// The tracked state name.
        state: &'static str,
        /// The rejected action name.
        action: &'static str,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Wraps `source` as a restore failure for `aggregate_id`.
    #[must_use]
    pub fn restore(aggregate_id: impl ToString, source: DomainError) -> Self {
        Self::Restore {
            aggregate_id: aggregate_id.to_string(),
            source: Box::new(source),
        }
    }

    /// Returns true for errors that indicate a code/data mismatch or a usage
    /// bug rather than an expected domain outcome.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Restore { .. } | Self::MissingEventHandler { .. } | Self::VersionUpdate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_wraps_source_and_is_fatal() {
        let err = DomainError::restore(
            "acct-1",
            DomainError::MissingSnapshotOrCreatedEvent("acct-1".into()),
        );

        assert!(err.is_fatal());
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(
            source.to_string(),
            "data set for aggregate acct-1 has no snapshot and no created event"
        );
    }

    #[test]
    fn test_concurrency_conflict_is_not_fatal() {
        let err = DomainError::ConcurrencyConflict {
            aggregate_id: "acct-1".into(),
            expected: Version::new(3),
            actual: Version::new(4),
        };

        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "concurrency conflict on aggregate acct-1: expected version 3, found 4"
        );
    }
}
