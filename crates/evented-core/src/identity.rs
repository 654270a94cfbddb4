//! Versioned aggregate identity.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Monotonically increasing aggregate version.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The version of an aggregate that has accepted no events.
    pub const INITIAL: Self = Self(0);

    /// Creates a version from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the version following this one, or this one at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Bound for aggregate keys.
pub trait AggregateKey:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T> AggregateKey for T where
    T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

/// An immutable key paired with a strictly increasing version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedIdentity<K> {
    key: K,
    version: Version,
}

impl<K: AggregateKey> VersionedIdentity<K> {
    /// Creates an identity at `version`.
    #[must_use]
    pub fn new(key: K, version: Version) -> Self {
        Self { key, version }
    }

    /// Creates an identity for an aggregate that has accepted no events.
    #[must_use]
    pub fn fresh(key: K) -> Self {
        Self::new(key, Version::INITIAL)
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the current version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Moves the version forward to `version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::VersionUpdate` unless `version` is strictly
    /// greater than the current version.
    pub fn advance_to(&mut self, version: Version) -> Result<(), DomainError> {
        if version <= self.version {
            return Err(DomainError::VersionUpdate {
                aggregate_id: self.key.to_string(),
                current: self.version,
                attempted: version,
            });
        }
        self.version = version;
        Ok(())
    }
}
