//! Schema upgrades for stored events and snapshots.
//!
//! Each upgradable kind declares a closed set of schema versions and a
//! single-step upgrade. [`upgrade_to_latest`] chains steps until the value
//! reaches [`Upgrade::LATEST_SCHEMA`], so history written under an older
//! schema can be replayed without rewriting it.

use crate::error::DomainError;

/// A value that knows its schema version and how to move one step forward.
///
/// Kinds that have never changed shape can use the defaults:
/// `impl Upgrade for MyEvent {}`.
pub trait Upgrade: Sized {
    /// The newest schema version for this kind.
    const LATEST_SCHEMA: u32 = 1;

    /// The schema version this value was written with.
    fn schema_version(&self) -> u32 {
        Self::LATEST_SCHEMA
    }

    /// Converts the value to the next schema version.
    ///
    /// Only called while `schema_version() < LATEST_SCHEMA`.
    #[must_use]
    fn upgrade_step(self) -> Self {
        self
    }
}

/// Upgrades `value` through every intermediate schema to the latest one.
///
/// Values already at the latest schema are returned unchanged.
///
/// # Errors
///
/// Returns `DomainError::InvalidArgument` if the value claims a schema newer
/// than the latest known one, or if a step fails to advance the schema.
pub fn upgrade_to_latest<T: Upgrade>(mut value: T) -> Result<T, DomainError> {
    let mut schema = value.schema_version();
    if schema > T::LATEST_SCHEMA {
        return Err(DomainError::InvalidArgument(format!(
            "schema version {schema} is newer than latest {}",
            T::LATEST_SCHEMA
        )));
    }
    while schema < T::LATEST_SCHEMA {
        value = value.upgrade_step();
        let upgraded = value.schema_version();
        if upgraded <= schema {
            return Err(DomainError::InvalidArgument(format!(
                "upgrade from schema version {schema} did not advance"
            )));
        }
        schema = upgraded;
    }
    Ok(value)
}
