//! Repository configuration.

/// Environment variable controlling whether aggregates stay resident after
/// a flush.
pub const KEEP_IN_MEMORY_VAR: &str = "EVENTED_KEEP_IN_MEMORY";

/// Environment variable overriding the resource id used for enlistment.
pub const RESOURCE_ID_VAR: &str = "EVENTED_RESOURCE_ID";

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set to a value that could not be parsed.
    #[error("{name} must be one of true, false, 1 or 0, got {value:?}")]
    InvalidBool {
        /// The variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A variable was set but empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Settings for a [`Repository`](crate::repository::Repository).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryConfig {
    resource_id: Option<String>,
    keep_in_memory: bool,
}

impl RepositoryConfig {
    /// Returns the default configuration: aggregates are discarded after a
    /// flush and enlistment uses the aggregate kind.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(KEEP_IN_MEMORY_VAR) {
            config.keep_in_memory = parse_bool(KEEP_IN_MEMORY_VAR, &value)?;
        }

        if let Some(value) = lookup(RESOURCE_ID_VAR) {
            let value = value.trim();
            if value.is_empty() {
                return Err(ConfigError::Empty(RESOURCE_ID_VAR));
            }
            config.resource_id = Some(value.to_owned());
        }

        Ok(config)
    }

    /// Sets the resource id used for flush enlistment.
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Sets whether `commit` keeps aggregates resident after flushing.
    #[must_use]
    pub fn with_keep_in_memory(mut self, keep_in_memory: bool) -> Self {
        self.keep_in_memory = keep_in_memory;
        self
    }

    /// Returns the configured resource id, if any.
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Returns whether `commit` keeps aggregates resident.
    #[must_use]
    pub fn keep_in_memory(&self) -> bool {
        self.keep_in_memory
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: value.to_owned(),
        }),
    }
}
