//! Error types shared across the crate.

use thiserror::Error;

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired {
        /// Variable name.
        key: String,
        /// How to provide it.
        hint: String,
    },

    /// A variable is set but its value is unusable.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        message: String,
    },
}
