//! Configuration-related errors.
//!
//! Configuration failures are the only fatal errors in the runtime: a
//! coordinator refuses to construct with a broken reporting period, while
//! every transport failure stays recoverable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ConfigError {
    /// A required environment variable is absent or empty.
    #[error("Missing configuration value: {name}")]
    Missing {
        /// Name of the missing variable
        name: String,
    },

    /// The reporting period did not parse to a positive integer.
    #[error("Reporting period must be a positive integer, got {value:?}")]
    InvalidPeriod {
        /// The raw value that failed to parse
        value: String,
    },
}

impl ConfigError {
    /// Create a missing-value error for the named variable.
    pub fn missing(name: &str) -> Self {
        Self::Missing { name: name.to_string() }
    }
}
