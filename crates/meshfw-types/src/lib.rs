//! # meshfw-types
//!
//! Core types, models, and error definitions shared by every crate of the
//! meshfw mesh client runtime.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::RegistryConfig;
pub use error::ConfigError;
pub use models::{
    MatchResult, ProvideSpec, RegistrationRecord, ResourceSample, RouteEntry, RouteRegistration,
    StatsMessage,
};
