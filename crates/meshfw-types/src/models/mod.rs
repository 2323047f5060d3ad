//! Data model for registry routes, stats exchange, and registration.

pub mod route;
pub mod stats;

pub use route::{MatchResult, ProvideSpec, RegistrationRecord, RouteEntry, RouteRegistration};
pub use stats::{ResourceSample, StatsMessage};
