//! # meshfw-core
//!
//! Client-side runtime for services participating in a registry-mediated
//! microservice mesh. Three components:
//!
//! - [`resolver`] — matches logical request paths against route descriptors
//!   fetched from the central registry, capturing `:var` path variables.
//! - [`coordinator`] — per-process liveness and resource reporting: sibling
//!   workers exchange stats over the process channel, elect a single
//!   reporter per interval, and keep the registry record fresh.
//! - [`loader`] — preloads objects named by reserved `mfw-` request headers
//!   before the actual handler runs, all-or-nothing.
//!
//! The HTTP transport is a collaborator: the core consumes the
//! [`registry::RegistryApi`], [`registry::PeerConnector`], and
//! [`coordinator::WorkerBus`] traits and never talks to the network itself.

pub mod coordinator;
pub mod error;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod sampler;

// Re-export commonly used types
pub use coordinator::{ClusterStatsCoordinator, SelfRoute, WorkerBus, WorkerIdentity};
pub use error::{LoaderError, RegistryError, ResolveError};
pub use loader::DependencyLoader;
pub use registry::{PeerAuth, PeerClient, PeerConfig, PeerConnector, RegistryApi};
pub use resolver::match_route;
