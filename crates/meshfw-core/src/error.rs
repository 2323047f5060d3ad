//! Error types for the core runtime.
//!
//! Taxonomy: configuration errors (in `meshfw-types`) are fatal at
//! construction; everything here is either recoverable transport trouble or
//! a typed failure returned to the caller.

use thiserror::Error;

/// Errors returned by transport collaborators implementing the registry and
/// peer traits. Always recoverable: callers log and retry on their natural
/// cadence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Network-level failure reaching the registry or a peer.
    #[error("Registry transport error: {0}")]
    Transport(String),

    /// The remote answered, but not with anything usable.
    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),

    /// The requested record or provider does not exist.
    #[error("{0}")]
    NotFound(String),
}

/// Route resolution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// No registered route entry is eligible for the requested path.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),
}

/// A named per-dependency failure inside a preload run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFailure {
    /// Dependency name from the stripped header.
    pub name: String,
    /// What went wrong for it.
    pub error: String,
}

/// Aggregate failure of one preload run.
///
/// The loader either fully succeeds or fails with this error; the request
/// context is never partially merged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", render_failures(.failures))]
pub struct LoaderError {
    /// Every dependency that failed, in header scan order.
    pub failures: Vec<NamedFailure>,
}

fn render_failures(failures: &[NamedFailure]) -> String {
    let mut message = String::from("Pre Load failed:\n");
    for item in failures {
        message.push_str(&format!(" - {}: {}\n", item.name, item.error));
    }
    message
}
