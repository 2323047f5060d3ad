//! Transport-agnostic interfaces to the central registry and to peer
//! services. The core never talks to the network; a transport crate (or a
//! test fake) implements these traits.

use async_trait::async_trait;
use meshfw_types::{RegistrationRecord, ResourceSample, RouteEntry, RouteRegistration};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;

/// Operations the runtime needs from the central registry.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Register this service; returns the credential pair for later writes.
    async fn create(&self, route: &RouteRegistration) -> Result<RegistrationRecord, RegistryError>;

    /// Replace the metrics on an existing registration.
    async fn update(
        &self,
        id: &str,
        token: &str,
        metrics: &[ResourceSample],
    ) -> Result<(), RegistryError>;

    /// Remove a registration.
    async fn delete(&self, id: &str, token: &str) -> Result<(), RegistryError>;

    /// Query route entries. Supports the `provides.:name` existence
    /// predicate and arbitrary field equality.
    async fn search(&self, query: &Value) -> Result<Vec<RouteEntry>, RegistryError>;
}

/// A connected client for one peer service behind the registry proxy.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Search the peer's records by field equality.
    async fn search(&self, query: &Value) -> Result<Vec<Value>, RegistryError>;

    /// Fetch one record by id. Only works with a forwarded access token.
    async fn get(&self, id: &str) -> Result<Value, RegistryError>;
}

/// Credential carried on a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAuth {
    /// The target entry's own secure key.
    SecureKey(String),
    /// A caller credential forwarded from the inbound request.
    AccessToken(String),
}

/// Everything needed to open a connection to one peer service.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Full URL of the peer behind the registry's public proxy.
    pub base_url: String,
    /// Credential to authenticate with.
    pub auth: PeerAuth,
    /// Extra headers forwarded verbatim (the scanned `mfw-` headers).
    pub headers: HashMap<String, String>,
}

/// Factory for peer clients; one connection per resolved dependency.
pub trait PeerConnector: Send + Sync {
    /// Build a client for the given peer configuration.
    fn connect(&self, config: PeerConfig) -> Result<Arc<dyn PeerClient>, RegistryError>;
}

/// Existence predicate matching any entry that provides `name`.
///
/// The registry stores provide keys with a leading colon, so the query path
/// is `provides.:name`.
pub fn provides_exists_query(name: &str) -> Value {
    json!({ (format!("provides.:{name}")): { "$exists": true } })
}
