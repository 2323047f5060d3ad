//! Route descriptors as stored by, and exchanged with, the central registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::stats::ResourceSample;

/// A route descriptor fetched fresh from the registry per resolution.
///
/// Never cached across calls: the registry is the single source of truth for
/// which instance currently serves a path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteEntry {
    /// Registry-assigned record id.
    #[serde(default)]
    pub id: Option<String>,
    /// Ordered list of path templates this entry serves.
    #[serde(default)]
    pub path: Vec<String>,
    /// Secure key used when calling this service directly.
    #[serde(rename = "secureKey", default)]
    pub secure_key: Option<String>,
    /// Deployment scope tag, used for the self-reference guard.
    #[serde(default)]
    pub scope: Option<String>,
    /// Entry kind; anything other than `"handler"` is not routable.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Named objects this service provides, keyed by dependency name.
    #[serde(default)]
    pub provides: HashMap<String, ProvideSpec>,
}

impl RouteEntry {
    /// Whether this entry participates in path resolution.
    ///
    /// Entries without a kind are routable; anything explicitly typed must
    /// be a `"handler"`.
    pub fn is_handler(&self) -> bool {
        self.kind.as_deref().is_none_or(|k| k == "handler")
    }

    /// Look up the provide descriptor for a dependency name.
    ///
    /// Registry records written by older generations key `provides` with a
    /// leading colon (`":name"`); both spellings resolve.
    pub fn provide_spec(&self, name: &str) -> Option<&ProvideSpec> {
        self.provides.get(name).or_else(|| self.provides.get(&format!(":{name}")))
    }
}

/// How a provided object is searched for: which field, coerced to what type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvideSpec {
    /// Field name to search the providing service by.
    pub field: String,
    /// Declared value type: `"number"`, `"float"`, or anything else = string.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// A successful resolution: the chosen entry plus captured path variables.
///
/// Valid only for the resolution that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// The eligible route entry that was selected.
    pub route: RouteEntry,
    /// Captured `:var` template variables, name to requested segment.
    pub match_variables: HashMap<String, String>,
}

/// Opaque credential pair returned by a successful registration.
///
/// Required for update/delete; replaced wholesale on every successful
/// (re-)registration and cleared entirely on any update failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Registry record id.
    pub id: String,
    /// Write token for the record.
    pub token: String,
}

/// Payload for registering this service with the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRegistration {
    /// Self URL the registry should route to, `http(s)://IP:PORT`.
    pub url: String,
    /// Path templates to register under.
    pub path: Vec<String>,
    /// Latest per-worker resource samples.
    #[serde(default)]
    pub metrics: Vec<ResourceSample>,
    /// Secure key callers use to reach this service.
    #[serde(rename = "secureKey")]
    pub secure_key: String,
    /// Deployment scope tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}
