//! Dependency preloading.
//!
//! Inbound requests may carry reserved `mfw-` headers naming objects owned
//! by other services that must be fetched before the handler runs. The
//! loader scans those headers, locates a provider for each name through the
//! registry, fetches the objects concurrently, and merges the results
//! all-or-nothing: one failed dependency fails the whole preload and leaves
//! the request context untouched.

use futures::future::join_all;
use meshfw_types::RegistryConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{LoaderError, NamedFailure, RegistryError};
use crate::registry::{provides_exists_query, PeerAuth, PeerConfig, PeerConnector, RegistryApi};

/// Reserved prefix marking dependency headers (case preserved from the wire).
pub const DEPENDENCY_HEADER_PREFIX: &str = "mfw-";

/// Header names carrying a caller credential to forward to peers.
const ACCESS_TOKEN_HEADERS: [&str; 2] = ["access_token", "Access-Token"];

/// One dependency to preload, built during the header scan.
struct PreloadItem {
    name: String,
    raw_value: String,
}

/// Everything extracted from the inbound headers in a single pass.
struct HeaderScan {
    items: Vec<PreloadItem>,
    /// Stripped name -> raw value, for `:var` path substitution.
    values: HashMap<String, String>,
    /// Full `mfw-` headers, forwarded verbatim on peer connections.
    forwarded: HashMap<String, String>,
    access_token: Option<String>,
}

impl HeaderScan {
    fn new(headers: &HashMap<String, String>) -> Self {
        let mut items = Vec::new();
        let mut values = HashMap::new();
        let mut forwarded = HashMap::new();

        for (name, value) in headers {
            if let Some(stripped) = name.strip_prefix(DEPENDENCY_HEADER_PREFIX) {
                items.push(PreloadItem { name: stripped.to_string(), raw_value: value.clone() });
                values.insert(stripped.to_string(), value.clone());
                forwarded.insert(name.clone(), value.clone());
            }
        }

        let access_token =
            ACCESS_TOKEN_HEADERS.iter().find_map(|header| headers.get(*header)).cloned();

        Self { items, values, forwarded, access_token }
    }
}

/// Per-request loader for header-named dependencies.
pub struct DependencyLoader {
    registry: Arc<dyn RegistryApi>,
    peers: Arc<dyn PeerConnector>,
    proxy_base_url: String,
    scope: Option<String>,
}

impl DependencyLoader {
    pub fn new(
        registry: Arc<dyn RegistryApi>,
        peers: Arc<dyn PeerConnector>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            registry,
            peers,
            proxy_base_url: config.proxy_base_url.clone(),
            scope: config.scope.clone(),
        }
    }

    /// Resolve and fetch every dependency named by the request headers.
    ///
    /// Returns the values to merge into the request context, keyed by
    /// dependency name. Either every non-skipped dependency loaded and the
    /// full map is returned, or nothing is: any failure produces a
    /// [`LoaderError`] enumerating every failed name.
    pub async fn preload(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<HashMap<String, Value>, LoaderError> {
        let scan = HeaderScan::new(headers);
        if scan.items.is_empty() {
            return Ok(HashMap::new());
        }
        debug!(count = scan.items.len(), "preloading header dependencies");

        let outcomes = join_all(scan.items.iter().map(|item| async {
            match self.resolve_item(item, &scan).await {
                Ok(Some(value)) => Outcome::Loaded(item.name.clone(), value),
                Ok(None) => {
                    debug!(name = %item.name, "self-reference, skipped");
                    Outcome::Skipped
                }
                Err(error) => Outcome::Failed(item.name.clone(), error.to_string()),
            }
        }))
        .await;

        let mut loaded = HashMap::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Loaded(name, value) => {
                    loaded.insert(name, value);
                }
                Outcome::Skipped => {}
                Outcome::Failed(name, error) => failures.push(NamedFailure { name, error }),
            }
        }

        if !failures.is_empty() {
            return Err(LoaderError { failures });
        }
        Ok(loaded)
    }

    /// Resolve one dependency. `Ok(None)` means the provider is this
    /// service itself and the dependency is skipped.
    async fn resolve_item(
        &self,
        item: &PreloadItem,
        scan: &HeaderScan,
    ) -> Result<Option<Value>, RegistryError> {
        let routes = self.registry.search(&provides_exists_query(&item.name)).await?;
        let Some(route) = routes.into_iter().next() else {
            return Err(RegistryError::NotFound(format!("no provider for {}", item.name)));
        };

        if route.scope == self.scope {
            return Ok(None);
        }

        let Some(template) = route.path.first() else {
            return Err(RegistryError::InvalidResponse(format!(
                "provider for {} has no path",
                item.name
            )));
        };
        let base_url = self.peer_url(template, &scan.values);

        if let Some(token) = &scan.access_token {
            let client = self.peers.connect(PeerConfig {
                base_url,
                auth: PeerAuth::AccessToken(token.clone()),
                headers: scan.forwarded.clone(),
            })?;
            return client.get(&item.raw_value).await.map(Some);
        }

        let secure_key = route.secure_key.clone().ok_or_else(|| {
            RegistryError::InvalidResponse(format!("provider for {} has no secure key", item.name))
        })?;
        let spec = route.provide_spec(&item.name).ok_or_else(|| {
            RegistryError::InvalidResponse(format!(
                "provider for {} has no search descriptor",
                item.name
            ))
        })?;

        let query =
            json!({ (spec.field.clone()): coerce_value(&item.raw_value, spec.kind.as_deref())? });
        let client = self.peers.connect(PeerConfig {
            base_url,
            auth: PeerAuth::SecureKey(secure_key),
            headers: scan.forwarded.clone(),
        })?;

        let results = client.search(&query).await?;
        results
            .into_iter()
            .next()
            .map(Some)
            .ok_or_else(|| RegistryError::NotFound(format!("no result for {}", item.name)))
    }

    /// Build the peer URL: substitute `:var` template segments with scanned
    /// header values where available, keep the literal text otherwise, and
    /// prefix with the registry's public proxy base.
    fn peer_url(&self, template: &str, values: &HashMap<String, String>) -> String {
        let path: Vec<&str> = template
            .split('/')
            .map(|segment| {
                segment
                    .strip_prefix(':')
                    .and_then(|name| values.get(name))
                    .map_or(segment, String::as_str)
            })
            .collect();
        format!("{}/{}", self.proxy_base_url.trim_end_matches('/'), path.join("/"))
    }
}

enum Outcome {
    Loaded(String, Value),
    Skipped,
    Failed(String, String),
}

/// Coerce a raw header value per the provider's declared search type.
fn coerce_value(raw: &str, kind: Option<&str>) -> Result<Value, RegistryError> {
    match kind {
        Some("number") => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| RegistryError::InvalidResponse(format!("{raw:?} is not a number"))),
        Some("float") => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| RegistryError::InvalidResponse(format!("{raw:?} is not a float"))),
        _ => Ok(Value::from(raw)),
    }
}
