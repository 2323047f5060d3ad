use crate::error::ClientError;
use async_trait::async_trait;
use meshfw_core::{PeerAuth, PeerClient, PeerConfig, PeerConnector, RegistryApi, RegistryError};
use meshfw_types::{
    RegistrationRecord, RegistryConfig, ResourceSample, RouteEntry, RouteRegistration,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Secure keys and registration tokens travel in this header.
const TOKEN_HEADER: &str = "token";
/// Forwarded caller credentials travel in this one.
const ACCESS_TOKEN_HEADER: &str = "access_token";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Credential presented on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAuth {
    /// The target service's secure key.
    SecureKey(String),
    /// A caller credential forwarded from an inbound request.
    AccessToken(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub auth: ClientAuth,
    /// Extra headers attached to every request.
    pub headers: HashMap<String, String>,
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, auth: ClientAuth) -> Self {
        Self {
            base_url: base_url.into(),
            auth,
            headers: HashMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl From<&RegistryConfig> for ClientConfig {
    fn from(config: &RegistryConfig) -> Self {
        Self::new(config.base_url.clone(), ClientAuth::SecureKey(config.secure_key.clone()))
    }
}

impl From<PeerConfig> for ClientConfig {
    fn from(config: PeerConfig) -> Self {
        let auth = match config.auth {
            PeerAuth::SecureKey(key) => ClientAuth::SecureKey(key),
            PeerAuth::AccessToken(token) => ClientAuth::AccessToken(token),
        };
        Self {
            base_url: config.base_url,
            auth,
            headers: config.headers,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// HTTP client for one service speaking the router wire protocol: the
/// registry itself, or any peer behind the registry's public proxy.
pub struct ServiceClient {
    client: Client,
    config: ClientConfig,
    search_method: Method,
}

impl ServiceClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client =
            Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        // Registry queries use the non-standard SEARCH verb.
        let search_method = Method::from_bytes(b"SEARCH")
            .map_err(|error| ClientError::Connection(error.to_string()))?;
        Ok(Self { client, config, search_method })
    }

    /// Client for the registry itself, authenticated with its secure key.
    pub fn for_registry(config: &RegistryConfig) -> Result<Self, ClientError> {
        Self::new(ClientConfig::from(config))
    }

    /// Register a route. Returns the record required for updates and delete.
    pub async fn create(
        &self,
        route: &RouteRegistration,
    ) -> Result<RegistrationRecord, ClientError> {
        tracing::debug!(url = %route.url, "registering route");
        let resp = self.request(Method::POST, "").json(route).send().await?;
        let body = Self::read_json(resp).await?;
        serde_json::from_value(body).map_err(|error| ClientError::InvalidResponse(error.to_string()))
    }

    /// Refresh the metrics on an existing registration.
    pub async fn update(
        &self,
        id: &str,
        token: &str,
        metrics: &[ResourceSample],
    ) -> Result<(), ClientError> {
        tracing::debug!(id, "updating registration metrics");
        let resp = self
            .request_with_token(Method::PUT, id, token)
            .json(&json!({ "metrics": metrics }))
            .send()
            .await?;
        Self::check_status(resp).await
    }

    /// Remove a registration.
    pub async fn delete(&self, id: &str, token: &str) -> Result<(), ClientError> {
        tracing::debug!(id, "deleting registration");
        let resp = self.request_with_token(Method::DELETE, id, token).send().await?;
        Self::check_status(resp).await
    }

    /// Query the target with a search predicate. Returns raw matches.
    pub async fn search(&self, query: &Value) -> Result<Vec<Value>, ClientError> {
        let resp = self.request(self.search_method.clone(), "").json(query).send().await?;
        match Self::read_json(resp).await? {
            Value::Array(items) => Ok(items),
            other => Err(ClientError::InvalidResponse(format!("expected an array, got {other}"))),
        }
    }

    /// Fetch one record by id. Rejected by peers unless the client carries
    /// a forwarded access token.
    pub async fn get(&self, id: &str) -> Result<Value, ClientError> {
        let resp = self.request(Method::GET, id).send().await?;
        Self::read_json(resp).await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, suffix: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if suffix.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{suffix}")
        }
    }

    fn bare(&self, method: Method, suffix: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, self.url(suffix));
        for (name, value) in &self.config.headers {
            builder = builder.header(name, value);
        }
        builder
    }

    fn request(&self, method: Method, suffix: &str) -> RequestBuilder {
        let builder = self.bare(method, suffix);
        match &self.config.auth {
            ClientAuth::SecureKey(key) => builder.header(TOKEN_HEADER, key),
            ClientAuth::AccessToken(token) => builder.header(ACCESS_TOKEN_HEADER, token),
        }
    }

    /// The registration token replaces the configured credential.
    fn request_with_token(&self, method: Method, suffix: &str, token: &str) -> RequestBuilder {
        self.bare(method, suffix).header(TOKEN_HEADER, token)
    }

    async fn read_json(resp: reqwest::Response) -> Result<Value, ClientError> {
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(|error| ClientError::InvalidResponse(error.to_string()))
    }

    async fn check_status(resp: reqwest::Response) -> Result<(), ClientError> {
        Self::check(resp).await.map(|_| ())
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::NotFound(message));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::ServerError { status: status.as_u16(), message });
        }
        Ok(resp)
    }
}

impl From<ClientError> for RegistryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::NotFound(message) => RegistryError::NotFound(message),
            ClientError::InvalidResponse(message) => RegistryError::InvalidResponse(message),
            other => RegistryError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl RegistryApi for ServiceClient {
    async fn create(&self, route: &RouteRegistration) -> Result<RegistrationRecord, RegistryError> {
        Ok(ServiceClient::create(self, route).await?)
    }

    async fn update(
        &self,
        id: &str,
        token: &str,
        metrics: &[ResourceSample],
    ) -> Result<(), RegistryError> {
        Ok(ServiceClient::update(self, id, token, metrics).await?)
    }

    async fn delete(&self, id: &str, token: &str) -> Result<(), RegistryError> {
        Ok(ServiceClient::delete(self, id, token).await?)
    }

    async fn search(&self, query: &Value) -> Result<Vec<RouteEntry>, RegistryError> {
        let items = ServiceClient::search(self, query).await?;
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|error| RegistryError::InvalidResponse(error.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl PeerClient for ServiceClient {
    async fn search(&self, query: &Value) -> Result<Vec<Value>, RegistryError> {
        Ok(ServiceClient::search(self, query).await?)
    }

    async fn get(&self, id: &str) -> Result<Value, RegistryError> {
        Ok(ServiceClient::get(self, id).await?)
    }
}

/// Builds HTTP peer clients for the dependency loader.
#[derive(Debug, Default, Clone)]
pub struct ReqwestConnector;

impl PeerConnector for ReqwestConnector {
    fn connect(&self, config: PeerConfig) -> Result<Arc<dyn PeerClient>, RegistryError> {
        let client = ServiceClient::new(ClientConfig::from(config))?;
        Ok(Arc::new(client))
    }
}
