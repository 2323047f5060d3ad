//! Runtime configuration for the mesh client.

use crate::error::ConfigError;

/// Environment variable holding the registry base URL.
pub const ENV_ROUTER_URL: &str = "ROUTER_URL";
/// Environment variable holding the registry shared secret.
pub const ENV_ROUTER_SECRET: &str = "ROUTER_SECRET";
/// Environment variable holding the reporting period in milliseconds.
pub const ENV_ROUTER_PERIOD: &str = "ROUTER_PERIOD";
/// Environment variable holding the registry's public proxy base URL.
pub const ENV_ROUTER_PROXY_URL: &str = "ROUTER_PROXY_URL";
/// Environment variable holding this service's scope identifier.
pub const ENV_SCOPE: &str = "SCOPE";

/// Connection and reporting settings for talking to the central registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry base URL, e.g. `http://router:3100`.
    pub base_url: String,
    /// Shared secret authenticating this service against the registry.
    pub secure_key: String,
    /// Stats reporting period in milliseconds. Always positive.
    pub period_ms: u64,
    /// Public proxy base URL peers are reached through.
    pub proxy_base_url: String,
    /// Scope identifier of this deployment, if any.
    pub scope: Option<String>,
}

impl RegistryConfig {
    /// Build a configuration from explicit values, validating the period.
    pub fn new(
        base_url: impl Into<String>,
        secure_key: impl Into<String>,
        period_ms: u64,
        proxy_base_url: impl Into<String>,
        scope: Option<String>,
    ) -> Result<Self, ConfigError> {
        if period_ms == 0 {
            return Err(ConfigError::InvalidPeriod { value: "0".to_string() });
        }
        Ok(Self {
            base_url: base_url.into(),
            secure_key: secure_key.into(),
            period_ms,
            proxy_base_url: proxy_base_url.into(),
            scope,
        })
    }

    /// Load the configuration from the conventional environment variables.
    ///
    /// `ROUTER_PERIOD` must parse to a positive integer; anything else is a
    /// fatal [`ConfigError`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = require_var(ENV_ROUTER_URL)?;
        let secure_key = require_var(ENV_ROUTER_SECRET)?;
        let period_raw = require_var(ENV_ROUTER_PERIOD)?;
        let proxy_base_url = require_var(ENV_ROUTER_PROXY_URL)?;
        let scope = std::env::var(ENV_SCOPE).ok().filter(|s| !s.is_empty());

        let period_ms = Self::parse_period(&period_raw)?;

        Ok(Self { base_url, secure_key, period_ms, proxy_base_url, scope })
    }

    /// Parse a reporting period string into milliseconds.
    pub fn parse_period(raw: &str) -> Result<u64, ConfigError> {
        match raw.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => Ok(ms),
            _ => Err(ConfigError::InvalidPeriod { value: raw.to_string() }),
        }
    }
}

fn require_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).ok().filter(|s| !s.is_empty()).ok_or_else(|| ConfigError::missing(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_must_be_positive_integer() {
        assert_eq!(RegistryConfig::parse_period("5000"), Ok(5000));
        assert!(RegistryConfig::parse_period("0").is_err());
        assert!(RegistryConfig::parse_period("-1").is_err());
        assert!(RegistryConfig::parse_period("abc").is_err());
        assert!(RegistryConfig::parse_period("").is_err());
        assert!(RegistryConfig::parse_period("1.5").is_err());
    }

    #[test]
    fn explicit_construction_rejects_zero_period() {
        let err = RegistryConfig::new("http://r", "key", 0, "http://p", None);
        assert!(matches!(err, Err(ConfigError::InvalidPeriod { .. })));
    }
}
