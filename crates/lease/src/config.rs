//! Configuration for the lease workflow.
//!
//! Values come from, in order of precedence:
//!
//! 1. Environment variables (`LEASE_*`)
//! 2. A TOML file
//! 3. Built-in defaults
//!
//! ```toml
//! registry_url = "https://platform.example.com/api"
//! return_url = "https://platform.example.com/models"
//!
//! [pricing]
//! cost_per_gpu = 100
//! credit_per_dollar = 4
//! gateway_denomination = "currency"
//! ```

use std::num::NonZeroU64;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::pricing::{Denomination, PricingConfig};
use crate::providers::http::DEFAULT_TIMEOUT_SECS;

/// Environment variable overriding the per-GPU price.
pub const ENV_COST_PER_GPU: &str = "LEASE_COST_PER_GPU";
/// Environment variable overriding the credits-per-dollar rate.
pub const ENV_CREDIT_PER_DOLLAR: &str = "LEASE_CREDIT_PER_DOLLAR";
/// Environment variable overriding the default purchase denomination.
pub const ENV_GATEWAY_DENOMINATION: &str = "LEASE_GATEWAY_DENOMINATION";
pub const ENV_REGISTRY_URL: &str = "LEASE_REGISTRY_URL";
pub const ENV_ACCOUNT_URL: &str = "LEASE_ACCOUNT_URL";
pub const ENV_GATEWAY_URL: &str = "LEASE_GATEWAY_URL";
pub const ENV_RETURN_URL: &str = "LEASE_RETURN_URL";
pub const ENV_SIGN_IN_URL: &str = "LEASE_SIGN_IN_URL";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "LEASE_REQUEST_TIMEOUT_SECS";

const DEFAULT_API_URL: &str = "http://localhost:3000/api";
const DEFAULT_RETURN_URL: &str = "http://localhost:3000/models";
const DEFAULT_SIGN_IN_URL: &str = "http://localhost:3000/sign-in";

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An override has an unusable value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Full lease workflow configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Pricing constants.
    pub pricing: PricingConfig,
    /// Base URL of the model registry API.
    pub registry_url: Url,
    /// Base URL of the account API.
    pub account_url: Url,
    /// Base URL of the checkout API.
    pub gateway_url: Url,
    /// Page the user returns to after sign-in or checkout.
    pub return_url: Url,
    /// Sign-in page.
    pub sign_in_url: Url,
    /// Timeout for collaborator requests.
    pub request_timeout_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        let api = default_url(DEFAULT_API_URL);
        Self {
            pricing: PricingConfig::default(),
            registry_url: api.clone(),
            account_url: api.clone(),
            gateway_url: api,
            return_url: default_url(DEFAULT_RETURN_URL),
            sign_in_url: default_url(DEFAULT_SIGN_IN_URL),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LeaseConfig {
    /// Parse configuration from TOML text. Missing keys take defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed TOML or invalid values,
    /// including a zero `credit_per_dollar`.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading lease config");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults with environment overrides applied.
    ///
    /// # Errors
    /// Returns error if an environment variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `LEASE_*` environment overrides.
    ///
    /// # Errors
    /// Returns error if an environment variable holds an invalid value.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns error if a looked-up value is invalid.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup(ENV_COST_PER_GPU) {
            self.pricing.cost_per_gpu = parse_value(ENV_COST_PER_GPU, &v)?;
        }
        if let Some(v) = lookup(ENV_CREDIT_PER_DOLLAR) {
            self.pricing.credit_per_dollar = parse_value::<NonZeroU64>(ENV_CREDIT_PER_DOLLAR, &v)?;
        }
        if let Some(v) = lookup(ENV_GATEWAY_DENOMINATION) {
            self.pricing.gateway_denomination =
                parse_value::<Denomination>(ENV_GATEWAY_DENOMINATION, &v)?;
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = parse_value(ENV_REQUEST_TIMEOUT_SECS, &v)?;
        }

        for (key, slot) in [
            (ENV_REGISTRY_URL, &mut self.registry_url),
            (ENV_ACCOUNT_URL, &mut self.account_url),
            (ENV_GATEWAY_URL, &mut self.gateway_url),
            (ENV_RETURN_URL, &mut self.return_url),
            (ENV_SIGN_IN_URL, &mut self.sign_in_url),
        ] {
            if let Some(v) = lookup(key) {
                *slot = parse_value(key, &v)?;
            }
        }

        Ok(self)
    }
}

fn default_url(url: &str) -> Url {
    Url::parse(url).expect("built-in default URL is valid")
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            message: format!("'{value}': {e}"),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LeaseConfig::default();
        assert_eq!(config.pricing.cost_per_gpu, 100);
        assert_eq!(config.pricing.credit_per_dollar.get(), 4);
        assert_eq!(config.pricing.gateway_denomination, Denomination::Currency);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.return_url.as_str(), "http://localhost:3000/models");
    }

    #[test]
    fn test_from_toml_partial() {
        let config = LeaseConfig::from_toml_str(
            r#"
            return_url = "https://app.example.com/models"

            [pricing]
            cost_per_gpu = 250
            gateway_denomination = "credits"
            "#,
        )
        .unwrap();
        assert_eq!(config.pricing.cost_per_gpu, 250);
        assert_eq!(config.pricing.credit_per_dollar.get(), 4);
        assert_eq!(config.pricing.gateway_denomination, Denomination::Credits);
        assert_eq!(config.return_url.as_str(), "https://app.example.com/models");
        assert_eq!(config.registry_url.as_str(), "http://localhost:3000/api");
    }

    #[test]
    fn test_from_toml_rejects_zero_rate() {
        let err = LeaseConfig::from_toml_str("[pricing]\ncredit_per_dollar = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_toml_rejects_bad_url() {
        assert!(LeaseConfig::from_toml_str("return_url = \"not a url\"").is_err());
    }

    #[test]
    fn test_overrides() {
        let config = LeaseConfig::default()
            .with_overrides(lookup(&[
                (ENV_COST_PER_GPU, "150"),
                (ENV_CREDIT_PER_DOLLAR, "10"),
                (ENV_GATEWAY_URL, "https://pay.example.com"),
            ]))
            .unwrap();
        assert_eq!(config.pricing.cost_per_gpu, 150);
        assert_eq!(config.pricing.credit_per_dollar.get(), 10);
        assert_eq!(config.gateway_url.as_str(), "https://pay.example.com/");
    }

    #[test]
    fn test_override_zero_rate_rejected() {
        let err = LeaseConfig::default()
            .with_overrides(lookup(&[(ENV_CREDIT_PER_DOLLAR, "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: ENV_CREDIT_PER_DOLLAR,
                ..
            }
        ));
    }

    #[test]
    fn test_override_bad_denomination() {
        assert!(LeaseConfig::default()
            .with_overrides(lookup(&[(ENV_GATEWAY_DENOMINATION, "gold")]))
            .is_err());
    }
}
