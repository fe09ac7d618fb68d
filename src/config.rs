//! Provider configuration.
//!
//! The host sends the `provider` block as JSON in the Configure call. Values
//! missing from the block fall back to the environment:
//!
//! | attribute | environment variable |
//! |---|---|
//! | `subscription_id` | `ARM_SUBSCRIPTION_ID` |
//! | `access_token` | `ARM_ACCESS_TOKEN` |

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cosmos::{DEFAULT_ENDPOINT, DEFAULT_POLL_INTERVAL};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema, Validator};

/// Environment variable consulted when `subscription_id` is not configured.
pub const SUBSCRIPTION_ID_ENV: &str = "ARM_SUBSCRIPTION_ID";
/// Environment variable consulted when `access_token` is not configured.
pub const ACCESS_TOKEN_ENV: &str = "ARM_ACCESS_TOKEN";

/// The `provider` block as written by the user.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProviderConfig {
    subscription_id: Option<String>,
    access_token: Option<SecretString>,
    endpoint: Option<String>,
    fail_on_existing_resources: Option<bool>,
    #[serde(with = "humantime_serde")]
    poll_interval: Option<Duration>,
}

/// Resolved provider configuration.
#[derive(Debug)]
pub struct ProviderConfig {
    /// The subscription holding the managed databases.
    pub subscription_id: String,
    /// Bearer token for Azure Resource Manager.
    pub access_token: SecretString,
    /// Base URL of Azure Resource Manager.
    pub endpoint: String,
    /// Refuse to create a resource that already exists remotely.
    pub fail_on_existing_resources: bool,
    /// Delay between polls of long-running operations.
    pub poll_interval: Duration,
}

impl ProviderConfig {
    /// Resolve the configuration from the Configure payload and the process environment.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(value, |name| std::env::var(name).ok())
    }

    /// Resolve the configuration, looking up fallbacks with `env`.
    pub fn from_value_with_env<F>(value: &Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawProviderConfig = if value.is_null() {
            RawProviderConfig::default()
        } else {
            serde_json::from_value(value.clone())
                .map_err(|e| ProviderError::Configuration(format!("invalid provider block: {}", e)))?
        };

        let subscription_id = raw
            .subscription_id
            .filter(|s| !s.is_empty())
            .or_else(|| env(SUBSCRIPTION_ID_ENV).filter(|s| !s.is_empty()))
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "subscription_id must be set in the provider block or via {}",
                    SUBSCRIPTION_ID_ENV
                ))
            })?;

        let access_token = match raw.access_token {
            Some(token) => token,
            None => env(ACCESS_TOKEN_ENV)
                .filter(|s| !s.is_empty())
                .map(SecretString::new)
                .ok_or_else(|| {
                    ProviderError::Configuration(format!(
                        "access_token must be set in the provider block or via {}",
                        ACCESS_TOKEN_ENV
                    ))
                })?,
        };

        Ok(Self {
            subscription_id,
            access_token,
            endpoint: raw.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            fail_on_existing_resources: raw.fail_on_existing_resources.unwrap_or(true),
            poll_interval: raw.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
        })
    }
}

/// Schema of the `provider` block.
pub fn schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "subscription_id",
            Attribute::optional_string()
                .with_description("The Azure subscription ID. Defaults to ARM_SUBSCRIPTION_ID."),
        )
        .with_attribute(
            "access_token",
            Attribute::optional_string()
                .sensitive()
                .with_description("Bearer token for Azure Resource Manager. Defaults to ARM_ACCESS_TOKEN."),
        )
        .with_attribute(
            "endpoint",
            Attribute::optional_string()
                .with_default(json!(DEFAULT_ENDPOINT))
                .with_description("Azure Resource Manager endpoint."),
        )
        .with_attribute(
            "fail_on_existing_resources",
            Attribute::optional_bool()
                .with_default(json!(true))
                .with_description("Fail when creating a resource that already exists instead of adopting it."),
        )
        .with_attribute(
            "poll_interval",
            Attribute::optional_string()
                .with_default(json!("10s"))
                .with_validator(Validator::Duration)
                .with_description("Delay between polls of long-running operations."),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;
    use secrecy::ExposeSecret;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_from_block() {
        let config = ProviderConfig::from_value_with_env(
            &json!({
                "subscription_id": "sub",
                "access_token": "token",
                "endpoint": "http://localhost:8080",
                "fail_on_existing_resources": false,
                "poll_interval": "2s"
            }),
            no_env,
        )
        .unwrap();

        assert_eq!(config.subscription_id, "sub");
        assert_eq!(config.access_token.expose_secret(), "token");
        assert_eq!(config.endpoint, "http://localhost:8080");
        assert!(!config.fail_on_existing_resources);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_defaults_and_env_fallback() {
        let config = ProviderConfig::from_value_with_env(&json!({}), |name| match name {
            SUBSCRIPTION_ID_ENV => Some("env-sub".to_string()),
            ACCESS_TOKEN_ENV => Some("env-token".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.subscription_id, "env-sub");
        assert_eq!(config.access_token.expose_secret(), "env-token");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert!(config.fail_on_existing_resources);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_null_payload_uses_env() {
        let config = ProviderConfig::from_value_with_env(&Value::Null, |_| Some("x".to_string()))
            .unwrap();
        assert_eq!(config.subscription_id, "x");
    }

    #[test]
    fn test_missing_credentials() {
        let err = ProviderConfig::from_value_with_env(&json!({}), no_env).unwrap_err();
        assert!(err.to_string().contains("subscription_id"));

        let err = ProviderConfig::from_value_with_env(&json!({"subscription_id": "sub"}), no_env)
            .unwrap_err();
        assert!(err.to_string().contains("access_token"));
    }

    #[test]
    fn test_invalid_duration() {
        let err = ProviderConfig::from_value_with_env(
            &json!({"subscription_id": "s", "access_token": "t", "poll_interval": "soon"}),
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ProviderConfig::from_value_with_env(
            &json!({"subscription_id": "sub", "access_token": "super-secret"}),
            no_env,
        )
        .unwrap();
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn test_schema() {
        let schema = schema();
        assert!(schema.attribute("access_token").unwrap().flags.sensitive);
        assert!(validate(&schema, &json!({"poll_interval": "30s"})).is_empty());
        assert_eq!(validate(&schema, &json!({"poll_interval": "later"})).len(), 1);
    }
}
