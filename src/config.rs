//! Provider configuration.
//!
//! The host sends the provider block as JSON. Every attribute may also come
//! from a `NEW_RELIC_*` environment variable; explicit configuration wins.
//! The region picks the default endpoints, and each endpoint can be
//! overridden on its own. `NewRelicProvider::configure` hands the resolved
//! [`Endpoints`] to the client through
//! [`SessionApi::connect`](crate::client::SessionApi::connect).

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::schema::{Attribute, Diagnostic, Schema};

pub const ENV_API_KEY: &str = "NEW_RELIC_API_KEY";
pub const ENV_ACCOUNT_ID: &str = "NEW_RELIC_ACCOUNT_ID";
pub const ENV_REGION: &str = "NEW_RELIC_REGION";
pub const ENV_API_URL: &str = "NEW_RELIC_API_URL";
pub const ENV_NERDGRAPH_API_URL: &str = "NEW_RELIC_NERDGRAPH_API_URL";
pub const ENV_INFRASTRUCTURE_API_URL: &str = "NEW_RELIC_INFRASTRUCTURE_API_URL";
pub const ENV_SYNTHETICS_API_URL: &str = "NEW_RELIC_SYNTHETICS_API_URL";
pub const ENV_INSIGHTS_INSERT_URL: &str = "NEW_RELIC_INSIGHTS_INSERT_URL";
pub const ENV_INSIGHTS_INSERT_KEY: &str = "NEW_RELIC_INSIGHTS_INSERT_KEY";

/// New Relic data center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    #[default]
    Us,
    Eu,
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Region::Us),
            "EU" => Ok(Region::Eu),
            _ => Err(ConfigError::InvalidRegion(s.to_string())),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Us => f.write_str("US"),
            Region::Eu => f.write_str("EU"),
        }
    }
}

/// Base URLs of the New Relic APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_url: String,
    pub nerdgraph_api_url: String,
    pub infrastructure_api_url: String,
    pub synthetics_api_url: String,
    pub insights_insert_url: String,
}

impl Region {
    pub fn endpoints(self) -> Endpoints {
        match self {
            Region::Us => Endpoints {
                api_url: "https://api.newrelic.com/v2".to_string(),
                nerdgraph_api_url: "https://api.newrelic.com/graphql".to_string(),
                infrastructure_api_url: "https://infra-api.newrelic.com/v2".to_string(),
                synthetics_api_url: "https://synthetics.newrelic.com/synthetics/api".to_string(),
                insights_insert_url: "https://insights-collector.newrelic.com/v1/accounts"
                    .to_string(),
            },
            Region::Eu => Endpoints {
                api_url: "https://api.eu.newrelic.com/v2".to_string(),
                nerdgraph_api_url: "https://api.eu.newrelic.com/graphql".to_string(),
                infrastructure_api_url: "https://infra-api.eu.newrelic.com/v2".to_string(),
                synthetics_api_url: "https://synthetics.eu.newrelic.com/synthetics/api"
                    .to_string(),
                insights_insert_url: "https://insights-collector.eu01.nr-data.net/v1/accounts"
                    .to_string(),
            },
        }
    }
}

/// Errors found while resolving the provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("an API key is required: set api_key or {ENV_API_KEY}")]
    MissingApiKey,

    #[error("invalid region {0:?}: expected US or EU")]
    InvalidRegion(String),

    #[error("invalid account ID {0}: expected an integer")]
    InvalidAccountId(String),

    #[error("invalid provider configuration: {0}")]
    Malformed(String),
}

impl ConfigError {
    /// The configuration attribute the error refers to.
    pub fn attribute(&self) -> Option<&'static str> {
        match self {
            ConfigError::MissingApiKey => Some("api_key"),
            ConfigError::InvalidRegion(_) => Some("region"),
            ConfigError::InvalidAccountId(_) => Some("account_id"),
            ConfigError::Malformed(_) => None,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::error(self.to_string());
        match self.attribute() {
            Some(attr) => diagnostic.with_attribute(attr),
            None => diagnostic,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    api_key: Option<String>,
    account_id: Option<Value>,
    region: Option<String>,
    api_url: Option<String>,
    nerdgraph_api_url: Option<String>,
    infrastructure_api_url: Option<String>,
    synthetics_api_url: Option<String>,
    insights_insert_url: Option<String>,
    insights_insert_key: Option<String>,
}

/// Resolved provider configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Default account for resources whose `account_id` is unset.
    pub account_id: Option<i64>,
    pub region: Region,
    pub endpoints: Endpoints,
    pub insights_insert_key: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("region", &self.region)
            .field("endpoints", &self.endpoints)
            .field(
                "insights_insert_key",
                &self.insights_insert_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve configuration from the host JSON and the process environment.
    pub fn from_value(config: &Value) -> Result<Self, Vec<ConfigError>> {
        Self::from_value_with_env(config, |key| std::env::var(key).ok())
    }

    /// Resolve configuration with an explicit environment lookup.
    ///
    /// All problems are reported at once.
    pub fn from_value_with_env<F>(config: &Value, env: F) -> Result<Self, Vec<ConfigError>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = match config {
            Value::Null => RawConfig::default(),
            other => serde_json::from_value(other.clone())
                .map_err(|e| vec![ConfigError::Malformed(e.to_string())])?,
        };

        let lookup = |explicit: Option<String>, key: &str| {
            explicit
                .filter(|v| !v.is_empty())
                .or_else(|| env(key).filter(|v| !v.is_empty()))
        };

        let mut errors = Vec::new();

        let api_key = lookup(raw.api_key, ENV_API_KEY);
        if api_key.is_none() {
            errors.push(ConfigError::MissingApiKey);
        }

        let account_id = match raw.account_id {
            Some(Value::Number(n)) => match n.as_i64() {
                Some(id) => Some(id),
                None => {
                    errors.push(ConfigError::InvalidAccountId(n.to_string()));
                    None
                }
            },
            Some(Value::String(s)) if !s.is_empty() => parse_account_id(&s, &mut errors),
            Some(Value::Null) | Some(Value::String(_)) | None => env(ENV_ACCOUNT_ID)
                .filter(|v| !v.is_empty())
                .and_then(|s| parse_account_id(&s, &mut errors)),
            Some(other) => {
                errors.push(ConfigError::InvalidAccountId(other.to_string()));
                None
            }
        };

        let region = match lookup(raw.region, ENV_REGION) {
            Some(name) => name.parse::<Region>().unwrap_or_else(|e| {
                errors.push(e);
                Region::default()
            }),
            None => Region::default(),
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        let defaults = region.endpoints();
        let endpoints = Endpoints {
            api_url: lookup(raw.api_url, ENV_API_URL).unwrap_or(defaults.api_url),
            nerdgraph_api_url: lookup(raw.nerdgraph_api_url, ENV_NERDGRAPH_API_URL)
                .unwrap_or(defaults.nerdgraph_api_url),
            infrastructure_api_url: lookup(raw.infrastructure_api_url, ENV_INFRASTRUCTURE_API_URL)
                .unwrap_or(defaults.infrastructure_api_url),
            synthetics_api_url: lookup(raw.synthetics_api_url, ENV_SYNTHETICS_API_URL)
                .unwrap_or(defaults.synthetics_api_url),
            insights_insert_url: lookup(raw.insights_insert_url, ENV_INSIGHTS_INSERT_URL)
                .unwrap_or(defaults.insights_insert_url),
        };

        Ok(Self {
            api_key: api_key.unwrap_or_default(),
            account_id,
            region,
            endpoints,
            insights_insert_key: lookup(raw.insights_insert_key, ENV_INSIGHTS_INSERT_KEY),
        })
    }

    /// The resource's own account when set (non-zero), else the provider account.
    pub fn select_account_id(&self, resource_account_id: Option<i64>) -> Option<i64> {
        resource_account_id
            .filter(|id| *id != 0)
            .or(self.account_id)
    }
}

fn parse_account_id(raw: &str, errors: &mut Vec<ConfigError>) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(id) => Some(id),
        Err(_) => {
            errors.push(ConfigError::InvalidAccountId(raw.to_string()));
            None
        }
    }
}

/// Schema of the provider block.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("New Relic provider configuration")
        .with_attribute(
            "api_key",
            Attribute::optional_string()
                .sensitive()
                .with_description(format!("User API key. Falls back to {ENV_API_KEY}.")),
        )
        .with_attribute(
            "account_id",
            Attribute::optional_int64()
                .with_description(format!("Default account ID. Falls back to {ENV_ACCOUNT_ID}.")),
        )
        .with_attribute(
            "region",
            Attribute::optional_string()
                .one_of_ignore_case(&["US", "EU"])
                .with_description(format!(
                    "Data center of the account. Falls back to {ENV_REGION}, then US."
                )),
        )
        .with_attribute("api_url", Attribute::optional_string())
        .with_attribute("nerdgraph_api_url", Attribute::optional_string())
        .with_attribute("infrastructure_api_url", Attribute::optional_string())
        .with_attribute("synthetics_api_url", Attribute::optional_string())
        .with_attribute("insights_insert_url", Attribute::optional_string())
        .with_attribute(
            "insights_insert_key",
            Attribute::optional_string().sensitive(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_region_parsing_is_case_insensitive() {
        assert_eq!("us".parse::<Region>(), Ok(Region::Us));
        assert_eq!("Eu".parse::<Region>(), Ok(Region::Eu));
        assert_eq!(
            "staging".parse::<Region>(),
            Err(ConfigError::InvalidRegion("staging".to_string()))
        );
    }

    #[test]
    fn test_defaults_to_us_endpoints() {
        let config =
            ProviderConfig::from_value_with_env(&json!({"api_key": "NRAK-1"}), no_env).unwrap();
        assert_eq!(config.region, Region::Us);
        assert_eq!(config.endpoints, Region::Us.endpoints());
        assert_eq!(config.account_id, None);
    }

    #[test]
    fn test_eu_selects_eu_endpoints() {
        let config = ProviderConfig::from_value_with_env(
            &json!({"api_key": "NRAK-1", "region": "eu"}),
            no_env,
        )
        .unwrap();
        assert_eq!(config.region, Region::Eu);
        assert_eq!(config.endpoints.api_url, "https://api.eu.newrelic.com/v2");
    }

    #[test]
    fn test_api_url_override() {
        let config = ProviderConfig::from_value_with_env(
            &json!({"api_key": "k", "region": "EU", "api_url": "http://localhost:8080"}),
            no_env,
        )
        .unwrap();
        assert_eq!(config.endpoints.api_url, "http://localhost:8080");
        assert_eq!(
            config.endpoints.nerdgraph_api_url,
            "https://api.eu.newrelic.com/graphql"
        );
    }

    #[test]
    fn test_environment_fallbacks() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_KEY, "from-env"),
            (ENV_ACCOUNT_ID, "12345"),
            (ENV_REGION, "EU"),
        ]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let config = ProviderConfig::from_value_with_env(&Value::Null, lookup).unwrap();
        assert_eq!(config.api_key, "from-env");
        assert_eq!(config.account_id, Some(12345));
        assert_eq!(config.region, Region::Eu);

        let config =
            ProviderConfig::from_value_with_env(&json!({"account_id": 7, "api_key": "x"}), lookup)
                .unwrap();
        assert_eq!(config.api_key, "x");
        assert_eq!(config.account_id, Some(7));
    }

    #[test]
    fn test_collects_all_errors() {
        let errors = ProviderConfig::from_value_with_env(
            &json!({"account_id": "abc", "region": "mars"}),
            no_env,
        )
        .unwrap_err();

        let attributes: Vec<_> = errors.iter().filter_map(|e| e.attribute()).collect();
        assert_eq!(attributes, vec!["api_key", "account_id", "region"]);
        assert_eq!(errors[1].to_diagnostic().attribute.as_deref(), Some("account_id"));
    }

    #[test]
    fn test_malformed_config() {
        let errors =
            ProviderConfig::from_value_with_env(&json!({"api_key": 5}), no_env).unwrap_err();
        assert!(matches!(errors[0], ConfigError::Malformed(_)));
    }

    #[test]
    fn test_select_account_id() {
        let config = ProviderConfig::from_value_with_env(
            &json!({"api_key": "k", "account_id": 100}),
            no_env,
        )
        .unwrap();
        assert_eq!(config.select_account_id(Some(200)), Some(200));
        assert_eq!(config.select_account_id(Some(0)), Some(100));
        assert_eq!(config.select_account_id(None), Some(100));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ProviderConfig::from_value_with_env(
            &json!({"api_key": "NRAK-SECRET", "insights_insert_key": "INSERT-SECRET"}),
            no_env,
        )
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("NRAK-SECRET"));
        assert!(!debug.contains("INSERT-SECRET"));
    }
}
