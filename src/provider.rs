//! The New Relic provider.
//!
//! [`NewRelicProvider`] implements [`ProviderService`] by dispatching every
//! host request to the resource module named by the resource type. The
//! remote API sits behind [`NewRelicApi`], so the same provider runs against
//! the real transport or [`MemoryClient`](crate::client::MemoryClient).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::NewRelicApi;
use crate::config::{self, ProviderConfig};
use crate::data::ResourceData;
use crate::error::ProviderError;
use crate::plan;
use crate::resources::{Context, DataSourceKind, ResourceKind};
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;

/// New Relic provider.
pub struct NewRelicProvider {
    client: Arc<dyn NewRelicApi>,
    config: RwLock<Option<Arc<ProviderConfig>>>,
    shutdown: CancellationToken,
}

impl NewRelicProvider {
    pub fn new(client: Arc<dyn NewRelicApi>) -> Self {
        Self {
            client,
            config: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled by [`ProviderService::stop`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The active configuration, if `configure` succeeded.
    pub async fn current_config(&self) -> Option<Arc<ProviderConfig>> {
        self.config.read().await.clone()
    }

    async fn configured(&self) -> Result<Arc<ProviderConfig>, ProviderError> {
        self.current_config().await.ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })
    }

    fn context<'a>(&'a self, config: &'a ProviderConfig) -> Context<'a> {
        Context::new(self.client.as_ref(), config, &self.shutdown)
    }
}

/// Fail with every schema violation in `value`.
fn check_schema(schema: &Schema, value: &Value) -> Result<(), ProviderError> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        return Ok(());
    }
    let summaries: Vec<String> = diagnostics
        .into_iter()
        .map(|d| match d.detail {
            Some(detail) => format!("{}: {}", d.summary, detail),
            None => d.summary,
        })
        .collect();
    Err(ProviderError::Validation(summaries.join("; ")))
}

fn config_diagnostics(config: &Value) -> (Option<ProviderConfig>, Vec<Diagnostic>) {
    let mut diagnostics = validate(&config::schema(), config);
    match ProviderConfig::from_value(config) {
        Ok(resolved) => (Some(resolved), diagnostics),
        Err(errors) => {
            diagnostics.extend(errors.iter().map(|e| e.to_diagnostic()));
            (None, diagnostics)
        }
    }
}

#[async_trait::async_trait]
impl ProviderService for NewRelicProvider {
    fn schema(&self) -> ProviderSchema {
        let schema = ResourceKind::ALL.into_iter().fold(
            ProviderSchema::new().with_provider_config(config::schema()),
            |schema, kind| schema.with_resource(kind.name(), kind.schema()),
        );
        DataSourceKind::ALL
            .into_iter()
            .fold(schema, |schema, kind| {
                schema.with_data_source(kind.name(), kind.schema())
            })
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let (_, diagnostics) = config_diagnostics(&config);
        Ok(diagnostics)
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let (resolved, diagnostics) = config_diagnostics(&config);
        let Some(resolved) = resolved.filter(|_| !diagnostics.iter().any(Diagnostic::is_error))
        else {
            warn!(errors = diagnostics.len(), "provider configuration rejected");
            return Ok(diagnostics);
        };

        self.client
            .connect(&resolved.endpoints, &resolved.api_key)
            .await?;
        info!(
            region = %resolved.region,
            account_id = ?resolved.account_id,
            api_url = %resolved.endpoints.api_url,
            "provider configured"
        );
        *self.config.write().await = Some(Arc::new(resolved));
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("stopping provider, cancelling in-flight operations");
        self.shutdown.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let kind = ResourceKind::from_name(resource_type)?;
        Ok(validate(&kind.schema(), &config))
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let kind = ResourceKind::from_name(resource_type)?;
        let schema = kind.schema();
        if !proposed_state.is_null() {
            check_schema(&schema, &proposed_state)?;
        }
        Ok(plan::plan(&schema, prior_state.as_ref(), proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_name(resource_type)?;
        check_schema(&kind.schema(), &planned_state)?;
        let config = self.configured().await?;

        let d = ResourceData::from_value(planned_state)?;
        let d = kind.create(&self.context(&config), d).await?;
        Ok(d.into_state())
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_name(resource_type)?;
        if current_state.is_null() {
            return Ok(Value::Null);
        }
        let config = self.configured().await?;

        let d = ResourceData::from_value(current_state)?;
        let d = kind.read(&self.context(&config), d).await?;
        if d.id().is_none() {
            debug!(resource_type, "remote object gone, returning empty state");
        }
        Ok(d.into_state())
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_name(resource_type)?;
        check_schema(&kind.schema(), &planned_state)?;
        let config = self.configured().await?;

        let prior = ResourceData::from_value(prior_state)?;
        let mut d = ResourceData::from_value(planned_state)?;
        if d.id().is_none() {
            d.set_id(prior.require_id(resource_type)?);
        }

        let d = kind.update(&self.context(&config), d).await?;
        Ok(d.into_state())
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let kind = ResourceKind::from_name(resource_type)?;
        let config = self.configured().await?;

        let d = ResourceData::from_value(current_state)?;
        kind.delete(&self.context(&config), d).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let kind = ResourceKind::from_name(resource_type)?;
        let config = self.configured().await?;

        info!(resource_type, id, "importing resource");
        let d = kind.import(&self.context(&config), id).await?;
        Ok(vec![ImportedResource::new(resource_type, d.into_value())])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let kind = DataSourceKind::from_name(data_source_type)?;
        Ok(validate(&kind.schema(), &config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let kind = DataSourceKind::from_name(data_source_type)?;
        check_schema(&kind.schema(), &config)?;
        let provider_config = self.configured().await?;

        let d = ResourceData::from_value(config)?;
        let d = kind.read(&self.context(&provider_config), d).await?;
        Ok(d.into_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::config::Region;
    use crate::resources::alert_policy;
    use serde_json::json;

    fn provider() -> NewRelicProvider {
        NewRelicProvider::new(Arc::new(MemoryClient::new()))
    }

    #[test]
    fn test_schema_lists_every_kind() {
        let schema = provider().schema();
        for kind in ResourceKind::ALL {
            assert!(schema.resources.contains_key(kind.name()), "{}", kind.name());
        }
        assert!(schema.data_sources.contains_key(alert_policy::NAME));
        assert!(schema.provider.block.attributes.contains_key("api_key"));
    }

    #[test]
    fn test_check_schema_joins_diagnostics() {
        let err = check_schema(&alert_policy::schema(), &json!({})).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.message().contains("name"), "{}", err);
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_region() {
        let provider = provider();
        let diagnostics = provider
            .configure(json!({"api_key": "k", "region": "mars"}))
            .await
            .unwrap();

        assert!(diagnostics.iter().any(|d| d.is_error()));
        assert!(provider.current_config().await.is_none());
    }

    #[tokio::test]
    async fn test_configure_connects_client_to_endpoint_overrides() {
        let client = Arc::new(MemoryClient::new());
        let provider = NewRelicProvider::new(client.clone());
        let diagnostics = provider
            .configure(json!({
                "api_key": "NRAK-1",
                "region": "EU",
                "api_url": "http://localhost:8080/v2",
            }))
            .await
            .unwrap();
        assert!(diagnostics.is_empty(), "{diagnostics:?}");

        let endpoints = client.connected_endpoints().await.unwrap();
        assert_eq!(endpoints.api_url, "http://localhost:8080/v2");
        assert_eq!(
            endpoints.nerdgraph_api_url,
            Region::Eu.endpoints().nerdgraph_api_url
        );
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let provider = provider();
        let result = provider
            .create(alert_policy::NAME, json!({"name": "p"}))
            .await;
        assert!(matches!(result, Err(ProviderError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let provider = provider();
        assert!(matches!(
            provider.read("newrelic_dashboard", json!({"id": "1"})).await,
            Err(ProviderError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_cancels_token() {
        let provider = provider();
        let token = provider.shutdown_token();
        assert!(!token.is_cancelled());
        provider.stop().await.unwrap();
        assert!(token.is_cancelled());
    }
}
