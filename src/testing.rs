//! Test harness for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way the host does,
//! without a gRPC server. [`ProviderTester::in_memory`] wires the New Relic
//! provider to a [`MemoryClient`] and hands back the client so tests can
//! inspect or tamper with remote objects.
//!
//! # Example
//!
//! ```ignore
//! use newrelic_provider::testing::ProviderTester;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn policy_lifecycle() {
//!     let (tester, _client) = ProviderTester::in_memory();
//!     tester.configure(json!({"api_key": "test", "account_id": 1})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("newrelic_alert_policy", json!({"name": "web"}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["incident_preference"], "PER_POLICY");
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::client::MemoryClient;
use crate::error::ProviderError;
use crate::provider::NewRelicProvider;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Drives provider operations directly.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl ProviderTester<NewRelicProvider> {
    /// A New Relic provider over a fresh [`MemoryClient`].
    pub fn in_memory() -> (Self, Arc<MemoryClient>) {
        let client = Arc::new(MemoryClient::new());
        (Self::with_client(Arc::clone(&client)), client)
    }

    /// A New Relic provider over a prepared [`MemoryClient`].
    pub fn with_client(client: Arc<MemoryClient>) -> Self {
        Self::new(NewRelicProvider::new(client))
    }
}

impl<P: ProviderService> ProviderTester<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// `Err` carries the error diagnostics, if any.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// `Err` carries the error diagnostics, if any.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// `null` when the remote object is gone.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create, then read back.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Plan against `prior_state`, update, then read back.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }

    /// Plan the destroy, then delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Whether a read of `state` reports the remote object as gone.
    pub async fn is_gone(&self, resource_type: &str, state: Value) -> Result<bool, ProviderError> {
        Ok(self.read(resource_type, state).await?.is_null())
    }

    /// Create, update, delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone())
            .await?;
        Ok(updated)
    }
}

/// A tester call that failed.
#[derive(Debug)]
pub enum TestError {
    /// Error diagnostics were returned.
    Diagnostics(Vec<Diagnostic>),
    Provider(ProviderError),
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Diagnostics(diagnostics) => {
                writeln!(f, "{} error diagnostic(s):", diagnostics.len())?;
                for d in diagnostics {
                    write!(f, "  {}", d.summary)?;
                    if let Some(detail) = &d.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attribute) = &d.attribute {
                        write!(f, " (at {})", attribute)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            TestError::Provider(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// # Panics
///
/// If the plan is empty or replaces.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "expected a create plan, got no changes");
    assert!(!plan.requires_replace, "expected a create plan, got a replacement");
}

/// # Panics
///
/// If the plan changes anything.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "expected no changes, got {:?}",
        changed_paths(plan)
    );
}

/// # Panics
///
/// If the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "expected a replacement, changes were {:?}",
        changed_paths(plan)
    );
}

/// # Panics
///
/// If the plan is empty or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "expected an update, got no changes");
    assert!(
        !plan.requires_replace,
        "expected an in-place update, changes {:?} force replacement",
        changed_paths(plan)
    );
}

/// Passes when `attribute` or anything below it changes.
///
/// # Panics
///
/// If nothing under `attribute` changes.
pub fn assert_plan_changes_attribute(plan: &PlanResult, attribute: &str) {
    assert!(
        plan.changes_attribute(attribute),
        "expected a change to {}, changes were {:?}",
        attribute,
        changed_paths(plan)
    );
}

/// # Panics
///
/// If any diagnostic is an error.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| &d.summary)
        .collect();
    assert!(errors.is_empty(), "expected no errors, got {:?}", errors);
}

/// # Panics
///
/// If no error diagnostic names `attribute`.
pub fn assert_error_at(diagnostics: &[Diagnostic], attribute: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.attribute.as_deref() == Some(attribute)),
        "expected an error at {}, got {:?}",
        attribute,
        diagnostics
            .iter()
            .map(|d| (&d.attribute, &d.summary))
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::alert_policy;
    use serde_json::json;

    async fn configured() -> (ProviderTester<NewRelicProvider>, Arc<MemoryClient>) {
        let (tester, client) = ProviderTester::in_memory();
        tester
            .configure(json!({"api_key": "test", "account_id": 1}))
            .await
            .unwrap();
        (tester, client)
    }

    #[tokio::test]
    async fn test_resource_types() {
        let (tester, _) = ProviderTester::in_memory();
        let types = tester.resource_types();
        assert!(types.contains(&alert_policy::NAME.to_string()));
        assert_eq!(tester.data_source_types(), vec![alert_policy::NAME.to_string()]);
    }

    #[tokio::test]
    async fn test_configure_reports_attribute() {
        let (tester, _) = ProviderTester::in_memory();
        match tester
            .configure(json!({"api_key": "k", "account_id": "abc"}))
            .await
        {
            Err(TestError::Diagnostics(diagnostics)) => assert_error_at(&diagnostics, "account_id"),
            other => panic!("expected diagnostics, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plan_create_applies_default() {
        let (tester, _) = configured().await;
        let plan = tester
            .plan_create(alert_policy::NAME, json!({"name": "web"}))
            .await
            .unwrap();

        assert_plan_creates(&plan);
        assert_eq!(plan.planned_state["incident_preference"], "PER_POLICY");
    }

    #[tokio::test]
    async fn test_plan_update_in_place() {
        let (tester, _) = configured().await;
        let state = tester
            .lifecycle_create(alert_policy::NAME, json!({"name": "web"}))
            .await
            .unwrap();

        let plan = tester
            .plan_update(alert_policy::NAME, state.clone(), json!({"name": "api"}))
            .await
            .unwrap();
        assert_plan_changes_attribute(&plan, "name");
        assert_plan_updates_in_place(&plan);

        let mut same = state.clone();
        same.as_object_mut().unwrap().remove("id");
        let plan = tester
            .plan_update(alert_policy::NAME, state, same)
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
    }

    #[tokio::test]
    async fn test_lifecycle_crud() {
        let (tester, _) = configured().await;
        let state = tester
            .lifecycle_crud(
                alert_policy::NAME,
                json!({"name": "web"}),
                json!({"name": "web", "incident_preference": "PER_CONDITION"}),
            )
            .await
            .unwrap();

        assert_eq!(state["incident_preference"], "PER_CONDITION");
        assert_eq!(state["account_id"], 1);
        assert!(tester.is_gone(alert_policy::NAME, state).await.unwrap());
    }

    #[test]
    #[should_panic(expected = "expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("boom")]);
    }

    #[test]
    fn test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("bad region").with_attribute("region"),
            Diagnostic::error("missing").with_detail("set api_key"),
        ]);

        let display = err.to_string();
        assert!(display.contains("2 error diagnostic(s)"));
        assert!(display.contains("bad region (at region)"));
        assert!(display.contains("missing: set api_key"));
    }
}
