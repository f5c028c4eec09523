//! `newrelic_alert_policy` resource and data source.

use serde_json::json;
use tracing::info;

use super::{found, required_str, Context};
use crate::client::{AlertsPolicy, AlertsPolicyInput, IncidentPreference};
use crate::data::{Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::{parse_hashed_ids, split_import_id};
use crate::schema::{Attribute, AttributeType, Schema};

pub const NAME: &str = "newrelic_alert_policy";

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("An alert policy groups conditions and notification channels.")
        .with_attribute(
            "name",
            Attribute::required_string().with_description("The name of the policy."),
        )
        .with_attribute(
            "account_id",
            Attribute::optional_int64()
                .with_computed()
                .with_description("The account the policy belongs to."),
        )
        .with_attribute(
            "incident_preference",
            Attribute::optional_string()
                .with_default(json!(IncidentPreference::PerPolicy.as_str()))
                .one_of(&IncidentPreference::ALL)
                .with_description("The rollup strategy for the policy."),
        )
        .with_attribute(
            "channel_ids",
            Attribute::optional_list(AttributeType::Int64)
                .with_force_new()
                .with_description("Notification channels attached to the policy on create."),
        )
}

pub fn data_source_schema() -> Schema {
    Schema::v0()
        .with_description("Look up an alert policy by name.")
        .with_attribute("name", Attribute::required_string())
        .with_attribute("account_id", Attribute::optional_int64().with_computed())
        .with_attribute(
            "incident_preference",
            Attribute::optional_string().with_computed(),
        )
}

pub fn expand(d: &impl Attributes) -> Result<AlertsPolicyInput, ProviderError> {
    let name = required_str(d, "name")?.to_string();
    let incident_preference = d
        .get_str("incident_preference")
        .map(str::parse::<IncidentPreference>)
        .transpose()
        .map_err(ProviderError::Validation)?;

    Ok(AlertsPolicyInput {
        name,
        incident_preference,
    })
}

pub fn flatten(policy: &AlertsPolicy, account_id: i64, d: &mut ResourceData) {
    d.set("name", policy.name.as_str());
    d.set("incident_preference", policy.incident_preference.as_str());
    d.set("account_id", account_id);
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let account_id = ctx.account_id(&d)?;
    let input = expand(&d)?;

    info!(name = %input.name, account_id, "creating alert policy");
    let policy = ctx.api.create_policy(account_id, input).await?;
    d.set_id(policy.id.to_string());
    flatten(&policy, account_id, &mut d);

    let channel_ids = d.ints("channel_ids");
    if !channel_ids.is_empty() {
        let existing = ctx.api.list_channels().await?;
        let matched: Vec<i64> = channel_ids
            .into_iter()
            .filter(|id| existing.iter().any(|c| c.id == *id))
            .collect();
        info!(policy_id = policy.id, channels = ?matched, "attaching channels to alert policy");
        ctx.api.update_policy_channels(policy.id, &matched).await?;
    }

    Ok(d)
}

/// Resolve `(policy_id, account_id)` from a `policyID` or `policyID:accountID` ID.
fn policy_ids(ctx: &Context<'_>, d: &ResourceData) -> Result<(i64, i64), ProviderError> {
    let id = d.require_id(NAME)?;
    match parse_hashed_ids(id)?.as_slice() {
        [policy_id] => Ok((*policy_id, ctx.account_id(d)?)),
        [policy_id, account_id] => Ok((*policy_id, *account_id)),
        _ => Err(ProviderError::Validation(format!(
            "unhandled id format {}",
            id
        ))),
    }
}

pub async fn read(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let (policy_id, account_id) = policy_ids(ctx, &d)?;

    let result = ctx.api.query_policy(account_id, policy_id).await;
    if let Some(policy) = found(result, &mut d)? {
        flatten(&policy, account_id, &mut d);
    }
    Ok(d)
}

pub async fn update(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let (policy_id, _) = policy_ids(ctx, &d)?;
    let account_id = ctx.account_id(&d)?;
    let input = expand(&d)?;

    info!(policy_id, account_id, "updating alert policy");
    let policy = ctx.api.update_policy(account_id, policy_id, input).await?;
    flatten(&policy, account_id, &mut d);
    Ok(d)
}

pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let (policy_id, _) = policy_ids(ctx, d)?;
    let account_id = ctx.account_id(d)?;

    info!(policy_id, account_id, "deleting alert policy");
    ctx.api.delete_policy(account_id, policy_id).await?;
    Ok(())
}

/// `policyID` or `policyID:accountID`.
pub fn import_state(raw_id: &str) -> Result<ResourceData, ProviderError> {
    let import = split_import_id(raw_id, 1)?;
    let mut d = ResourceData::new();
    d.set_id(import.id);
    if let Some(account) = import.metadata {
        let account_id: i64 = account.parse().map_err(|_| {
            ProviderError::Validation(format!("invalid account ID {:?} in import ID", account))
        })?;
        d.set("account_id", account_id);
    }
    Ok(d)
}

pub async fn read_data_source(
    ctx: &Context<'_>,
    mut d: ResourceData,
) -> Result<ResourceData, ProviderError> {
    let name = required_str(&d, "name")?.to_string();
    let account_id = ctx.account_id(&d)?;

    let wanted = name.to_lowercase();
    let policies = ctx.api.search_policies(account_id).await?;
    let policy = policies
        .iter()
        .find(|p| p.name.to_lowercase() == wanted)
        .ok_or_else(|| {
            ProviderError::NotFound(format!(
                "the name '{}' does not match any New Relic alert policy",
                name
            ))
        })?;

    d.set_id(policy.id.to_string());
    flatten(policy, account_id, &mut d);
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::config::ProviderConfig;
    use crate::validation::validate;
    use tokio_util::sync::CancellationToken;

    fn config() -> ProviderConfig {
        ProviderConfig::from_value_with_env(&json!({"api_key": "k", "account_id": 1}), |_| None)
            .unwrap()
    }

    fn data(value: serde_json::Value) -> ResourceData {
        ResourceData::from_value(value).unwrap()
    }

    #[test]
    fn test_expand() {
        let input = expand(&data(json!({"name": "web", "incident_preference": "PER_CONDITION"})))
            .unwrap();
        assert_eq!(input.name, "web");
        assert_eq!(
            input.incident_preference,
            Some(IncidentPreference::PerCondition)
        );

        let input = expand(&data(json!({"name": "web"}))).unwrap();
        assert!(input.incident_preference.is_none());

        assert!(expand(&data(json!({"name": ""}))).is_err());
        assert!(expand(&data(json!({"name": "web", "incident_preference": "sometimes"}))).is_err());
    }

    #[test]
    fn test_schema_rejects_unknown_preference() {
        let diagnostics = validate(&schema(), &json!({"name": "web", "incident_preference": "X"}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_import_state() {
        let d = import_state("42").unwrap();
        assert_eq!(d.id(), Some("42"));
        assert!(d.get("account_id").is_none());

        let d = import_state("42:7").unwrap();
        assert_eq!(d.id(), Some("42"));
        assert_eq!(d.get_i64("account_id"), Some(7));

        assert!(import_state("42:x").is_err());
        assert!(import_state("1:2:3").is_err());
    }

    #[tokio::test]
    async fn test_read_accepts_account_suffix() {
        let client = MemoryClient::new();
        let config = config();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        let created = create(&ctx, data(json!({"name": "web", "account_id": 5})))
            .await
            .unwrap();
        let policy_id = created.id().unwrap().to_string();

        let mut d = ResourceData::new();
        d.set_id(format!("{}:5", policy_id));
        let d = read(&ctx, d).await.unwrap();
        assert_eq!(d.get_str("name"), Some("web"));
        assert_eq!(d.get_i64("account_id"), Some(5));
    }

    #[tokio::test]
    async fn test_data_source_matches_case_insensitively() {
        let client = MemoryClient::new();
        let config = config();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        create(&ctx, data(json!({"name": "Web Alerts"}))).await.unwrap();

        let d = read_data_source(&ctx, data(json!({"name": "web alerts"})))
            .await
            .unwrap();
        assert!(d.id().is_some());
        assert_eq!(d.get_str("incident_preference"), Some("PER_POLICY"));

        let err = read_data_source(&ctx, data(json!({"name": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(
            err.message(),
            "the name 'nope' does not match any New Relic alert policy"
        );
    }
}
