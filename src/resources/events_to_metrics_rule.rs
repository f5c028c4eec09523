//! `newrelic_events_to_metrics_rule` resource.
//!
//! ID: `accountID:ruleID`, where the rule ID is an opaque string. Rules are
//! immutable except for `enabled`.

use tracing::info;

use super::{found, required_str, Context};
use crate::client::{EventsToMetricsCreateRuleInput, EventsToMetricsRule};
use crate::data::{Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::AccountScopedId;
use crate::schema::{Attribute, Schema};

pub const NAME: &str = "newrelic_events_to_metrics_rule";

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Create metrics from events with a NRQL query.")
        .with_attribute(
            "account_id",
            Attribute::optional_int64()
                .with_computed()
                .with_description("Account with the events and where the metrics are written."),
        )
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_description("Unique within the account."),
        )
        .with_attribute("nrql", Attribute::required_string().with_force_new())
        .with_attribute("description", Attribute::optional_string().with_force_new())
        .with_attribute("enabled", Attribute::optional_bool())
        .with_attribute("rule_id", Attribute::computed_string())
}

pub fn expand(
    d: &impl Attributes,
    account_id: i64,
) -> Result<EventsToMetricsCreateRuleInput, ProviderError> {
    Ok(EventsToMetricsCreateRuleInput {
        account_id,
        name: required_str(d, "name")?.to_string(),
        description: d.string("description"),
        nrql: required_str(d, "nrql")?.to_string(),
    })
}

/// `enabled` is written only when it is part of the configuration.
pub fn flatten(rule: &EventsToMetricsRule, id: &AccountScopedId, d: &mut ResourceData) {
    d.set("account_id", id.account_id);
    d.set("rule_id", id.rule_id.as_str());
    d.set("name", rule.name.as_str());
    d.set("nrql", rule.nrql.as_str());
    d.set_optional_str("description", &rule.description);
    d.set_if_configured("enabled", rule.enabled);
}

fn rule_id(d: &ResourceData) -> Result<AccountScopedId, ProviderError> {
    Ok(AccountScopedId::parse(d.require_id(NAME)?)?)
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let account_id = ctx.account_id(&d)?;
    let input = expand(&d, account_id)?;

    info!(name = %input.name, account_id, "creating events to metrics rule");
    let rule = ctx.api.create_rule(input).await?;
    let id = AccountScopedId::new(rule.account_id, rule.id.as_str())?;
    d.set_id(id.to_string());

    if let Some(enabled) = d.get_bool("enabled") {
        ctx.api
            .set_rule_enabled(id.account_id, &id.rule_id, enabled)
            .await?;
    }

    read(ctx, d).await
}

pub async fn read(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let id = rule_id(&d)?;

    let result = ctx.api.get_rule(id.account_id, &id.rule_id).await;
    if let Some(rule) = found(result, &mut d)? {
        flatten(&rule, &id, &mut d);
    }
    Ok(d)
}

/// Only `enabled` can change in place; leaving it unset keeps the server value.
pub async fn update(ctx: &Context<'_>, d: ResourceData) -> Result<ResourceData, ProviderError> {
    let id = rule_id(&d)?;

    if let Some(enabled) = d.get_bool("enabled") {
        info!(rule = %id, enabled, "updating events to metrics rule");
        ctx.api
            .set_rule_enabled(id.account_id, &id.rule_id, enabled)
            .await?;
    }

    read(ctx, d).await
}

pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let id = rule_id(d)?;

    info!(rule = %id, "deleting events to metrics rule");
    ctx.api.delete_rule(id.account_id, &id.rule_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{EventsToMetricsApi, MemoryClient};
    use crate::config::ProviderConfig;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    fn data(value: Value) -> ResourceData {
        ResourceData::from_value(value).unwrap()
    }

    fn rule_config() -> Value {
        json!({
            "name": "transactions",
            "nrql": "SELECT summary(duration) FROM Transaction FACET appName",
        })
    }

    #[test]
    fn test_flatten_enabled_only_when_configured() {
        let rule = EventsToMetricsRule {
            account_id: 1,
            id: "abc".to_string(),
            name: "transactions".to_string(),
            description: String::new(),
            nrql: "SELECT 1".to_string(),
            enabled: true,
        };
        let id = AccountScopedId::new(1, "abc").unwrap();

        let mut d = data(json!({"id": "1:abc"}));
        flatten(&rule, &id, &mut d);
        assert!(d.get("enabled").is_none());
        assert_eq!(d.get_str("rule_id"), Some("abc"));
        assert!(d.get("description").is_none());

        let mut d = data(json!({"id": "1:abc", "enabled": false}));
        flatten(&rule, &id, &mut d);
        assert_eq!(d.get_bool("enabled"), Some(true));
    }

    #[tokio::test]
    async fn test_create_applies_enabled() {
        let client = MemoryClient::new();
        let config =
            ProviderConfig::from_value_with_env(&json!({"api_key": "k", "account_id": 7}), |_| None)
                .unwrap();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        let mut value = rule_config();
        value["enabled"] = json!(false);
        let d = create(&ctx, data(value)).await.unwrap();

        let id = AccountScopedId::parse(d.id().unwrap()).unwrap();
        assert_eq!(id.account_id, 7);
        assert_eq!(d.get_i64("account_id"), Some(7));
        assert_eq!(d.get_bool("enabled"), Some(false));

        let stored = client.get_rule(7, &id.rule_id).await.unwrap();
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn test_missing_rule_clears_id() {
        let client = MemoryClient::new();
        let config =
            ProviderConfig::from_value_with_env(&json!({"api_key": "k", "account_id": 7}), |_| None)
                .unwrap();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        let d = create(&ctx, data(rule_config())).await.unwrap();
        let id = AccountScopedId::parse(d.id().unwrap()).unwrap();
        client.remove_rule(id.account_id, &id.rule_id).await;

        let d = read(&ctx, d).await.unwrap();
        assert!(d.id().is_none());
    }

    #[tokio::test]
    async fn test_account_id_required_somewhere() {
        let client = MemoryClient::new();
        let config = ProviderConfig::from_value_with_env(&json!({"api_key": "k"}), |_| None)
            .unwrap();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        assert!(matches!(
            create(&ctx, data(rule_config())).await,
            Err(ProviderError::Configuration(_))
        ));

        let mut value = rule_config();
        value["account_id"] = json!(3);
        let d = create(&ctx, data(value)).await.unwrap();
        assert!(d.id().unwrap().starts_with("3:"));
    }
}
