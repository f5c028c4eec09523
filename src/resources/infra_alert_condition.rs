//! `newrelic_infra_alert_condition` resource.
//!
//! ID: `policyID:conditionID`. Which optional fields are legal depends on the
//! condition `type`; see [`FORBIDDEN_FIELDS`].

use serde_json::{json, Map, Value};
use tracing::info;

use super::{found, required_i64, required_str, Context};
use crate::client::{InfrastructureCondition, Threshold};
use crate::data::{block, Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::{parse_ids, serialize_ids};
use crate::schema::{Attribute, Block, NestedBlock, Schema};

pub const NAME: &str = "newrelic_infra_alert_condition";

pub const PROCESS_RUNNING: &str = "infra_process_running";
pub const METRIC: &str = "infra_metric";
pub const HOST_NOT_REPORTING: &str = "infra_host_not_reporting";

/// A field that must be left unset for a condition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Event,
    IntegrationProvider,
    Select,
    ProcessWhere,
    Comparison,
    /// `critical.time_function`
    CriticalTimeFunction,
    /// `critical.value`, only when non-zero
    CriticalValue,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Event => "event",
            Field::IntegrationProvider => "integration_provider",
            Field::Select => "select",
            Field::ProcessWhere => "process_where",
            Field::Comparison => "comparison",
            Field::CriticalTimeFunction => "time_function",
            Field::CriticalValue => "value",
        }
    }

    fn is_set(self, c: &InfrastructureCondition) -> bool {
        let critical = c.critical.as_ref();
        match self {
            Field::Event => !c.event.is_empty(),
            Field::IntegrationProvider => !c.integration_provider.is_empty(),
            Field::Select => !c.select.is_empty(),
            Field::ProcessWhere => !c.process_where.is_empty(),
            Field::Comparison => !c.comparison.is_empty(),
            Field::CriticalTimeFunction => critical.is_some_and(|t| !t.function.is_empty()),
            Field::CriticalValue => critical
                .and_then(|t| t.value)
                .is_some_and(|v| v != 0.0),
        }
    }
}

/// Fields each condition type rejects, checked in order.
pub const FORBIDDEN_FIELDS: &[(&str, &[Field])] = &[
    (
        PROCESS_RUNNING,
        &[
            Field::Event,
            Field::IntegrationProvider,
            Field::Select,
            Field::CriticalTimeFunction,
        ],
    ),
    (METRIC, &[Field::ProcessWhere]),
    (
        HOST_NOT_REPORTING,
        &[
            Field::Event,
            Field::IntegrationProvider,
            Field::Select,
            Field::ProcessWhere,
            Field::Comparison,
            Field::CriticalTimeFunction,
            Field::CriticalValue,
        ],
    ),
];

/// Reject fields the condition type does not support.
pub fn validate_for_type(c: &InfrastructureCondition) -> Result<(), ProviderError> {
    let forbidden = FORBIDDEN_FIELDS
        .iter()
        .find(|(t, _)| *t == c.condition_type)
        .map(|(_, fields)| *fields)
        .unwrap_or_default();

    match forbidden.iter().find(|f| f.is_set(c)) {
        Some(field) => Err(ProviderError::Validation(format!(
            "{} is not supported by condition type {}",
            field.name(),
            c.condition_type
        ))),
        None => Ok(()),
    }
}

fn threshold_block() -> Block {
    Block::new()
        .with_attribute("duration", Attribute::required_int64())
        .with_attribute("value", Attribute::optional_float64())
        .with_attribute(
            "time_function",
            Attribute::optional_string().one_of_ignore_case(&["all", "any"]),
        )
}

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("An infrastructure alert condition.")
        .with_attribute(
            "policy_id",
            Attribute::required_int64()
                .with_force_new()
                .with_description("The ID of the alert policy where this condition should be used."),
        )
        .with_attribute("name", Attribute::required_string())
        .with_attribute("runbook_url", Attribute::optional_string())
        .with_attribute(
            "enabled",
            Attribute::optional_bool().with_default(json!(true)),
        )
        .with_attribute(
            "type",
            Attribute::required_string()
                .with_force_new()
                .one_of_ignore_case(&[PROCESS_RUNNING, METRIC, HOST_NOT_REPORTING]),
        )
        .with_attribute(
            "event",
            Attribute::optional_string()
                .with_computed()
                .with_description("The metric event, for example SystemSample."),
        )
        .with_attribute("where", Attribute::optional_string())
        .with_attribute("process_where", Attribute::optional_string())
        .with_attribute(
            "comparison",
            Attribute::optional_string().one_of_ignore_case(&["above", "below", "equal"]),
        )
        .with_attribute("select", Attribute::optional_string())
        .with_attribute("integration_provider", Attribute::optional_string())
        .with_attribute(
            "violation_close_timer",
            Attribute::optional_int64()
                .with_default(json!(24))
                .one_of_ints(&[1, 2, 4, 8, 12, 24, 48, 72]),
        )
        .with_attribute("description", Attribute::optional_string())
        .with_attribute("created_at", Attribute::computed_int64())
        .with_attribute("updated_at", Attribute::computed_int64())
        .with_block(
            "critical",
            NestedBlock::single(threshold_block()).with_max_items(1),
        )
        .with_block(
            "warning",
            NestedBlock::single(threshold_block())
                .with_max_items(1)
                .with_force_new(),
        )
}

pub fn expand(d: &impl Attributes) -> Result<InfrastructureCondition, ProviderError> {
    let condition = InfrastructureCondition {
        policy_id: d.get_i64("policy_id").unwrap_or_default(),
        condition_type: required_str(d, "type")?.to_lowercase(),
        name: required_str(d, "name")?.to_string(),
        enabled: d.get_bool("enabled").unwrap_or(true),
        runbook_url: d.string("runbook_url"),
        description: d.string("description"),
        event: d.string("event"),
        comparison: d.string("comparison").to_lowercase(),
        select: d.string("select"),
        where_clause: d.string("where"),
        process_where: d.string("process_where"),
        integration_provider: d.string("integration_provider"),
        // Zero is sent as-is when configured.
        violation_close_timer: d.get_i64("violation_close_timer"),
        critical: d.single_block("critical").map(expand_threshold).transpose()?,
        warning: d.single_block("warning").map(expand_threshold).transpose()?,
        ..Default::default()
    };

    validate_for_type(&condition)?;
    Ok(condition)
}

fn expand_threshold(t: &Map<String, Value>) -> Result<Threshold, ProviderError> {
    Ok(Threshold {
        duration: required_i64(t, "duration")?,
        value: t.get_f64("value"),
        function: t.string("time_function").to_lowercase(),
    })
}

pub fn flatten(condition: &InfrastructureCondition, policy_id: i64, d: &mut ResourceData) {
    d.set("policy_id", policy_id);
    d.set("name", condition.name.as_str());
    d.set("enabled", condition.enabled);
    d.set("type", condition.condition_type.to_lowercase());
    d.set_optional_str("runbook_url", &condition.runbook_url);
    d.set_optional_str("description", &condition.description);
    d.set_optional_str("comparison", &condition.comparison.to_lowercase());
    d.set_optional_str("event", &condition.event);
    d.set_optional_str("select", &condition.select);
    d.set_optional_str("where", &condition.where_clause);
    d.set_optional_str("process_where", &condition.process_where);
    d.set_optional_str("integration_provider", &condition.integration_provider);
    if let Some(timer) = condition.violation_close_timer {
        d.set("violation_close_timer", timer);
    }
    if let Some(created_at) = condition.created_at {
        d.set("created_at", created_at);
    }
    if let Some(updated_at) = condition.updated_at {
        d.set("updated_at", updated_at);
    }

    match &condition.critical {
        Some(critical) => d.set_block("critical", flatten_threshold(critical)),
        None => {
            d.remove("critical");
        }
    }
    if let Some(warning) = &condition.warning {
        d.set_block("warning", flatten_threshold(warning));
    }
}

fn flatten_threshold(t: &Threshold) -> Map<String, Value> {
    let mut threshold = block([("duration", json!(t.duration))]);
    if let Some(value) = t.value {
        threshold.insert("value".to_string(), json!(value));
    }
    if !t.function.is_empty() {
        threshold.insert("time_function".to_string(), json!(t.function.to_lowercase()));
    }
    threshold
}

fn condition_ids(d: &ResourceData) -> Result<(i64, i64), ProviderError> {
    let ids = parse_ids(d.require_id(NAME)?, 2)?;
    Ok((ids[0], ids[1]))
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let mut condition = expand(&d)?;
    let policy_id = required_i64(&d, "policy_id")?;
    condition.policy_id = policy_id;

    info!(name = %condition.name, policy_id, "creating infra alert condition");
    let created = ctx.api.create_infrastructure_condition(condition).await?;
    d.set_id(serialize_ids(&[policy_id, created.id]));

    read(ctx, d).await
}

pub async fn read(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let (policy_id, condition_id) = condition_ids(&d)?;
    let account_id = ctx.account_id(&d)?;

    let policy = ctx.api.query_policy(account_id, policy_id).await;
    if found(policy, &mut d)?.is_none() {
        return Ok(d);
    }

    let condition = ctx.api.get_infrastructure_condition(condition_id).await;
    if let Some(condition) = found(condition, &mut d)? {
        flatten(&condition, policy_id, &mut d);
    }
    Ok(d)
}

pub async fn update(ctx: &Context<'_>, d: ResourceData) -> Result<ResourceData, ProviderError> {
    let mut condition = expand(&d)?;
    let (policy_id, condition_id) = condition_ids(&d)?;
    condition.id = condition_id;
    condition.policy_id = policy_id;

    info!(condition_id, policy_id, "updating infra alert condition");
    ctx.api.update_infrastructure_condition(condition).await?;

    read(ctx, d).await
}

pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let (_, condition_id) = condition_ids(d)?;

    info!(condition_id, "deleting infra alert condition");
    ctx.api.delete_infrastructure_condition(condition_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AlertsApi, AlertsPolicyInput, MemoryClient};
    use crate::config::ProviderConfig;
    use crate::validation::validate;
    use tokio_util::sync::CancellationToken;

    fn data(value: Value) -> ResourceData {
        ResourceData::from_value(value).unwrap()
    }

    fn metric_config() -> Value {
        json!({
            "policy_id": 1,
            "name": "High CPU",
            "type": "INFRA_METRIC",
            "event": "SystemSample",
            "select": "cpuPercent",
            "comparison": "Above",
            "where": "(hostname LIKE '%frontend%')",
            "violation_close_timer": 24,
            "critical": [{"duration": 25, "value": 90.0, "time_function": "ALL"}],
        })
    }

    fn validation_message(value: Value) -> String {
        match expand(&data(value)) {
            Err(ProviderError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_accepts_mixed_case() {
        assert!(validate(&schema(), &metric_config()).is_empty());
    }

    #[test]
    fn test_expand_lowercases() {
        let condition = expand(&data(metric_config())).unwrap();
        assert_eq!(condition.condition_type, "infra_metric");
        assert_eq!(condition.comparison, "above");
        assert_eq!(condition.where_clause, "(hostname LIKE '%frontend%')");
        let critical = condition.critical.unwrap();
        assert_eq!(critical.function, "all");
        assert_eq!(critical.value, Some(90.0));
        assert!(condition.warning.is_none());
    }

    #[test]
    fn test_close_timer_zero_is_sent() {
        let mut value = metric_config();
        value["violation_close_timer"] = json!(0);
        assert_eq!(expand(&data(value)).unwrap().violation_close_timer, Some(0));

        let mut value = metric_config();
        value.as_object_mut().unwrap().remove("violation_close_timer");
        assert_eq!(expand(&data(value)).unwrap().violation_close_timer, None);
    }

    #[test]
    fn test_process_running_rejects_event() {
        let value = json!({
            "policy_id": 1,
            "name": "java running",
            "type": "infra_process_running",
            "event": "SystemSample",
            "critical": [{"duration": 5, "value": 0}],
        });
        assert_eq!(
            validation_message(value),
            "event is not supported by condition type infra_process_running"
        );
    }

    #[test]
    fn test_process_running_rejects_time_function() {
        let value = json!({
            "policy_id": 1,
            "name": "java running",
            "type": "infra_process_running",
            "comparison": "equal",
            "process_where": "commandName = 'java'",
            "critical": [{"duration": 5, "value": 0, "time_function": "any"}],
        });
        assert_eq!(
            validation_message(value),
            "time_function is not supported by condition type infra_process_running"
        );
    }

    #[test]
    fn test_metric_rejects_process_where() {
        let mut value = metric_config();
        value["process_where"] = json!("commandName = 'java'");
        assert_eq!(
            validation_message(value),
            "process_where is not supported by condition type infra_metric"
        );
    }

    #[test]
    fn test_host_not_reporting_value() {
        let mut value = json!({
            "policy_id": 1,
            "name": "host gone",
            "type": "infra_host_not_reporting",
            "critical": [{"duration": 5, "value": 0}],
        });
        assert!(expand(&data(value.clone())).is_ok());

        value["critical"] = json!([{"duration": 5, "value": 3}]);
        assert_eq!(
            validation_message(value.clone()),
            "value is not supported by condition type infra_host_not_reporting"
        );

        value["critical"] = json!([{"duration": 5}]);
        value["comparison"] = json!("above");
        assert_eq!(
            validation_message(value),
            "comparison is not supported by condition type infra_host_not_reporting"
        );
    }

    #[test]
    fn test_flatten_omits_empty_strings() {
        let condition = InfrastructureCondition {
            id: 7,
            policy_id: 1,
            condition_type: "infra_metric".to_string(),
            name: "cpu".to_string(),
            enabled: true,
            event: "SystemSample".to_string(),
            select: "cpuPercent".to_string(),
            comparison: "ABOVE".to_string(),
            violation_close_timer: Some(24),
            critical: Some(Threshold {
                duration: 5,
                value: Some(90.0),
                function: "ALL".to_string(),
            }),
            created_at: Some(1_600_000_000),
            updated_at: Some(1_600_000_100),
            ..Default::default()
        };

        let mut d = data(json!({"id": "1:7"}));
        flatten(&condition, 1, &mut d);
        let state = d.into_state();

        assert_eq!(state["comparison"], "above");
        assert!(state.get("where").is_none());
        assert!(state.get("process_where").is_none());
        assert!(state.get("integration_provider").is_none());
        assert!(state.get("warning").is_none());
        assert_eq!(
            state["critical"],
            json!([{"duration": 5, "value": 90.0, "time_function": "all"}])
        );
        assert_eq!(state["created_at"], 1_600_000_000);
    }

    #[tokio::test]
    async fn test_create_reads_back_server_fields() {
        let client = MemoryClient::new();
        let config = ProviderConfig::from_value_with_env(
            &json!({"api_key": "k", "account_id": 1}),
            |_| None,
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        let policy = client
            .create_policy(
                1,
                AlertsPolicyInput {
                    name: "infra".to_string(),
                    incident_preference: None,
                },
            )
            .await
            .unwrap();

        let mut value = metric_config();
        value["policy_id"] = json!(policy.id);
        value.as_object_mut().unwrap().remove("violation_close_timer");

        let d = create(&ctx, data(value)).await.unwrap();
        assert!(d.id().unwrap().starts_with(&format!("{}:", policy.id)));
        assert_eq!(d.get_i64("violation_close_timer"), Some(24));
        assert!(d.get_i64("created_at").is_some());
        assert_eq!(d.get_str("type"), Some("infra_metric"));

        client.remove_policy(policy.id).await;
        let d = read(&ctx, d).await.unwrap();
        assert!(d.id().is_none());
    }
}
