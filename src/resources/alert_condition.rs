//! `newrelic_alert_condition` resource: APM, browser, mobile and server
//! metric conditions.
//!
//! ID: `policyID:conditionID`.

use serde_json::{json, Map, Value};
use tracing::info;

use super::{found, required_i64, required_str, Context};
use crate::client::{Condition, Term, UserDefined};
use crate::data::{block, Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::{parse_ids, serialize_ids};
use crate::schema::{Attribute, AttributeType, Block, NestedBlock, Schema};

pub const NAME: &str = "newrelic_alert_condition";

/// Metrics accepted by each condition type.
pub const CONDITION_TYPES: &[(&str, &[&str])] = &[
    (
        "apm_app_metric",
        &[
            "apdex",
            "error_percentage",
            "response_time_background",
            "response_time_web",
            "throughput_background",
            "throughput_web",
            "user_defined",
        ],
    ),
    (
        "apm_jvm_metric",
        &[
            "cpu_utilization_time",
            "deadlocked_threads",
            "gc_cpu_time",
            "heap_memory_usage",
        ],
    ),
    (
        "apm_kt_metric",
        &[
            "apdex",
            "error_count",
            "error_percentage",
            "response_time",
            "throughput",
        ],
    ),
    (
        "browser_metric",
        &[
            "ajax_response_time",
            "ajax_throughput",
            "dom_processing",
            "end_user_apdex",
            "network",
            "page_rendering",
            "page_view_throughput",
            "page_views_with_js_errors",
            "request_queuing",
            "total_page_load",
            "user_defined",
            "web_application",
        ],
    ),
    (
        "mobile_metric",
        &[
            "database",
            "images",
            "json",
            "mobile_crash_rate",
            "network_error_percentage",
            "network",
            "status_error_percentage",
            "user_defined",
            "view_loading",
        ],
    ),
    (
        "servers_metric",
        &[
            "cpu_percentage",
            "disk_io_percentage",
            "fullest_disk_percentage",
            "load_average_one_minute",
            "memory_percentage",
            "user_defined",
        ],
    ),
];

const DEFAULT_OPERATOR: &str = "equal";
const DEFAULT_PRIORITY: &str = "critical";

fn condition_type_names() -> Vec<&'static str> {
    CONDITION_TYPES.iter().map(|(name, _)| *name).collect()
}

/// Check that `metric` is legal for `condition_type`.
pub fn validate_metric(condition_type: &str, metric: &str) -> Result<(), ProviderError> {
    let metrics = CONDITION_TYPES
        .iter()
        .find(|(name, _)| *name == condition_type)
        .map(|(_, metrics)| *metrics)
        .ok_or_else(|| {
            ProviderError::Validation(format!(
                "{} is not a valid condition type, expected one of: {}",
                condition_type,
                condition_type_names().join(", ")
            ))
        })?;

    if metrics.contains(&metric) {
        Ok(())
    } else {
        Err(ProviderError::Validation(format!(
            "metric {} is not supported by condition type {}, expected one of: {}",
            metric,
            condition_type,
            metrics.join(", ")
        )))
    }
}

fn term_block() -> Block {
    Block::new()
        .with_attribute(
            "duration",
            Attribute::required_int64()
                .int_between(5, 120)
                .with_description("In minutes, from 5 to 120 inclusive."),
        )
        .with_attribute(
            "operator",
            Attribute::optional_string()
                .with_default(json!(DEFAULT_OPERATOR))
                .one_of(&["above", "below", "equal"]),
        )
        .with_attribute(
            "priority",
            Attribute::optional_string()
                .with_default(json!(DEFAULT_PRIORITY))
                .one_of(&["critical", "warning"]),
        )
        .with_attribute(
            "threshold",
            Attribute::required_float64().float_at_least(0.0),
        )
        .with_attribute(
            "time_function",
            Attribute::required_string().one_of(&["all", "any"]),
        )
}

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("A metric alert condition for APM, browser, mobile or server entities.")
        .with_attribute(
            "policy_id",
            Attribute::required_int64()
                .with_force_new()
                .with_description("The ID of the policy the condition belongs to."),
        )
        .with_attribute(
            "name",
            Attribute::required_string().length_between(1, 128),
        )
        .with_attribute(
            "enabled",
            Attribute::optional_bool().with_default(json!(true)),
        )
        .with_attribute(
            "type",
            Attribute::required_string().one_of(&condition_type_names()),
        )
        .with_attribute(
            "entities",
            Attribute::required_set(AttributeType::Int64)
                .with_description("The instance IDs associated with the condition."),
        )
        .with_attribute(
            "metric",
            Attribute::required_string()
                .with_description("A metric accepted by the condition type."),
        )
        .with_attribute("runbook_url", Attribute::optional_string())
        .with_attribute(
            "condition_scope",
            Attribute::optional_string().one_of(&["application", "instance"]),
        )
        .with_attribute(
            "violation_close_timer",
            Attribute::optional_int64()
                .one_of_ints(&[1, 2, 4, 8, 12, 24])
                .with_description("Hours after which instance-based violations close."),
        )
        .with_attribute(
            "gc_metric",
            Attribute::optional_string()
                .with_description("Garbage collection metric, required for gc_cpu_time."),
        )
        .with_attribute("user_defined_metric", Attribute::optional_string())
        .with_attribute(
            "user_defined_value_function",
            Attribute::optional_string().one_of(&["average", "min", "max", "total", "sample_size"]),
        )
        .with_block("term", NestedBlock::set(term_block()).with_min_items(1))
}

pub fn expand(d: &impl Attributes) -> Result<Condition, ProviderError> {
    let condition_type = required_str(d, "type")?.to_string();
    let metric = required_str(d, "metric")?.to_string();
    validate_metric(&condition_type, &metric)?;

    let gc_metric = d.string("gc_metric");
    if condition_type == "apm_jvm_metric" && metric == "gc_cpu_time" && gc_metric.is_empty() {
        return Err(ProviderError::Validation(
            "gc_metric is required for apm_jvm_metric conditions on gc_cpu_time".to_string(),
        ));
    }

    let entities: Vec<String> = d.ints("entities").iter().map(i64::to_string).collect();
    if entities.is_empty() {
        return Err(ProviderError::Validation(
            "entities must contain at least one entity ID".to_string(),
        ));
    }

    let terms = d
        .blocks("term")
        .into_iter()
        .map(expand_term)
        .collect::<Result<Vec<_>, _>>()?;
    if terms.is_empty() {
        return Err(ProviderError::Validation(
            "at least one term is required".to_string(),
        ));
    }

    // Only sent when both halves are configured.
    let user_defined = match (
        d.get_str("user_defined_metric"),
        d.get_str("user_defined_value_function"),
    ) {
        (Some(metric), Some(value_function)) => UserDefined {
            metric: metric.to_string(),
            value_function: value_function.to_string(),
        },
        _ => UserDefined::default(),
    };

    Ok(Condition {
        id: 0,
        policy_id: d.get_i64("policy_id").unwrap_or_default(),
        condition_type,
        name: required_str(d, "name")?.to_string(),
        enabled: d.get_bool("enabled").unwrap_or(true),
        entities,
        metric,
        runbook_url: d.string("runbook_url"),
        condition_scope: d.string("condition_scope"),
        violation_close_timer: d.get_i64("violation_close_timer").unwrap_or_default(),
        gc_metric,
        terms,
        user_defined,
    })
}

fn expand_term(term: &Map<String, Value>) -> Result<Term, ProviderError> {
    Ok(Term {
        duration: required_i64(term, "duration")?,
        operator: term
            .get_str("operator")
            .unwrap_or(DEFAULT_OPERATOR)
            .to_string(),
        priority: term
            .get_str("priority")
            .unwrap_or(DEFAULT_PRIORITY)
            .to_string(),
        threshold: term.get_f64("threshold").ok_or_else(|| {
            ProviderError::Validation("term threshold is required".to_string())
        })?,
        time_function: required_str(term, "time_function")?.to_string(),
    })
}

/// Write a condition into the snapshot.
///
/// Optional strings the API returns empty are removed rather than written
/// as `""`, and a zero `violation_close_timer` means unset.
pub fn flatten(
    condition: &Condition,
    policy_id: i64,
    d: &mut ResourceData,
) -> Result<(), ProviderError> {
    d.set("policy_id", policy_id);
    d.set("name", condition.name.as_str());
    d.set("enabled", condition.enabled);
    d.set("type", condition.condition_type.as_str());
    d.set("metric", condition.metric.as_str());
    d.set_optional_str("runbook_url", &condition.runbook_url);
    d.set_optional_str("condition_scope", &condition.condition_scope);
    d.set_optional_i64("violation_close_timer", condition.violation_close_timer);
    d.set_optional_str("gc_metric", &condition.gc_metric);
    d.set_optional_str("user_defined_metric", &condition.user_defined.metric);
    d.set_optional_str(
        "user_defined_value_function",
        &condition.user_defined.value_function,
    );

    let entities = condition
        .entities
        .iter()
        .map(|e| {
            e.parse::<i64>().map_err(|_| {
                ProviderError::Sdk(format!(
                    "condition {} has a non-numeric entity ID {:?}",
                    condition.id, e
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    d.set("entities", entities);
    d.set("term", flatten_terms(&condition.terms));
    Ok(())
}

fn flatten_terms(terms: &[Term]) -> Value {
    Value::Array(
        terms
            .iter()
            .map(|t| {
                Value::Object(block([
                    ("duration", json!(t.duration)),
                    ("operator", json!(t.operator)),
                    ("priority", json!(t.priority)),
                    ("threshold", json!(t.threshold)),
                    ("time_function", json!(t.time_function)),
                ]))
            })
            .collect(),
    )
}

fn condition_ids(d: &ResourceData) -> Result<(i64, i64), ProviderError> {
    let ids = parse_ids(d.require_id(NAME)?, 2)?;
    Ok((ids[0], ids[1]))
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let condition = expand(&d)?;
    let policy_id = required_i64(&d, "policy_id")?;

    info!(name = %condition.name, policy_id, "creating alert condition");
    let created = ctx.api.create_condition(policy_id, condition).await?;
    d.set_id(serialize_ids(&[policy_id, created.id]));
    flatten(&created, policy_id, &mut d)?;
    Ok(d)
}

pub async fn read(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let (policy_id, condition_id) = condition_ids(&d)?;
    let account_id = ctx.account_id(&d)?;

    let policy = ctx.api.query_policy(account_id, policy_id).await;
    if found(policy, &mut d)?.is_none() {
        return Ok(d);
    }

    let condition = ctx.api.get_condition(policy_id, condition_id).await;
    if let Some(condition) = found(condition, &mut d)? {
        flatten(&condition, policy_id, &mut d)?;
    }
    Ok(d)
}

pub async fn update(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let mut condition = expand(&d)?;
    let (policy_id, condition_id) = condition_ids(&d)?;
    condition.id = condition_id;
    condition.policy_id = policy_id;

    info!(condition_id, policy_id, "updating alert condition");
    let updated = ctx.api.update_condition(condition).await?;
    flatten(&updated, policy_id, &mut d)?;
    Ok(d)
}

pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let (_, condition_id) = condition_ids(d)?;

    info!(condition_id, "deleting alert condition");
    ctx.api.delete_condition(condition_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;

    fn config() -> Value {
        json!({
            "policy_id": 10,
            "name": "Apdex",
            "type": "apm_app_metric",
            "entities": [1234, 5678],
            "metric": "apdex",
            "condition_scope": "application",
            "term": [
                {"duration": 5, "operator": "below", "priority": "critical", "threshold": 0.75, "time_function": "all"},
                {"duration": 10, "threshold": 0.9, "time_function": "any"},
            ],
        })
    }

    fn data(value: Value) -> ResourceData {
        ResourceData::from_value(value).unwrap()
    }

    #[test]
    fn test_schema_accepts_valid_config() {
        assert!(validate(&schema(), &config()).is_empty());
    }

    #[test]
    fn test_expand() {
        let condition = expand(&data(config())).unwrap();
        assert_eq!(condition.policy_id, 10);
        assert!(condition.enabled);
        assert_eq!(condition.entities, vec!["1234", "5678"]);
        assert_eq!(condition.terms.len(), 2);
        assert_eq!(condition.terms[1].operator, "equal");
        assert_eq!(condition.terms[1].priority, "critical");
        assert!(condition.user_defined.is_empty());
    }

    #[test]
    fn test_metric_must_match_type() {
        let mut value = config();
        value["metric"] = json!("heap_memory_usage");
        match expand(&data(value)) {
            Err(ProviderError::Validation(msg)) => {
                assert!(msg.contains("heap_memory_usage"));
                assert!(msg.contains("apm_app_metric"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        assert!(validate_metric("apm_jvm_metric", "heap_memory_usage").is_ok());
        assert!(validate_metric("browser_metric", "end_user_apdex").is_ok());
        assert!(validate_metric("nrql", "apdex").is_err());
    }

    #[test]
    fn test_gc_metric_required_for_gc_cpu_time() {
        let mut value = config();
        value["type"] = json!("apm_jvm_metric");
        value["metric"] = json!("gc_cpu_time");
        assert!(expand(&data(value.clone())).is_err());

        value["gc_metric"] = json!("GC/G1 Young Generation");
        assert!(expand(&data(value)).is_ok());
    }

    #[test]
    fn test_user_defined_needs_both_fields() {
        let mut value = config();
        value["metric"] = json!("user_defined");
        value["user_defined_metric"] = json!("Custom/Queue/Depth");
        let condition = expand(&data(value.clone())).unwrap();
        assert!(condition.user_defined.is_empty());

        value["user_defined_value_function"] = json!("average");
        let condition = expand(&data(value)).unwrap();
        assert_eq!(condition.user_defined.metric, "Custom/Queue/Depth");
        assert_eq!(condition.user_defined.value_function, "average");
    }

    #[test]
    fn test_empty_entities_rejected() {
        let mut value = config();
        value["entities"] = json!([]);
        assert!(expand(&data(value)).is_err());
    }

    #[test]
    fn test_flatten_suppresses_empty_optionals() {
        let mut condition = expand(&data(config())).unwrap();
        condition.id = 77;
        condition.condition_scope = String::new();

        let mut d = data(json!({"id": "10:77", "condition_scope": "application"}));
        flatten(&condition, 10, &mut d).unwrap();
        let state = d.into_state();

        assert_eq!(state["entities"], json!([1234, 5678]));
        assert!(state.get("condition_scope").is_none());
        assert!(state.get("runbook_url").is_none());
        assert!(state.get("violation_close_timer").is_none());
        assert_eq!(state["term"][0]["threshold"], json!(0.75));
    }

    #[test]
    fn test_flatten_rejects_non_numeric_entity() {
        let mut condition = expand(&data(config())).unwrap();
        condition.entities = vec!["abc".to_string()];
        let mut d = ResourceData::new();
        assert!(flatten(&condition, 10, &mut d).is_err());
    }
}
