//! `newrelic_synthetics_multilocation_alert_condition` resource.
//!
//! ID: `policyID:conditionID`. The `critical` and `warning` blocks become
//! prioritized terms on the API object; `entities` holds monitor GUIDs in
//! configuration and monitor IDs on the wire.

use serde_json::{json, Map, Value};
use tracing::info;

use super::{found, required_i64, required_str, Context};
use crate::client::{MultiLocationSyntheticsCondition, MultiLocationTerm};
use crate::data::{block, Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::{condition_entity_guid, monitor_id_from_guid, parse_ids, serialize_ids};
use crate::schema::{Attribute, AttributeType, Block, NestedBlock, Schema};

pub const NAME: &str = "newrelic_synthetics_multilocation_alert_condition";

const CRITICAL: &str = "critical";
const WARNING: &str = "warning";

fn term_block() -> Block {
    Block::new().with_attribute(
        "threshold",
        Attribute::required_int64()
            .with_description("The minimum number of monitor locations that must be failing."),
    )
}

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Alert when a synthetics monitor fails in several locations.")
        .with_attribute("name", Attribute::required_string())
        .with_attribute(
            "policy_id",
            Attribute::required_int64().with_force_new(),
        )
        .with_attribute("runbook_url", Attribute::optional_string())
        .with_attribute(
            "enabled",
            Attribute::optional_bool().with_default(json!(true)),
        )
        .with_attribute(
            "entities",
            Attribute::required_list(AttributeType::String)
                .with_description("The GUIDs of the monitors to alert on."),
        )
        .with_attribute(
            "violation_time_limit_seconds",
            Attribute::required_int64().one_of_ints(&[0, 3600, 7200, 14400, 28800, 43200, 86400]),
        )
        .with_attribute(
            "entity_guid",
            Attribute::computed_string().with_description("The GUID of the condition entity."),
        )
        .with_block(
            CRITICAL,
            NestedBlock::single(term_block()).with_min_items(1),
        )
        .with_block(WARNING, NestedBlock::single(term_block()))
}

pub fn expand(d: &impl Attributes) -> Result<MultiLocationSyntheticsCondition, ProviderError> {
    let guids = d.strings("entities");
    if guids.is_empty() {
        return Err(ProviderError::Validation(
            "entities must contain at least one monitor GUID".to_string(),
        ));
    }
    let entities = guids
        .iter()
        .map(|guid| monitor_id_from_guid(guid))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MultiLocationSyntheticsCondition {
        id: 0,
        name: required_str(d, "name")?.to_string(),
        enabled: d.get_bool("enabled").unwrap_or(true),
        runbook_url: d.string("runbook_url"),
        entities,
        terms: expand_terms(d)?,
        violation_time_limit_seconds: required_i64(d, "violation_time_limit_seconds")?,
    })
}

/// Critical first, then warning.
fn expand_terms(d: &impl Attributes) -> Result<Vec<MultiLocationTerm>, ProviderError> {
    let mut terms = Vec::with_capacity(2);
    for priority in [CRITICAL, WARNING] {
        if let Some(term) = d.single_block(priority) {
            terms.push(MultiLocationTerm {
                priority: priority.to_string(),
                threshold: required_i64(term, "threshold")?,
            });
        }
    }
    if !terms.iter().any(|t| t.priority == CRITICAL) {
        return Err(ProviderError::Validation(
            "a critical term is required".to_string(),
        ));
    }
    Ok(terms)
}

/// `entities` is left as configured; the API only knows monitor IDs.
pub fn flatten(
    condition: &MultiLocationSyntheticsCondition,
    policy_id: i64,
    account_id: i64,
    d: &mut ResourceData,
) {
    d.set("policy_id", policy_id);
    d.set("name", condition.name.as_str());
    d.set_optional_str("runbook_url", &condition.runbook_url);
    d.set("enabled", condition.enabled);
    d.set(
        "violation_time_limit_seconds",
        condition.violation_time_limit_seconds,
    );
    d.set(
        "entity_guid",
        condition_entity_guid(condition.id, account_id),
    );

    d.remove(WARNING);
    for term in &condition.terms {
        match term.priority.to_lowercase().as_str() {
            CRITICAL => d.set_block(CRITICAL, threshold(term)),
            WARNING => d.set_block(WARNING, threshold(term)),
            _ => {}
        }
    }
}

fn threshold(term: &MultiLocationTerm) -> Map<String, Value> {
    block([("threshold", json!(term.threshold))])
}

fn condition_ids(d: &ResourceData) -> Result<(i64, i64), ProviderError> {
    let ids = parse_ids(d.require_id(NAME)?, 2)?;
    Ok((ids[0], ids[1]))
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let policy_id = required_i64(&d, "policy_id")?;
    let condition = expand(&d)?;

    info!(name = %condition.name, policy_id, "creating multi-location synthetics condition");
    let created = ctx
        .api
        .create_multi_location_condition(policy_id, condition)
        .await?;
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

    let condition = ctx
        .api
        .get_multi_location_condition(policy_id, condition_id)
        .await;
    if let Some(condition) = found(condition, &mut d)? {
        flatten(&condition, policy_id, account_id, &mut d);
    }
    Ok(d)
}

pub async fn update(ctx: &Context<'_>, d: ResourceData) -> Result<ResourceData, ProviderError> {
    let mut condition = expand(&d)?;
    let (_, condition_id) = condition_ids(&d)?;
    condition.id = condition_id;

    info!(condition_id, "updating multi-location synthetics condition");
    ctx.api.update_multi_location_condition(condition).await?;

    read(ctx, d).await
}

pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let (_, condition_id) = condition_ids(d)?;

    info!(condition_id, "deleting multi-location synthetics condition");
    ctx.api.delete_multi_location_condition(condition_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine;

    fn monitor_guid(monitor_id: &str) -> String {
        STANDARD_NO_PAD.encode(format!("1|SYNTH|MONITOR|{}", monitor_id))
    }

    fn config() -> Value {
        json!({
            "name": "checkout down",
            "policy_id": 3,
            "entities": [monitor_guid("abc-123"), monitor_guid("def-456")],
            "violation_time_limit_seconds": 3600,
            "critical": [{"threshold": 2}],
            "warning": [{"threshold": 1}],
        })
    }

    fn data(value: Value) -> ResourceData {
        ResourceData::from_value(value).unwrap()
    }

    #[test]
    fn test_schema() {
        assert!(validate(&schema(), &config()).is_empty());

        let mut value = config();
        value["violation_time_limit_seconds"] = json!(60);
        assert_eq!(validate(&schema(), &value).len(), 1);

        let mut value = config();
        value.as_object_mut().unwrap().remove("critical");
        assert_eq!(validate(&schema(), &value).len(), 1);
    }

    #[test]
    fn test_expand() {
        let condition = expand(&data(config())).unwrap();
        assert_eq!(condition.entities, vec!["abc-123", "def-456"]);
        assert!(condition.enabled);
        assert_eq!(
            condition.terms,
            vec![
                MultiLocationTerm {
                    priority: "critical".to_string(),
                    threshold: 2
                },
                MultiLocationTerm {
                    priority: "warning".to_string(),
                    threshold: 1
                },
            ]
        );
    }

    #[test]
    fn test_expand_rejects_bad_guid() {
        let mut value = config();
        value["entities"] = json!(["not a guid"]);
        assert!(matches!(
            expand(&data(value)),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_expand_requires_critical() {
        let mut value = config();
        value.as_object_mut().unwrap().remove("critical");
        assert!(expand(&data(value)).is_err());
    }

    #[test]
    fn test_flatten_by_priority() {
        let condition = MultiLocationSyntheticsCondition {
            id: 42,
            name: "checkout down".to_string(),
            enabled: true,
            runbook_url: String::new(),
            entities: vec!["abc-123".to_string()],
            terms: vec![
                MultiLocationTerm {
                    priority: "warning".to_string(),
                    threshold: 1,
                },
                MultiLocationTerm {
                    priority: "critical".to_string(),
                    threshold: 3,
                },
            ],
            violation_time_limit_seconds: 0,
        };

        let mut d = data(json!({"id": "3:42", "entities": [monitor_guid("abc-123")]}));
        flatten(&condition, 3, 99, &mut d);
        let state = d.into_state();

        assert_eq!(state["critical"], json!([{"threshold": 3}]));
        assert_eq!(state["warning"], json!([{"threshold": 1}]));
        assert_eq!(state["entity_guid"], condition_entity_guid(42, 99));
        assert_eq!(state["entities"], json!([monitor_guid("abc-123")]));
        assert!(state.get("runbook_url").is_none());
    }

    #[test]
    fn test_flatten_drops_removed_warning() {
        let condition = MultiLocationSyntheticsCondition {
            id: 42,
            name: "n".to_string(),
            terms: vec![MultiLocationTerm {
                priority: "critical".to_string(),
                threshold: 2,
            }],
            ..Default::default()
        };
        let mut d = data(json!({"id": "3:42", "warning": [{"threshold": 1}]}));
        flatten(&condition, 3, 99, &mut d);
        assert!(d.get("warning").is_none());
    }
}
