//! `newrelic_nrql_alert_condition` resource.
//!
//! ID: `policyID:conditionID`. The condition `type` (static, baseline or
//! outlier) selects the NerdGraph mutation and decides which optional
//! attributes are legal; see [`TYPE_ONLY_FIELDS`].
//!
//! Terms are configured as `critical` and `warning` blocks. A term takes its
//! duration either in seconds (`threshold_duration`) or in minutes
//! (`duration`), and its occurrence rule either as `threshold_occurrences` or
//! as the older `time_function`. State keeps whichever spelling was
//! configured.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::info;

use super::{found, required_i64, required_str, Context};
use crate::client::{
    ApiError, NrqlAlertCondition, NrqlConditionBase, NrqlConditionExpiration, NrqlConditionQuery,
    NrqlConditionSignal, NrqlConditionTerm, NrqlConditionType, NrqlOutlierConfiguration,
    NrqlTermPrediction,
};
use crate::data::{block, Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::{parse_ids, serialize_ids, split_import_id};
use crate::retry::{operation_timeout, poll_until, RetryError, DEFAULT_POLL_INTERVAL};
use crate::schema::{Attribute, Block, NestedBlock, Schema};

pub const NAME: &str = "newrelic_nrql_alert_condition";

pub const DEFAULT_VIOLATION_TIME_LIMIT_SECONDS: i64 = 259_200;
pub const MAX_VIOLATION_TIME_LIMIT_SECONDS: i64 = 2_592_000;

/// How long create waits for the new condition to become readable.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_AGGREGATION_METHOD: &str = "event_flow";
const DEFAULT_SIGNAL_SEASONALITY: &str = "NEW_RELIC_CALCULATION";
const DEFAULT_PREDICT_BY: i64 = 3600;

const OPERATORS: [&str; 6] = [
    "above",
    "above_or_equals",
    "below",
    "below_or_equals",
    "equals",
    "not_equals",
];

/// An attribute only one condition type accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    BaselineDirection,
    SignalSeasonality,
    OutlierConfiguration,
    /// `prediction` inside `critical` or `warning`.
    Prediction,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::BaselineDirection => "baseline_direction",
            Field::SignalSeasonality => "signal_seasonality",
            Field::OutlierConfiguration => "outlier_configuration",
            Field::Prediction => "prediction",
        }
    }

    fn is_set(self, d: &impl Attributes) -> bool {
        match self {
            Field::BaselineDirection => d.get_str("baseline_direction").is_some(),
            Field::SignalSeasonality => d.get_str("signal_seasonality").is_some(),
            Field::OutlierConfiguration => d.single_block("outlier_configuration").is_some(),
            Field::Prediction => ["critical", "warning"].iter().any(|priority| {
                d.single_block(priority)
                    .and_then(|term| term.single_block("prediction"))
                    .is_some()
            }),
        }
    }
}

/// Attributes legal for a single condition type, checked in order.
pub const TYPE_ONLY_FIELDS: &[(Field, NrqlConditionType)] = &[
    (Field::BaselineDirection, NrqlConditionType::Baseline),
    (Field::SignalSeasonality, NrqlConditionType::Baseline),
    (Field::OutlierConfiguration, NrqlConditionType::Outlier),
    (Field::Prediction, NrqlConditionType::Static),
];

/// Reject attributes the condition type does not support, and require the
/// ones it cannot do without.
pub fn validate_for_type(
    condition_type: NrqlConditionType,
    d: &impl Attributes,
) -> Result<(), ProviderError> {
    if let Some((field, _)) = TYPE_ONLY_FIELDS
        .iter()
        .find(|(field, only)| *only != condition_type && field.is_set(d))
    {
        return Err(ProviderError::Validation(format!(
            "{} is not supported by condition type {}",
            field.name(),
            condition_type
        )));
    }

    if condition_type == NrqlConditionType::Baseline && !Field::BaselineDirection.is_set(d) {
        return Err(ProviderError::Validation(format!(
            "baseline_direction is required for condition type {}",
            condition_type
        )));
    }
    Ok(())
}

fn term_block() -> Block {
    Block::new()
        .with_attribute(
            "operator",
            Attribute::optional_string()
                .with_default(json!("equals"))
                .one_of_ignore_case(&OPERATORS),
        )
        .with_attribute("threshold", Attribute::required_float64())
        .with_attribute(
            "threshold_duration",
            Attribute::optional_int64()
                .with_description("Seconds the threshold must be violated."),
        )
        .with_attribute(
            "duration",
            Attribute::optional_int64()
                .int_between(1, 120)
                .with_description("Minutes the threshold must be violated."),
        )
        .with_attribute(
            "threshold_occurrences",
            Attribute::optional_string().one_of_ignore_case(&["ALL", "AT_LEAST_ONCE"]),
        )
        .with_attribute(
            "time_function",
            Attribute::optional_string().one_of(&["all", "any"]),
        )
        .with_attribute(
            "disable_health_status_reporting",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_block(
            "prediction",
            NestedBlock::single(
                Block::new()
                    .with_attribute(
                        "predict_by",
                        Attribute::optional_int64().with_default(json!(DEFAULT_PREDICT_BY)),
                    )
                    .with_attribute(
                        "prefer_prediction_violation",
                        Attribute::optional_bool().with_default(json!(false)),
                    ),
            )
            .with_max_items(1),
        )
}

fn nrql_block() -> Block {
    Block::new()
        .with_attribute("query", Attribute::required_string())
        .with_attribute(
            "data_account_id",
            Attribute::optional_int64()
                .with_computed()
                .with_description("Account the query runs against. Defaults to account_id."),
        )
        .with_attribute("evaluation_offset", Attribute::optional_int64())
}

fn outlier_block() -> Block {
    Block::new().with_block(
        "dbscan",
        NestedBlock::single(
            Block::new()
                .with_attribute(
                    "epsilon",
                    Attribute::required_float64().float_at_least(0.000_000_1),
                )
                .with_attribute(
                    "minimum_points",
                    Attribute::required_int64().int_between(1, i64::from(i32::MAX)),
                )
                .with_attribute("evaluation_group_facet", Attribute::optional_string()),
        )
        .with_min_items(1)
        .with_max_items(1),
    )
}

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("An alert condition evaluated from a NRQL query.")
        .with_attribute(
            "policy_id",
            Attribute::required_int64()
                .with_force_new()
                .with_description("The ID of the policy where this condition should be used."),
        )
        .with_attribute("account_id", Attribute::optional_int64().with_computed())
        .with_attribute("name", Attribute::required_string())
        .with_attribute("description", Attribute::optional_string())
        .with_attribute("runbook_url", Attribute::optional_string())
        .with_attribute(
            "title_template",
            Attribute::optional_string()
                .with_description("Handlebars template for incident titles."),
        )
        .with_attribute(
            "enabled",
            Attribute::optional_bool().with_default(json!(true)),
        )
        .with_attribute(
            "type",
            Attribute::optional_string()
                .with_default(json!(NrqlConditionType::Static.as_str()))
                .with_force_new()
                .one_of(&NrqlConditionType::ALL),
        )
        .with_attribute(
            "violation_time_limit_seconds",
            Attribute::optional_int64()
                .with_default(json!(DEFAULT_VIOLATION_TIME_LIMIT_SECONDS))
                .int_between(300, MAX_VIOLATION_TIME_LIMIT_SECONDS),
        )
        .with_attribute(
            "open_violation_on_expiration",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_attribute(
            "close_violations_on_expiration",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_attribute(
            "ignore_on_expected_termination",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_attribute(
            "expiration_duration",
            Attribute::optional_int64().int_between(30, 172_800),
        )
        .with_attribute(
            "aggregation_window",
            Attribute::optional_int64().with_computed(),
        )
        .with_attribute("slide_by", Attribute::optional_int64())
        .with_attribute(
            "fill_option",
            Attribute::optional_string().one_of_ignore_case(&["none", "last_value", "static"]),
        )
        .with_attribute("fill_value", Attribute::optional_float64())
        .with_attribute(
            "aggregation_method",
            Attribute::optional_string().one_of_ignore_case(&[
                "cadence",
                "event_flow",
                "event_timer",
            ]),
        )
        .with_attribute("aggregation_delay", Attribute::optional_int64())
        .with_attribute("aggregation_timer", Attribute::optional_int64())
        .with_attribute(
            "evaluation_delay",
            Attribute::optional_int64().int_between(1, 7200),
        )
        .with_attribute("entity_guid", Attribute::computed_string())
        .with_attribute(
            "baseline_direction",
            Attribute::optional_string().one_of_ignore_case(&[
                "LOWER_ONLY",
                "UPPER_AND_LOWER",
                "UPPER_ONLY",
            ]),
        )
        .with_attribute(
            "signal_seasonality",
            Attribute::optional_string().one_of_ignore_case(&[
                DEFAULT_SIGNAL_SEASONALITY,
                "HOURLY",
                "DAILY",
                "WEEKLY",
                "NONE",
            ]),
        )
        .with_attribute(
            "target_entity",
            Attribute::optional_string()
                .with_description("GUID of the entity whose health the condition affects."),
        )
        .with_block(
            "nrql",
            NestedBlock::single(nrql_block())
                .with_min_items(1)
                .with_max_items(1),
        )
        .with_block("critical", NestedBlock::single(term_block()).with_max_items(1))
        .with_block("warning", NestedBlock::single(term_block()).with_max_items(1))
        .with_block(
            "outlier_configuration",
            NestedBlock::single(outlier_block()).with_max_items(1),
        )
        .with_block(
            "timeouts",
            NestedBlock::single(
                Block::new().with_attribute("create", Attribute::optional_string()),
            ),
        )
}

pub fn expand(d: &impl Attributes) -> Result<NrqlConditionBase, ProviderError> {
    let condition_type: NrqlConditionType = d
        .get_str("type")
        .unwrap_or(NrqlConditionType::Static.as_str())
        .parse()
        .map_err(ProviderError::Validation)?;
    validate_for_type(condition_type, d)?;

    let nrql = d
        .single_block("nrql")
        .ok_or_else(|| ProviderError::Validation("nrql is required".to_string()))?;

    let mut terms = Vec::new();
    for priority in ["critical", "warning"] {
        if let Some(term) = d.single_block(priority) {
            terms.push(expand_term(term, condition_type, priority)?);
        }
    }
    if terms.is_empty() {
        return Err(ProviderError::Validation(
            "at least one of critical or warning must be configured".to_string(),
        ));
    }

    let baseline = condition_type == NrqlConditionType::Baseline;
    Ok(NrqlConditionBase {
        condition_type,
        name: required_str(d, "name")?.to_string(),
        description: d.string("description"),
        enabled: d.get_bool("enabled").unwrap_or(true),
        runbook_url: d.string("runbook_url"),
        title_template: d.get_str("title_template").map(str::to_string),
        nrql: NrqlConditionQuery {
            query: required_str(nrql, "query")?.to_string(),
            data_account_id: nrql.get_i64_ok("data_account_id"),
            evaluation_offset: nrql.get_i64_ok("evaluation_offset"),
        },
        terms,
        violation_time_limit_seconds: d.get_i64_ok("violation_time_limit_seconds"),
        expiration: expand_expiration(d),
        signal: expand_signal(d)?,
        baseline_direction: d.get_str("baseline_direction").map(str::to_uppercase),
        // Unset means the server calculates seasonality.
        signal_seasonality: baseline.then(|| {
            d.get_str("signal_seasonality")
                .unwrap_or(DEFAULT_SIGNAL_SEASONALITY)
                .to_uppercase()
        }),
        outlier_configuration: expand_outlier(d)?,
        target_entity: d.get_str("target_entity").map(str::to_string),
    })
}

fn expand_term(
    term: &Map<String, Value>,
    condition_type: NrqlConditionType,
    priority: &str,
) -> Result<NrqlConditionTerm, ProviderError> {
    let minutes = term.get_i64_ok("duration");
    let seconds = term.get_i64_ok("threshold_duration");
    let threshold_duration = match (minutes, seconds) {
        (Some(minutes), None) => minutes * 60,
        (None, Some(seconds)) => seconds,
        (None, None) => {
            return Err(ProviderError::Validation(format!(
                "one of duration or threshold_duration must be configured for block {}",
                priority
            )))
        }
        (Some(_), Some(_)) => {
            return Err(ProviderError::Validation(format!(
                "only one of duration or threshold_duration may be configured for block {}",
                priority
            )))
        }
    };

    let threshold_occurrences = match (
        term.get_str("time_function"),
        term.get_str("threshold_occurrences"),
    ) {
        (Some(function), None) => occurrences_for_time_function(function)?.to_string(),
        (None, Some(occurrences)) => occurrences.to_uppercase(),
        (None, None) => {
            return Err(ProviderError::Validation(format!(
                "one of time_function or threshold_occurrences must be configured for block {}",
                priority
            )))
        }
        (Some(_), Some(_)) => {
            return Err(ProviderError::Validation(format!(
                "only one of time_function or threshold_occurrences may be configured for block {}",
                priority
            )))
        }
    };

    let operator = term.get_str("operator").unwrap_or("equals").to_uppercase();
    if condition_type == NrqlConditionType::Baseline && operator != "ABOVE" {
        return Err(ProviderError::Validation(
            "only the above operator is allowed for baseline conditions".to_string(),
        ));
    }

    let threshold = term.get_f64("threshold").ok_or_else(|| {
        ProviderError::Validation(format!("threshold is required for block {}", priority))
    })?;

    Ok(NrqlConditionTerm {
        operator,
        priority: priority.to_uppercase(),
        threshold,
        threshold_duration,
        threshold_occurrences,
        disable_health_status_reporting: term.get_bool("disable_health_status_reporting"),
        prediction: term.single_block("prediction").map(|p| NrqlTermPrediction {
            predict_by: p.get_i64("predict_by").unwrap_or(DEFAULT_PREDICT_BY),
            prefer_prediction_violation: p
                .get_bool("prefer_prediction_violation")
                .unwrap_or_default(),
        }),
    })
}

fn occurrences_for_time_function(function: &str) -> Result<&'static str, ProviderError> {
    match function {
        "all" => Ok("ALL"),
        "any" => Ok("AT_LEAST_ONCE"),
        other => Err(ProviderError::Validation(format!(
            "invalid time_function {:?}",
            other
        ))),
    }
}

fn expand_expiration(d: &impl Attributes) -> NrqlConditionExpiration {
    NrqlConditionExpiration {
        // Zero is not a valid duration; leave it unset.
        expiration_duration: d.get_i64_ok("expiration_duration"),
        open_violation_on_expiration: d.get_bool("open_violation_on_expiration").unwrap_or_default(),
        close_violations_on_expiration: d
            .get_bool("close_violations_on_expiration")
            .unwrap_or_default(),
        ignore_on_expected_termination: d
            .get_bool("ignore_on_expected_termination")
            .unwrap_or_default(),
    }
}

fn expand_signal(d: &impl Attributes) -> Result<NrqlConditionSignal, ProviderError> {
    let fill_option = d.get_str("fill_option").map(str::to_uppercase);
    let aggregation_method = d.get_str("aggregation_method").map(str::to_uppercase);

    if d.get("fill_value").is_some() && fill_option.is_none() {
        return Err(ProviderError::Validation(
            "fill_value requires fill_option".to_string(),
        ));
    }
    for key in ["aggregation_delay", "aggregation_timer"] {
        if d.get(key).is_some() && aggregation_method.is_none() {
            return Err(ProviderError::Validation(format!(
                "{} requires aggregation_method",
                key
            )));
        }
    }

    // A zero fill value only means something for static filling.
    let static_fill = fill_option.as_deref() == Some("STATIC");
    let fill_value = d
        .get_f64("fill_value")
        .filter(|v| *v != 0.0 || static_fill);

    Ok(NrqlConditionSignal {
        aggregation_window: d.get_i64_ok("aggregation_window"),
        slide_by: d.get_i64_ok("slide_by"),
        fill_option,
        fill_value,
        aggregation_method,
        aggregation_delay: d.get_i64("aggregation_delay"),
        aggregation_timer: d.get_i64("aggregation_timer"),
        evaluation_delay: d.get_i64_ok("evaluation_delay"),
    })
}

fn expand_outlier(d: &impl Attributes) -> Result<Option<NrqlOutlierConfiguration>, ProviderError> {
    let Some(outlier) = d.single_block("outlier_configuration") else {
        return Ok(None);
    };
    let dbscan = outlier.single_block("dbscan").ok_or_else(|| {
        ProviderError::Validation("outlier_configuration requires a dbscan block".to_string())
    })?;
    Ok(Some(NrqlOutlierConfiguration {
        epsilon: dbscan.get_f64("epsilon").ok_or_else(|| {
            ProviderError::Validation("dbscan.epsilon is required".to_string())
        })?,
        minimum_points: required_i64(dbscan, "minimum_points")?,
        evaluation_group_facet: dbscan.string("evaluation_group_facet"),
    }))
}

/// Write a server value unless it is the default and was not configured.
fn set_unless_default(d: &mut ResourceData, key: &str, value: Option<Value>, default: &Value) {
    match value {
        Some(value) if d.get(key).is_some() || &value != default => d.set(key, value),
        _ => {
            d.remove(key);
        }
    }
}

pub fn flatten(condition: &NrqlAlertCondition, account_id: i64, d: &mut ResourceData) {
    let base = &condition.base;
    let configured_critical = d.single_block("critical").cloned();
    let configured_warning = d.single_block("warning").cloned();
    let configured_nrql = d.single_block("nrql").cloned().unwrap_or_default();

    d.set("account_id", account_id);
    d.set("policy_id", condition.policy_id);
    d.set("type", base.condition_type.as_str());
    d.set("name", base.name.as_str());
    d.set("enabled", base.enabled);
    d.set_optional_str("description", &base.description);
    d.set_optional_str("runbook_url", &base.runbook_url);
    d.set_optional_str("title_template", base.title_template.as_deref().unwrap_or_default());
    d.set_optional_str("target_entity", base.target_entity.as_deref().unwrap_or_default());
    d.set_optional_str("entity_guid", &condition.entity_guid);

    let mut nrql = block([("query", json!(base.nrql.query))]);
    if let Some(account) = base.nrql.data_account_id {
        nrql.insert("data_account_id".to_string(), json!(account));
    }
    if let Some(offset) = base.nrql.evaluation_offset {
        nrql.insert("evaluation_offset".to_string(), json!(offset));
    } else if let Some(offset) = configured_nrql.get("evaluation_offset") {
        nrql.insert("evaluation_offset".to_string(), offset.clone());
    }
    d.set_block("nrql", nrql);

    for (priority, configured) in [
        ("critical", configured_critical.as_ref()),
        ("warning", configured_warning.as_ref()),
    ] {
        let server = base
            .terms
            .iter()
            .find(|t| t.priority.eq_ignore_ascii_case(priority));
        match server {
            Some(term) => d.set_block(priority, flatten_term(term, configured)),
            None => {
                d.remove(priority);
            }
        }
    }

    if let Some(limit) = base.violation_time_limit_seconds {
        d.set("violation_time_limit_seconds", limit);
    }

    let expiration = &base.expiration;
    d.set("open_violation_on_expiration", expiration.open_violation_on_expiration);
    d.set("close_violations_on_expiration", expiration.close_violations_on_expiration);
    d.set("ignore_on_expected_termination", expiration.ignore_on_expected_termination);
    match expiration.expiration_duration {
        Some(duration) => d.set("expiration_duration", duration),
        None => {
            d.remove("expiration_duration");
        }
    }

    flatten_signal(&base.signal, d);

    if base.condition_type == NrqlConditionType::Baseline {
        d.set_optional_str(
            "baseline_direction",
            base.baseline_direction.as_deref().unwrap_or_default(),
        );
        set_unless_default(
            d,
            "signal_seasonality",
            base.signal_seasonality.as_deref().map(|s| json!(s)),
            &json!(DEFAULT_SIGNAL_SEASONALITY),
        );
    }

    match &base.outlier_configuration {
        Some(outlier) => {
            let mut dbscan = block([
                ("epsilon", json!(outlier.epsilon)),
                ("minimum_points", json!(outlier.minimum_points)),
            ]);
            if !outlier.evaluation_group_facet.is_empty() {
                dbscan.insert(
                    "evaluation_group_facet".to_string(),
                    json!(outlier.evaluation_group_facet),
                );
            }
            d.set_block(
                "outlier_configuration",
                block([("dbscan", json!([dbscan]))]),
            );
        }
        None => {
            d.remove("outlier_configuration");
        }
    }
}

fn flatten_term(term: &NrqlConditionTerm, configured: Option<&Map<String, Value>>) -> Map<String, Value> {
    let mut out = block([
        ("operator", json!(term.operator.to_lowercase())),
        ("threshold", json!(term.threshold)),
    ]);

    if configured.is_some_and(|t| t.get_i64_ok("duration").is_some()) {
        out.insert("duration".to_string(), json!(term.threshold_duration / 60));
    } else {
        out.insert("threshold_duration".to_string(), json!(term.threshold_duration));
    }

    let legacy = if configured.is_some_and(|t| t.get_str("time_function").is_some()) {
        match term.threshold_occurrences.as_str() {
            "ALL" => Some("all"),
            "AT_LEAST_ONCE" => Some("any"),
            _ => None,
        }
    } else {
        None
    };
    match legacy {
        Some(function) => {
            out.insert("time_function".to_string(), json!(function));
        }
        None => {
            out.insert(
                "threshold_occurrences".to_string(),
                json!(term.threshold_occurrences.to_lowercase()),
            );
        }
    }

    if let Some(disabled) = term.disable_health_status_reporting {
        out.insert("disable_health_status_reporting".to_string(), json!(disabled));
    }
    if let Some(prediction) = &term.prediction {
        out.insert(
            "prediction".to_string(),
            json!([{
                "predict_by": prediction.predict_by,
                "prefer_prediction_violation": prediction.prefer_prediction_violation,
            }]),
        );
    }
    out
}

fn flatten_signal(signal: &NrqlConditionSignal, d: &mut ResourceData) {
    if let Some(window) = signal.aggregation_window {
        d.set("aggregation_window", window);
    }
    match signal.slide_by {
        Some(slide_by) => d.set("slide_by", slide_by),
        None => {
            d.remove("slide_by");
        }
    }

    let fill_option = signal.fill_option.as_deref().map(str::to_lowercase);
    set_unless_default(d, "fill_option", fill_option.map(Value::from), &json!("none"));
    match signal.fill_value {
        Some(value) => d.set("fill_value", value),
        None => {
            d.remove("fill_value");
        }
    }

    let method = signal
        .aggregation_method
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_else(|| DEFAULT_AGGREGATION_METHOD.to_string());
    let (default_delay, default_timer) = match method.as_str() {
        "event_timer" => (Value::Null, json!(60)),
        _ => (json!(120), Value::Null),
    };
    set_unless_default(
        d,
        "aggregation_method",
        Some(json!(method)),
        &json!(DEFAULT_AGGREGATION_METHOD),
    );
    set_unless_default(
        d,
        "aggregation_delay",
        signal.aggregation_delay.map(Value::from),
        &default_delay,
    );
    set_unless_default(
        d,
        "aggregation_timer",
        signal.aggregation_timer.map(Value::from),
        &default_timer,
    );

    match signal.evaluation_delay {
        Some(delay) => d.set("evaluation_delay", delay),
        None => {
            d.remove("evaluation_delay");
        }
    }
}

fn condition_ids(d: &ResourceData) -> Result<(i64, i64), ProviderError> {
    let ids = parse_ids(d.require_id(NAME)?, 2)?;
    Ok((ids[0], ids[1]))
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let condition = expand(&d)?;
    let policy_id = required_i64(&d, "policy_id")?;
    let account_id = ctx.account_id(&d)?;
    let timeout = operation_timeout(&d, "create", DEFAULT_CREATE_TIMEOUT)?;

    info!(
        name = %condition.name,
        policy_id,
        condition_type = %condition.condition_type,
        "creating NRQL alert condition"
    );
    let created = ctx
        .api
        .create_nrql_condition(account_id, policy_id, condition)
        .await?;

    // A new condition can take a moment to become readable.
    let api = ctx.api;
    let condition_id = created.id;
    let condition = poll_until(timeout, DEFAULT_POLL_INTERVAL, ctx.cancel, move || async move {
        match api.get_nrql_condition(account_id, condition_id).await {
            Ok(condition) => Ok(condition),
            Err(ApiError::NotFound(_)) => Err(RetryError::Retryable(format!(
                "NRQL condition {} to be readable",
                condition_id
            ))),
            Err(err) => Err(RetryError::NonRetryable(err.into())),
        }
    })
    .await?;

    d.set_id(serialize_ids(&[policy_id, condition_id]));
    flatten(&condition, account_id, &mut d);
    Ok(d)
}

pub async fn read(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let (policy_id, condition_id) = condition_ids(&d)?;
    let account_id = ctx.account_id(&d)?;

    let policy = ctx.api.query_policy(account_id, policy_id).await;
    if found(policy, &mut d)?.is_none() {
        return Ok(d);
    }

    let condition = ctx.api.get_nrql_condition(account_id, condition_id).await;
    if let Some(condition) = found(condition, &mut d)? {
        flatten(&condition, account_id, &mut d);
    }
    Ok(d)
}

pub async fn update(ctx: &Context<'_>, d: ResourceData) -> Result<ResourceData, ProviderError> {
    let condition = expand(&d)?;
    let (policy_id, condition_id) = condition_ids(&d)?;
    let account_id = ctx.account_id(&d)?;

    info!(condition_id, policy_id, "updating NRQL alert condition");
    ctx.api
        .update_nrql_condition(account_id, condition_id, condition)
        .await?;

    read(ctx, d).await
}

pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let (_, condition_id) = condition_ids(d)?;
    let account_id = ctx.account_id(d)?;

    info!(condition_id, "deleting NRQL alert condition");
    ctx.api.delete_nrql_condition(account_id, condition_id).await?;
    Ok(())
}

/// `policyID:conditionID`, optionally followed by `:type`.
pub fn import_state(raw_id: &str) -> Result<ResourceData, ProviderError> {
    let import = split_import_id(raw_id, 2)?;
    parse_ids(&import.id, 2)?;

    let mut d = ResourceData::new();
    d.set_id(import.id);
    if let Some(raw_type) = import.metadata {
        let condition_type: NrqlConditionType =
            raw_type.parse().map_err(ProviderError::Validation)?;
        d.set("type", condition_type.as_str());
    }
    Ok(d)
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

    fn static_config() -> Value {
        json!({
            "policy_id": 1,
            "name": "Error rate",
            "nrql": [{"query": "SELECT percentage(count(*), WHERE error IS true) FROM Transaction"}],
            "critical": [{
                "operator": "above",
                "threshold": 5,
                "threshold_duration": 300,
                "threshold_occurrences": "ALL",
            }],
            "warning": [{
                "operator": "above",
                "threshold": 2.5,
                "duration": 5,
                "time_function": "any",
            }],
        })
    }

    fn validation_message(value: Value) -> String {
        match expand(&data(value)) {
            Err(ProviderError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_accepts_static_config() {
        assert!(validate(&schema(), &static_config()).is_empty());
    }

    #[test]
    fn test_expand_normalises_terms() {
        let condition = expand(&data(static_config())).unwrap();
        assert_eq!(condition.condition_type, NrqlConditionType::Static);
        assert_eq!(condition.terms.len(), 2);

        let critical = &condition.terms[0];
        assert_eq!(critical.priority, "CRITICAL");
        assert_eq!(critical.operator, "ABOVE");
        assert_eq!(critical.threshold, 5.0);
        assert_eq!(critical.threshold_duration, 300);
        assert_eq!(critical.threshold_occurrences, "ALL");

        let warning = &condition.terms[1];
        assert_eq!(warning.threshold_duration, 300);
        assert_eq!(warning.threshold_occurrences, "AT_LEAST_ONCE");
        assert!(condition.signal_seasonality.is_none());
    }

    #[test]
    fn test_term_needs_exactly_one_duration() {
        let mut value = static_config();
        value["critical"][0]["duration"] = json!(5);
        assert_eq!(
            validation_message(value),
            "only one of duration or threshold_duration may be configured for block critical"
        );

        let mut value = static_config();
        value["warning"][0].as_object_mut().unwrap().remove("duration");
        assert_eq!(
            validation_message(value),
            "one of duration or threshold_duration must be configured for block warning"
        );
    }

    #[test]
    fn test_type_only_fields() {
        let mut value = static_config();
        value["baseline_direction"] = json!("upper_only");
        assert_eq!(
            validation_message(value),
            "baseline_direction is not supported by condition type static"
        );

        let mut value = static_config();
        value["type"] = json!("outlier");
        value["critical"][0]["prediction"] = json!([{"predict_by": 7200}]);
        assert_eq!(
            validation_message(value),
            "prediction is not supported by condition type outlier"
        );

        let mut value = static_config();
        value["outlier_configuration"] = json!([{"dbscan": [{"epsilon": 1.5, "minimum_points": 3}]}]);
        assert_eq!(
            validation_message(value),
            "outlier_configuration is not supported by condition type static"
        );
    }

    #[test]
    fn test_baseline_rules() {
        let mut value = static_config();
        value["type"] = json!("baseline");
        value.as_object_mut().unwrap().remove("warning");
        assert_eq!(
            validation_message(value.clone()),
            "baseline_direction is required for condition type baseline"
        );

        value["baseline_direction"] = json!("upper_only");
        let condition = expand(&data(value.clone())).unwrap();
        assert_eq!(condition.baseline_direction.as_deref(), Some("UPPER_ONLY"));
        assert_eq!(
            condition.signal_seasonality.as_deref(),
            Some(DEFAULT_SIGNAL_SEASONALITY)
        );

        value["critical"][0]["operator"] = json!("below");
        assert_eq!(
            validation_message(value),
            "only the above operator is allowed for baseline conditions"
        );
    }

    #[test]
    fn test_signal_dependencies() {
        let mut value = static_config();
        value["fill_value"] = json!(0);
        assert_eq!(validation_message(value.clone()), "fill_value requires fill_option");

        value["fill_option"] = json!("last_value");
        assert_eq!(expand(&data(value.clone())).unwrap().signal.fill_value, None);

        value["fill_option"] = json!("STATIC");
        assert_eq!(expand(&data(value)).unwrap().signal.fill_value, Some(0.0));

        let mut value = static_config();
        value["aggregation_delay"] = json!(90);
        assert_eq!(
            validation_message(value),
            "aggregation_delay requires aggregation_method"
        );
    }

    #[test]
    fn test_flatten_keeps_configured_term_spelling() {
        let condition = NrqlAlertCondition {
            id: 7,
            policy_id: 1,
            entity_guid: "GUID".to_string(),
            base: NrqlConditionBase {
                terms: vec![
                    NrqlConditionTerm {
                        operator: "ABOVE".to_string(),
                        priority: "WARNING".to_string(),
                        threshold: 2.5,
                        threshold_duration: 300,
                        threshold_occurrences: "AT_LEAST_ONCE".to_string(),
                        ..Default::default()
                    },
                    NrqlConditionTerm {
                        operator: "ABOVE".to_string(),
                        priority: "CRITICAL".to_string(),
                        threshold: 5.0,
                        threshold_duration: 300,
                        threshold_occurrences: "ALL".to_string(),
                        ..Default::default()
                    },
                ],
                signal: NrqlConditionSignal {
                    aggregation_window: Some(60),
                    aggregation_method: Some("EVENT_FLOW".to_string()),
                    aggregation_delay: Some(120),
                    ..Default::default()
                },
                ..Default::default()
            },
        };

        let mut d = data(static_config());
        d.set_id("1:7");
        flatten(&condition, 1, &mut d);
        let state = d.into_state();

        assert_eq!(state["warning"][0]["duration"], 5);
        assert_eq!(state["warning"][0]["time_function"], "any");
        assert!(state["warning"][0].get("threshold_duration").is_none());
        assert_eq!(state["critical"][0]["threshold_duration"], 300);
        assert_eq!(state["critical"][0]["threshold_occurrences"], "all");
        assert_eq!(state["aggregation_window"], 60);
        assert!(state.get("aggregation_method").is_none());
        assert!(state.get("aggregation_delay").is_none());
        assert_eq!(state["entity_guid"], "GUID");
    }

    #[test]
    fn test_import_state_takes_type_suffix() {
        let d = import_state("1:7:baseline").unwrap();
        assert_eq!(d.id(), Some("1:7"));
        assert_eq!(d.get_str("type"), Some("baseline"));

        assert!(import_state("1:7:anomaly").is_err());
        assert!(import_state("7").is_err());
    }

    #[tokio::test]
    async fn test_create_read_delete() {
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
                    name: "nrql".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut value = static_config();
        value["policy_id"] = json!(policy.id);
        let d = create(&ctx, data(value)).await.unwrap();
        let (policy_id, condition_id) = condition_ids(&d).unwrap();
        assert_eq!(policy_id, policy.id);
        assert_eq!(d.single_block("nrql").unwrap().get_i64("data_account_id"), Some(1));
        assert!(d.get_str("entity_guid").is_some());

        delete(&ctx, &d).await.unwrap();
        assert!(client
            .get_nrql_condition(1, condition_id)
            .await
            .unwrap_err()
            .is_not_found());
        let d = read(&ctx, d).await.unwrap();
        assert!(d.id().is_none());
    }
}
