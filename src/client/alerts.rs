//! Alert policies, notification channels and conditions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a policy groups incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentPreference {
    #[default]
    PerPolicy,
    PerCondition,
    PerConditionAndTarget,
}

impl IncidentPreference {
    pub const ALL: [&'static str; 3] = ["PER_POLICY", "PER_CONDITION", "PER_CONDITION_AND_TARGET"];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentPreference::PerPolicy => "PER_POLICY",
            IncidentPreference::PerCondition => "PER_CONDITION",
            IncidentPreference::PerConditionAndTarget => "PER_CONDITION_AND_TARGET",
        }
    }
}

impl FromStr for IncidentPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PER_POLICY" => Ok(IncidentPreference::PerPolicy),
            "PER_CONDITION" => Ok(IncidentPreference::PerCondition),
            "PER_CONDITION_AND_TARGET" => Ok(IncidentPreference::PerConditionAndTarget),
            other => Err(format!("invalid incident preference {:?}", other)),
        }
    }
}

impl fmt::Display for IncidentPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertsPolicy {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub incident_preference: IncidentPreference,
}

/// Fields sent on policy create and update. Unset fields keep the server value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertsPolicyInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_preference: Option<IncidentPreference>,
}

/// Notification channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertChannel {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub channel_type: String,
    #[serde(default)]
    pub configuration: ChannelConfiguration,
    #[serde(default)]
    pub links: ChannelLinks,
}

/// Type-specific settings of a channel. The API blanks secrets on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfiguration {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub include_json_attachment: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub payload_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub recipients: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub route_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tags: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub teams: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLinks {
    /// Policies the channel is attached to.
    #[serde(default)]
    pub policy_ids: Vec<i64>,
}

/// APM, browser, mobile or server metric condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: i64,
    pub policy_id: i64,
    #[serde(rename = "type")]
    pub condition_type: String,
    pub name: String,
    pub enabled: bool,
    /// Entity IDs, sent as decimal strings.
    pub entities: Vec<String>,
    pub metric: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub runbook_url: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub condition_scope: String,
    #[serde(skip_serializing_if = "is_zero", default)]
    pub violation_close_timer: i64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub gc_metric: String,
    pub terms: Vec<Term>,
    #[serde(skip_serializing_if = "UserDefined::is_empty", default)]
    pub user_defined: UserDefined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub duration: i64,
    pub operator: String,
    pub priority: String,
    pub threshold: f64,
    pub time_function: String,
}

/// Custom metric evaluated by a `user_defined` condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDefined {
    pub metric: String,
    pub value_function: String,
}

impl UserDefined {
    pub fn is_empty(&self) -> bool {
        self.metric.is_empty() && self.value_function.is_empty()
    }
}

/// Infrastructure condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureCondition {
    pub id: i64,
    pub policy_id: i64,
    #[serde(rename = "type")]
    pub condition_type: String,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub runbook_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub comparison: String,
    #[serde(default)]
    pub select: String,
    #[serde(rename = "where_clause", default)]
    pub where_clause: String,
    #[serde(default)]
    pub process_where: String,
    #[serde(default)]
    pub integration_provider: String,
    /// `None` leaves the server default in place.
    pub violation_close_timer: Option<i64>,
    pub critical: Option<Threshold>,
    pub warning: Option<Threshold>,
    /// Unix seconds, set by the server.
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

/// Threshold of an infrastructure condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub duration: i64,
    pub value: Option<f64>,
    #[serde(rename = "time_function", default)]
    pub function: String,
}

/// Synthetics condition that fires when several locations fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiLocationSyntheticsCondition {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub runbook_url: String,
    /// Monitor IDs.
    pub entities: Vec<String>,
    pub terms: Vec<MultiLocationTerm>,
    pub violation_time_limit_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiLocationTerm {
    pub priority: String,
    pub threshold: i64,
}

/// Evaluation model of a NRQL condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NrqlConditionType {
    #[default]
    Static,
    Baseline,
    Outlier,
}

impl NrqlConditionType {
    pub const ALL: [&'static str; 3] = ["static", "baseline", "outlier"];

    pub fn as_str(&self) -> &'static str {
        match self {
            NrqlConditionType::Static => "static",
            NrqlConditionType::Baseline => "baseline",
            NrqlConditionType::Outlier => "outlier",
        }
    }
}

impl FromStr for NrqlConditionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(NrqlConditionType::Static),
            "baseline" => Ok(NrqlConditionType::Baseline),
            "outlier" => Ok(NrqlConditionType::Outlier),
            _ => Err(format!("invalid NRQL condition type {:?}", s)),
        }
    }
}

impl fmt::Display for NrqlConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NrqlConditionQuery {
    pub query: String,
    /// Defaults to the condition's account on the server.
    pub data_account_id: Option<i64>,
    pub evaluation_offset: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NrqlConditionTerm {
    /// Upper case, for example `ABOVE`.
    pub operator: String,
    /// `CRITICAL` or `WARNING`.
    pub priority: String,
    pub threshold: f64,
    /// Seconds.
    pub threshold_duration: i64,
    /// `ALL` or `AT_LEAST_ONCE`.
    pub threshold_occurrences: String,
    pub disable_health_status_reporting: Option<bool>,
    pub prediction: Option<NrqlTermPrediction>,
}

/// Open an incident when a static threshold is predicted to be crossed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NrqlTermPrediction {
    pub predict_by: i64,
    pub prefer_prediction_violation: bool,
}

/// Loss-of-signal settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NrqlConditionExpiration {
    pub expiration_duration: Option<i64>,
    pub open_violation_on_expiration: bool,
    pub close_violations_on_expiration: bool,
    pub ignore_on_expected_termination: bool,
}

/// Aggregation and gap filling of the query signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NrqlConditionSignal {
    pub aggregation_window: Option<i64>,
    pub slide_by: Option<i64>,
    /// `NONE`, `LAST_VALUE` or `STATIC`.
    pub fill_option: Option<String>,
    pub fill_value: Option<f64>,
    /// `CADENCE`, `EVENT_FLOW` or `EVENT_TIMER`.
    pub aggregation_method: Option<String>,
    pub aggregation_delay: Option<i64>,
    pub aggregation_timer: Option<i64>,
    pub evaluation_delay: Option<i64>,
}

/// DBSCAN parameters of an outlier condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NrqlOutlierConfiguration {
    pub epsilon: f64,
    pub minimum_points: i64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub evaluation_group_facet: String,
}

/// Fields shared by the NRQL condition create and update mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NrqlConditionBase {
    #[serde(rename = "type")]
    pub condition_type: NrqlConditionType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    #[serde(default)]
    pub runbook_url: String,
    pub title_template: Option<String>,
    pub nrql: NrqlConditionQuery,
    pub terms: Vec<NrqlConditionTerm>,
    pub violation_time_limit_seconds: Option<i64>,
    pub expiration: NrqlConditionExpiration,
    pub signal: NrqlConditionSignal,
    /// Baseline only.
    pub baseline_direction: Option<String>,
    /// Baseline only.
    pub signal_seasonality: Option<String>,
    /// Outlier only.
    pub outlier_configuration: Option<NrqlOutlierConfiguration>,
    pub target_entity: Option<String>,
}

/// NRQL condition as returned by NerdGraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NrqlAlertCondition {
    pub id: i64,
    pub policy_id: i64,
    #[serde(default)]
    pub entity_guid: String,
    #[serde(flatten)]
    pub base: NrqlConditionBase,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}
