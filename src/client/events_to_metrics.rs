//! Events-to-metrics rules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsToMetricsRule {
    pub account_id: i64,
    /// Opaque rule ID assigned by the server.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nrql: String,
    pub enabled: bool,
}

/// Rules are always created enabled; `enabled` is changed through a separate update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsToMetricsCreateRuleInput {
    pub account_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    pub nrql: String,
}
