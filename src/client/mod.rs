//! New Relic API collaborator.
//!
//! Resources talk to New Relic only through the traits in this module. Each
//! trait covers one API area and works on the typed domain objects of its
//! submodule. The transport behind them is not part of this crate;
//! [`MemoryClient`] is a complete in-process implementation.
//!
//! Failures are reported as [`ApiError`], which only distinguishes "the
//! object does not exist" from every other remote failure.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Endpoints;

pub mod alerts;
pub mod entities;
pub mod events_to_metrics;
pub mod insights;
pub mod memory;

pub use alerts::{
    AlertChannel, AlertsPolicy, AlertsPolicyInput, ChannelConfiguration, ChannelLinks, Condition,
    IncidentPreference, InfrastructureCondition, MultiLocationSyntheticsCondition,
    MultiLocationTerm, NrqlAlertCondition, NrqlConditionBase, NrqlConditionExpiration,
    NrqlConditionQuery, NrqlConditionSignal, NrqlConditionTerm, NrqlConditionType,
    NrqlOutlierConfiguration, NrqlTermPrediction, Term, Threshold, UserDefined,
};
pub use entities::TaggingTag;
pub use events_to_metrics::{EventsToMetricsCreateRuleInput, EventsToMetricsRule};
pub use insights::InsightsEvent;
pub use memory::MemoryClient;

/// Error returned by an API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The object does not exist (HTTP 404 or an empty GraphQL result).
    #[error("{0}")]
    NotFound(String),

    /// Any other failure reported by the API or the transport.
    #[error("{0}")]
    Remote(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Alert policies, channels and conditions.
#[async_trait]
pub trait AlertsApi: Send + Sync {
    async fn create_policy(&self, account_id: i64, input: AlertsPolicyInput)
        -> ApiResult<AlertsPolicy>;

    async fn query_policy(&self, account_id: i64, policy_id: i64) -> ApiResult<AlertsPolicy>;

    /// All policies of an account.
    async fn search_policies(&self, account_id: i64) -> ApiResult<Vec<AlertsPolicy>>;

    async fn update_policy(
        &self,
        account_id: i64,
        policy_id: i64,
        input: AlertsPolicyInput,
    ) -> ApiResult<AlertsPolicy>;

    async fn delete_policy(&self, account_id: i64, policy_id: i64) -> ApiResult<()>;

    async fn list_channels(&self) -> ApiResult<Vec<AlertChannel>>;

    async fn create_channel(&self, channel: AlertChannel) -> ApiResult<AlertChannel>;

    async fn get_channel(&self, channel_id: i64) -> ApiResult<AlertChannel>;

    async fn delete_channel(&self, channel_id: i64) -> ApiResult<()>;

    /// Attach notification channels to a policy.
    async fn update_policy_channels(&self, policy_id: i64, channel_ids: &[i64]) -> ApiResult<()>;

    /// Detach one channel from a policy.
    async fn delete_policy_channel(&self, policy_id: i64, channel_id: i64) -> ApiResult<()>;

    async fn create_condition(&self, policy_id: i64, condition: Condition)
        -> ApiResult<Condition>;

    async fn get_condition(&self, policy_id: i64, condition_id: i64) -> ApiResult<Condition>;

    async fn update_condition(&self, condition: Condition) -> ApiResult<Condition>;

    async fn delete_condition(&self, condition_id: i64) -> ApiResult<()>;

    async fn create_infrastructure_condition(
        &self,
        condition: InfrastructureCondition,
    ) -> ApiResult<InfrastructureCondition>;

    async fn get_infrastructure_condition(
        &self,
        condition_id: i64,
    ) -> ApiResult<InfrastructureCondition>;

    async fn update_infrastructure_condition(
        &self,
        condition: InfrastructureCondition,
    ) -> ApiResult<InfrastructureCondition>;

    async fn delete_infrastructure_condition(&self, condition_id: i64) -> ApiResult<()>;

    async fn create_multi_location_condition(
        &self,
        policy_id: i64,
        condition: MultiLocationSyntheticsCondition,
    ) -> ApiResult<MultiLocationSyntheticsCondition>;

    async fn get_multi_location_condition(
        &self,
        policy_id: i64,
        condition_id: i64,
    ) -> ApiResult<MultiLocationSyntheticsCondition>;

    async fn update_multi_location_condition(
        &self,
        condition: MultiLocationSyntheticsCondition,
    ) -> ApiResult<MultiLocationSyntheticsCondition>;

    async fn delete_multi_location_condition(&self, condition_id: i64) -> ApiResult<()>;

    /// NerdGraph picks the static, baseline or outlier mutation from the
    /// condition type.
    async fn create_nrql_condition(
        &self,
        account_id: i64,
        policy_id: i64,
        condition: NrqlConditionBase,
    ) -> ApiResult<NrqlAlertCondition>;

    async fn get_nrql_condition(
        &self,
        account_id: i64,
        condition_id: i64,
    ) -> ApiResult<NrqlAlertCondition>;

    async fn update_nrql_condition(
        &self,
        account_id: i64,
        condition_id: i64,
        condition: NrqlConditionBase,
    ) -> ApiResult<NrqlAlertCondition>;

    async fn delete_nrql_condition(&self, account_id: i64, condition_id: i64) -> ApiResult<()>;
}

/// Entity tagging.
#[async_trait]
pub trait EntitiesApi: Send + Sync {
    async fn add_tags(&self, guid: &str, tags: &[TaggingTag]) -> ApiResult<()>;

    /// Replace every user tag on the entity.
    async fn replace_tags(&self, guid: &str, tags: &[TaggingTag]) -> ApiResult<()>;

    async fn delete_tag_keys(&self, guid: &str, keys: &[String]) -> ApiResult<()>;

    /// Current tags, default tags included.
    async fn get_tags(&self, guid: &str) -> ApiResult<Vec<TaggingTag>>;
}

/// Events-to-metrics rules.
#[async_trait]
pub trait EventsToMetricsApi: Send + Sync {
    async fn create_rule(&self, input: EventsToMetricsCreateRuleInput)
        -> ApiResult<EventsToMetricsRule>;

    async fn get_rule(&self, account_id: i64, rule_id: &str) -> ApiResult<EventsToMetricsRule>;

    async fn set_rule_enabled(
        &self,
        account_id: i64,
        rule_id: &str,
        enabled: bool,
    ) -> ApiResult<EventsToMetricsRule>;

    async fn delete_rule(&self, account_id: i64, rule_id: &str) -> ApiResult<()>;
}

/// Custom event ingest.
#[async_trait]
pub trait InsightsApi: Send + Sync {
    async fn post_events(&self, events: &[InsightsEvent]) -> ApiResult<()>;
}

/// Connection setup, run once the provider configuration is resolved.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Point the client at the region's endpoints, or at the configured
    /// overrides, and authenticate with `api_key`.
    async fn connect(&self, endpoints: &Endpoints, api_key: &str) -> ApiResult<()>;
}

/// Every API area the provider uses.
pub trait NewRelicApi:
    SessionApi + AlertsApi + EntitiesApi + EventsToMetricsApi + InsightsApi
{
}

impl<T> NewRelicApi for T where
    T: SessionApi + AlertsApi + EntitiesApi + EventsToMetricsApi + InsightsApi
{
}
