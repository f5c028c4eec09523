//! Resource kinds.
//!
//! Every kind lives in its own module with the same layout: `schema()`,
//! `expand` (snapshot to API object), `flatten` (API object to snapshot) and
//! the async lifecycle functions `create`, `read`, `update`, `delete`.
//! [`ResourceKind`] dispatches host requests to them by resource type name.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{ApiError, ApiResult, NewRelicApi};
use crate::config::ProviderConfig;
use crate::data::{Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::{parse_ids, AccountScopedId};
use crate::schema::Schema;

pub mod alert_channel;
pub mod alert_condition;
pub mod alert_policy;
pub mod alert_policy_channel;
pub mod entity_tags;
pub mod events_to_metrics_rule;
pub mod infra_alert_condition;
pub mod insights_event;
pub mod multi_location_condition;
pub mod nrql_alert_condition;

/// Everything a lifecycle function needs besides the snapshot.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub api: &'a dyn NewRelicApi,
    pub config: &'a ProviderConfig,
    /// Cancelled when the provider stops.
    pub cancel: &'a CancellationToken,
}

impl<'a> Context<'a> {
    pub fn new(
        api: &'a dyn NewRelicApi,
        config: &'a ProviderConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            api,
            config,
            cancel,
        }
    }

    /// The resource's `account_id` when set, else the provider account.
    pub fn account_id(&self, d: &impl Attributes) -> Result<i64, ProviderError> {
        self.config
            .select_account_id(d.get_i64("account_id"))
            .ok_or_else(|| {
                ProviderError::Configuration(
                    "account_id must be set on the resource or the provider".to_string(),
                )
            })
    }
}

/// Unwrap an API result on Read. A missing object clears the ID instead of failing.
pub(crate) fn found<T>(
    result: ApiResult<T>,
    d: &mut ResourceData,
) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ApiError::NotFound(message)) => {
            warn!(id = ?d.id(), %message, "remote object no longer exists, removing from state");
            d.clear_id();
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// A required integer attribute.
pub(crate) fn required_i64(d: &impl Attributes, key: &str) -> Result<i64, ProviderError> {
    d.get_i64(key)
        .ok_or_else(|| ProviderError::Validation(format!("{} is required", key)))
}

/// A required non-empty string attribute.
pub(crate) fn required_str<'a>(d: &'a impl Attributes, key: &str) -> Result<&'a str, ProviderError> {
    d.get_str(key)
        .ok_or_else(|| ProviderError::Validation(format!("{} is required", key)))
}

/// The managed resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    AlertPolicy,
    AlertChannel,
    AlertPolicyChannel,
    AlertCondition,
    InfraAlertCondition,
    MultiLocationCondition,
    NrqlAlertCondition,
    EntityTags,
    EventsToMetricsRule,
    InsightsEvent,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::AlertPolicy,
        ResourceKind::AlertChannel,
        ResourceKind::AlertPolicyChannel,
        ResourceKind::AlertCondition,
        ResourceKind::InfraAlertCondition,
        ResourceKind::MultiLocationCondition,
        ResourceKind::NrqlAlertCondition,
        ResourceKind::EntityTags,
        ResourceKind::EventsToMetricsRule,
        ResourceKind::InsightsEvent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::AlertPolicy => alert_policy::NAME,
            ResourceKind::AlertChannel => alert_channel::NAME,
            ResourceKind::AlertPolicyChannel => alert_policy_channel::NAME,
            ResourceKind::AlertCondition => alert_condition::NAME,
            ResourceKind::InfraAlertCondition => infra_alert_condition::NAME,
            ResourceKind::MultiLocationCondition => multi_location_condition::NAME,
            ResourceKind::NrqlAlertCondition => nrql_alert_condition::NAME,
            ResourceKind::EntityTags => entity_tags::NAME,
            ResourceKind::EventsToMetricsRule => events_to_metrics_rule::NAME,
            ResourceKind::InsightsEvent => insights_event::NAME,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ProviderError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| ProviderError::UnknownResource(name.to_string()))
    }

    pub fn schema(self) -> Schema {
        match self {
            ResourceKind::AlertPolicy => alert_policy::schema(),
            ResourceKind::AlertChannel => alert_channel::schema(),
            ResourceKind::AlertPolicyChannel => alert_policy_channel::schema(),
            ResourceKind::AlertCondition => alert_condition::schema(),
            ResourceKind::InfraAlertCondition => infra_alert_condition::schema(),
            ResourceKind::MultiLocationCondition => multi_location_condition::schema(),
            ResourceKind::NrqlAlertCondition => nrql_alert_condition::schema(),
            ResourceKind::EntityTags => entity_tags::schema(),
            ResourceKind::EventsToMetricsRule => events_to_metrics_rule::schema(),
            ResourceKind::InsightsEvent => insights_event::schema(),
        }
    }

    pub async fn create(
        self,
        ctx: &Context<'_>,
        d: ResourceData,
    ) -> Result<ResourceData, ProviderError> {
        debug!(resource = self.name(), "create");
        match self {
            ResourceKind::AlertPolicy => alert_policy::create(ctx, d).await,
            ResourceKind::AlertChannel => alert_channel::create(ctx, d).await,
            ResourceKind::AlertPolicyChannel => alert_policy_channel::create(ctx, d).await,
            ResourceKind::AlertCondition => alert_condition::create(ctx, d).await,
            ResourceKind::InfraAlertCondition => infra_alert_condition::create(ctx, d).await,
            ResourceKind::MultiLocationCondition => multi_location_condition::create(ctx, d).await,
            ResourceKind::NrqlAlertCondition => nrql_alert_condition::create(ctx, d).await,
            ResourceKind::EntityTags => entity_tags::create(ctx, d).await,
            ResourceKind::EventsToMetricsRule => events_to_metrics_rule::create(ctx, d).await,
            ResourceKind::InsightsEvent => insights_event::create(ctx, d).await,
        }
    }

    /// Refresh the snapshot. A cleared ID means the object is gone.
    pub async fn read(
        self,
        ctx: &Context<'_>,
        d: ResourceData,
    ) -> Result<ResourceData, ProviderError> {
        debug!(resource = self.name(), id = ?d.id(), "read");
        match self {
            ResourceKind::AlertPolicy => alert_policy::read(ctx, d).await,
            ResourceKind::AlertChannel => alert_channel::read(ctx, d).await,
            ResourceKind::AlertPolicyChannel => alert_policy_channel::read(ctx, d).await,
            ResourceKind::AlertCondition => alert_condition::read(ctx, d).await,
            ResourceKind::InfraAlertCondition => infra_alert_condition::read(ctx, d).await,
            ResourceKind::MultiLocationCondition => multi_location_condition::read(ctx, d).await,
            ResourceKind::NrqlAlertCondition => nrql_alert_condition::read(ctx, d).await,
            ResourceKind::EntityTags => entity_tags::read(ctx, d).await,
            ResourceKind::EventsToMetricsRule => events_to_metrics_rule::read(ctx, d).await,
            ResourceKind::InsightsEvent => insights_event::read(ctx, d).await,
        }
    }

    /// Apply the planned snapshot, which carries the ID of the prior state.
    pub async fn update(
        self,
        ctx: &Context<'_>,
        d: ResourceData,
    ) -> Result<ResourceData, ProviderError> {
        debug!(resource = self.name(), id = ?d.id(), "update");
        match self {
            ResourceKind::AlertPolicy => alert_policy::update(ctx, d).await,
            ResourceKind::AlertChannel | ResourceKind::AlertPolicyChannel => Err(
                ProviderError::Unimplemented(format!("{} cannot be updated in place", self.name())),
            ),
            ResourceKind::AlertCondition => alert_condition::update(ctx, d).await,
            ResourceKind::InfraAlertCondition => infra_alert_condition::update(ctx, d).await,
            ResourceKind::MultiLocationCondition => multi_location_condition::update(ctx, d).await,
            ResourceKind::NrqlAlertCondition => nrql_alert_condition::update(ctx, d).await,
            ResourceKind::EntityTags => entity_tags::update(ctx, d).await,
            ResourceKind::EventsToMetricsRule => events_to_metrics_rule::update(ctx, d).await,
            ResourceKind::InsightsEvent => Err(ProviderError::Unimplemented(format!(
                "{} cannot be updated in place",
                insights_event::NAME
            ))),
        }
    }

    pub async fn delete(self, ctx: &Context<'_>, d: ResourceData) -> Result<(), ProviderError> {
        debug!(resource = self.name(), id = ?d.id(), "delete");
        match self {
            ResourceKind::AlertPolicy => alert_policy::delete(ctx, &d).await,
            ResourceKind::AlertChannel => alert_channel::delete(ctx, &d).await,
            ResourceKind::AlertPolicyChannel => alert_policy_channel::delete(ctx, &d).await,
            ResourceKind::AlertCondition => alert_condition::delete(ctx, &d).await,
            ResourceKind::InfraAlertCondition => infra_alert_condition::delete(ctx, &d).await,
            ResourceKind::MultiLocationCondition => multi_location_condition::delete(ctx, &d).await,
            ResourceKind::NrqlAlertCondition => nrql_alert_condition::delete(ctx, &d).await,
            ResourceKind::EntityTags => entity_tags::delete(ctx, &d).await,
            ResourceKind::EventsToMetricsRule => events_to_metrics_rule::delete(ctx, &d).await,
            ResourceKind::InsightsEvent => insights_event::delete(ctx, &d).await,
        }
    }

    /// Build the initial snapshot for an import ID, then read it.
    pub async fn import(
        self,
        ctx: &Context<'_>,
        raw_id: &str,
    ) -> Result<ResourceData, ProviderError> {
        let d = match self {
            ResourceKind::AlertPolicy => alert_policy::import_state(raw_id)?,
            ResourceKind::AlertChannel => {
                parse_ids(raw_id, 1)?;
                with_id(raw_id)
            }
            ResourceKind::AlertPolicyChannel => {
                alert_policy_channel::parse_id(raw_id)?;
                with_id(raw_id)
            }
            ResourceKind::NrqlAlertCondition => nrql_alert_condition::import_state(raw_id)?,
            ResourceKind::AlertCondition
            | ResourceKind::InfraAlertCondition
            | ResourceKind::MultiLocationCondition => {
                parse_ids(raw_id, 2)?;
                with_id(raw_id)
            }
            ResourceKind::EventsToMetricsRule => {
                AccountScopedId::parse(raw_id)?;
                with_id(raw_id)
            }
            ResourceKind::EntityTags => with_id(raw_id),
            ResourceKind::InsightsEvent => {
                return Err(ProviderError::Unimplemented(format!(
                    "{} does not support import",
                    insights_event::NAME
                )))
            }
        };

        let d = self.read(ctx, d).await?;
        if d.id().is_none() {
            return Err(ProviderError::NotFound(format!(
                "cannot import non-existent remote object {}",
                raw_id
            )));
        }
        Ok(d)
    }
}

fn with_id(id: &str) -> ResourceData {
    let mut d = ResourceData::new();
    d.set_id(id);
    d
}

/// Data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSourceKind {
    AlertPolicy,
}

impl DataSourceKind {
    pub const ALL: [DataSourceKind; 1] = [DataSourceKind::AlertPolicy];

    pub fn name(self) -> &'static str {
        match self {
            DataSourceKind::AlertPolicy => alert_policy::NAME,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ProviderError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| ProviderError::UnknownResource(name.to_string()))
    }

    pub fn schema(self) -> Schema {
        match self {
            DataSourceKind::AlertPolicy => alert_policy::data_source_schema(),
        }
    }

    pub async fn read(
        self,
        ctx: &Context<'_>,
        d: ResourceData,
    ) -> Result<ResourceData, ProviderError> {
        match self {
            DataSourceKind::AlertPolicy => alert_policy::read_data_source(ctx, d).await,
        }
    }
}
