//! In-memory New Relic backend.
//!
//! Behaves like the remote API closely enough to drive full resource
//! lifecycles: IDs are assigned on create, missing objects answer
//! [`ApiError::NotFound`], and tag writes can be made to show up only after
//! a number of reads to exercise eventual consistency.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    AlertChannel, AlertsApi, AlertsPolicy, AlertsPolicyInput, ApiError, ApiResult, Condition,
    EntitiesApi, EventsToMetricsApi, EventsToMetricsCreateRuleInput, EventsToMetricsRule,
    InfrastructureCondition, InsightsApi, InsightsEvent, MultiLocationSyntheticsCondition,
    NrqlAlertCondition, NrqlConditionBase, NrqlConditionType, SessionApi, TaggingTag,
};
use crate::id::condition_entity_guid;
use crate::config::Endpoints;

#[derive(Debug, Default)]
struct EntityTags {
    visible: Vec<TaggingTag>,
    pending: Option<PendingTags>,
}

impl EntityTags {
    fn latest(&self) -> &[TaggingTag] {
        match &self.pending {
            Some(pending) => &pending.tags,
            None => &self.visible,
        }
    }
}

#[derive(Debug)]
struct PendingTags {
    tags: Vec<TaggingTag>,
    reads_left: u32,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    policies: BTreeMap<i64, AlertsPolicy>,
    policy_channels: HashMap<i64, Vec<i64>>,
    channels: Vec<AlertChannel>,
    conditions: BTreeMap<i64, Condition>,
    infra_conditions: BTreeMap<i64, InfrastructureCondition>,
    multi_location_conditions: BTreeMap<i64, (i64, MultiLocationSyntheticsCondition)>,
    /// Keyed by condition ID, with the owning account.
    nrql_conditions: BTreeMap<i64, (i64, NrqlAlertCondition)>,
    entities: HashMap<String, EntityTags>,
    rules: BTreeMap<(i64, String), EventsToMetricsRule>,
    events: Vec<InsightsEvent>,
    tag_visibility_delay: u32,
    tag_lookup_failure: Option<String>,
    endpoints: Option<Endpoints>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn policy_exists(&self, policy_id: i64) -> ApiResult<()> {
        if self.policies.contains_key(&policy_id) {
            Ok(())
        } else {
            Err(not_found("policy", policy_id))
        }
    }

    /// A channel as the API reports it: policy links filled in, secrets blanked.
    fn channel_view(&self, channel: &AlertChannel) -> AlertChannel {
        let mut policy_ids: Vec<i64> = self
            .policy_channels
            .iter()
            .filter(|(_, channels)| channels.contains(&channel.id))
            .map(|(policy_id, _)| *policy_id)
            .collect();
        policy_ids.sort_unstable();

        let mut view = channel.clone();
        view.links.policy_ids = policy_ids;
        let config = &mut view.configuration;
        for secret in [
            &mut config.api_key,
            &mut config.auth_password,
            &mut config.key,
            &mut config.service_key,
            &mut config.url,
        ] {
            secret.clear();
        }
        view
    }

    fn write_tags(&mut self, guid: &str, tags: Vec<TaggingTag>) {
        let delay = self.tag_visibility_delay;
        if let Some(entity) = self.entities.get_mut(guid) {
            if delay == 0 {
                entity.visible = tags;
                entity.pending = None;
            } else {
                entity.pending = Some(PendingTags {
                    tags,
                    reads_left: delay,
                });
            }
        }
    }

    fn entity(&self, guid: &str) -> ApiResult<&EntityTags> {
        self.entities
            .get(guid)
            .ok_or_else(|| not_found("entity", guid))
    }
}

/// API double holding every object in process memory.
#[derive(Debug)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 100,
                ..Default::default()
            }),
        }
    }

    /// Notification channels that exist in the account.
    pub fn with_channels(mut self, channels: Vec<AlertChannel>) -> Self {
        self.state.get_mut().channels = channels;
        self
    }

    /// Make tag writes visible only after `reads` calls to `get_tags`.
    pub fn with_tag_visibility_delay(mut self, reads: u32) -> Self {
        self.state.get_mut().tag_visibility_delay = reads;
        self
    }

    /// Make every tag lookup fail with a remote error.
    pub async fn fail_tag_lookups(&self, message: impl Into<String>) {
        self.state.lock().await.tag_lookup_failure = Some(message.into());
    }

    /// Create an entity carrying the default tags.
    pub async fn register_entity(&self, guid: impl Into<String>) {
        let guid = guid.into();
        let defaults = vec![
            TaggingTag::new("account", ["Main"]),
            TaggingTag::new("accountId", ["1"]),
            TaggingTag::new("guid", [guid.clone()]),
        ];
        self.state.lock().await.entities.insert(
            guid,
            EntityTags {
                visible: defaults,
                pending: None,
            },
        );
    }

    /// Latest tags of an entity, ignoring visibility delays.
    pub async fn entity_tags(&self, guid: &str) -> Option<Vec<TaggingTag>> {
        let state = self.state.lock().await;
        state.entities.get(guid).map(|e| e.latest().to_vec())
    }

    pub async fn remove_entity(&self, guid: &str) {
        self.state.lock().await.entities.remove(guid);
    }

    /// Delete a policy behind the provider's back, as another client would.
    pub async fn remove_policy(&self, policy_id: i64) {
        let mut state = self.state.lock().await;
        state.policies.remove(&policy_id);
        state.conditions.retain(|_, c| c.policy_id != policy_id);
        state.infra_conditions.retain(|_, c| c.policy_id != policy_id);
        state
            .multi_location_conditions
            .retain(|_, (p, _)| *p != policy_id);
        state
            .nrql_conditions
            .retain(|_, (_, c)| c.policy_id != policy_id);
        state.policy_channels.remove(&policy_id);
    }

    /// Detach a channel from a policy behind the provider's back.
    pub async fn detach_channel(&self, policy_id: i64, channel_id: i64) {
        if let Some(channels) = self.state.lock().await.policy_channels.get_mut(&policy_id) {
            channels.retain(|id| *id != channel_id);
        }
    }

    pub async fn remove_rule(&self, account_id: i64, rule_id: &str) {
        self.state
            .lock()
            .await
            .rules
            .remove(&(account_id, rule_id.to_string()));
    }

    pub async fn policy_channels(&self, policy_id: i64) -> Vec<i64> {
        let state = self.state.lock().await;
        state
            .policy_channels
            .get(&policy_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn condition_count(&self) -> usize {
        let state = self.state.lock().await;
        state.conditions.len()
            + state.infra_conditions.len()
            + state.multi_location_conditions.len()
            + state.nrql_conditions.len()
    }

    /// Endpoints passed to the last `connect`.
    pub async fn connected_endpoints(&self) -> Option<Endpoints> {
        self.state.lock().await.endpoints.clone()
    }

    /// Every event posted so far, in order.
    pub async fn posted_events(&self) -> Vec<InsightsEvent> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl SessionApi for MemoryClient {
    async fn connect(&self, endpoints: &Endpoints, api_key: &str) -> ApiResult<()> {
        if api_key.is_empty() {
            return Err(ApiError::Remote("no API key given".to_string()));
        }
        debug!(api_url = %endpoints.api_url, "memory client connected");
        self.state.lock().await.endpoints = Some(endpoints.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertsApi for MemoryClient {
    async fn create_policy(
        &self,
        account_id: i64,
        input: AlertsPolicyInput,
    ) -> ApiResult<AlertsPolicy> {
        let mut state = self.state.lock().await;
        let policy = AlertsPolicy {
            id: state.next_id(),
            account_id,
            name: input.name,
            incident_preference: input.incident_preference.unwrap_or_default(),
        };
        debug!(policy_id = policy.id, "memory: created policy");
        state.policies.insert(policy.id, policy.clone());
        Ok(policy)
    }

    async fn query_policy(&self, account_id: i64, policy_id: i64) -> ApiResult<AlertsPolicy> {
        let state = self.state.lock().await;
        state
            .policies
            .get(&policy_id)
            .filter(|p| p.account_id == account_id)
            .cloned()
            .ok_or_else(|| not_found("policy", policy_id))
    }

    async fn search_policies(&self, account_id: i64) -> ApiResult<Vec<AlertsPolicy>> {
        let state = self.state.lock().await;
        Ok(state
            .policies
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn update_policy(
        &self,
        account_id: i64,
        policy_id: i64,
        input: AlertsPolicyInput,
    ) -> ApiResult<AlertsPolicy> {
        let mut state = self.state.lock().await;
        let policy = state
            .policies
            .get_mut(&policy_id)
            .filter(|p| p.account_id == account_id)
            .ok_or_else(|| not_found("policy", policy_id))?;
        policy.name = input.name;
        if let Some(preference) = input.incident_preference {
            policy.incident_preference = preference;
        }
        Ok(policy.clone())
    }

    async fn delete_policy(&self, account_id: i64, policy_id: i64) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        match state.policies.get(&policy_id) {
            Some(p) if p.account_id == account_id => {
                state.policies.remove(&policy_id);
                state.policy_channels.remove(&policy_id);
                Ok(())
            }
            _ => Err(not_found("policy", policy_id)),
        }
    }

    async fn list_channels(&self) -> ApiResult<Vec<AlertChannel>> {
        let state = self.state.lock().await;
        Ok(state
            .channels
            .iter()
            .map(|c| state.channel_view(c))
            .collect())
    }

    async fn create_channel(&self, mut channel: AlertChannel) -> ApiResult<AlertChannel> {
        let mut state = self.state.lock().await;
        channel.id = state.next_id();
        channel.links.policy_ids.clear();
        debug!(channel_id = channel.id, "memory: created channel");
        state.channels.push(channel.clone());
        Ok(channel)
    }

    async fn get_channel(&self, channel_id: i64) -> ApiResult<AlertChannel> {
        let state = self.state.lock().await;
        state
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .map(|c| state.channel_view(c))
            .ok_or_else(|| not_found("channel", channel_id))
    }

    async fn delete_channel(&self, channel_id: i64) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        let before = state.channels.len();
        state.channels.retain(|c| c.id != channel_id);
        if state.channels.len() == before {
            return Err(not_found("channel", channel_id));
        }
        for channels in state.policy_channels.values_mut() {
            channels.retain(|id| *id != channel_id);
        }
        Ok(())
    }

    async fn update_policy_channels(&self, policy_id: i64, channel_ids: &[i64]) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.policy_exists(policy_id)?;
        if let Some(missing) = channel_ids
            .iter()
            .find(|id| !state.channels.iter().any(|c| c.id == **id))
        {
            return Err(not_found("channel", missing));
        }
        let attached = state.policy_channels.entry(policy_id).or_default();
        for id in channel_ids {
            if !attached.contains(id) {
                attached.push(*id);
            }
        }
        Ok(())
    }

    async fn delete_policy_channel(&self, policy_id: i64, channel_id: i64) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        let attached = state
            .policy_channels
            .get_mut(&policy_id)
            .filter(|channels| channels.contains(&channel_id))
            .ok_or_else(|| not_found("policy channel", format!("{}:{}", policy_id, channel_id)))?;
        attached.retain(|id| *id != channel_id);
        Ok(())
    }

    async fn create_condition(
        &self,
        policy_id: i64,
        mut condition: Condition,
    ) -> ApiResult<Condition> {
        let mut state = self.state.lock().await;
        state.policy_exists(policy_id)?;
        condition.id = state.next_id();
        condition.policy_id = policy_id;
        state.conditions.insert(condition.id, condition.clone());
        Ok(condition)
    }

    async fn get_condition(&self, policy_id: i64, condition_id: i64) -> ApiResult<Condition> {
        let state = self.state.lock().await;
        state
            .conditions
            .get(&condition_id)
            .filter(|c| c.policy_id == policy_id)
            .cloned()
            .ok_or_else(|| not_found("condition", condition_id))
    }

    async fn update_condition(&self, condition: Condition) -> ApiResult<Condition> {
        let mut state = self.state.lock().await;
        let stored = state
            .conditions
            .get_mut(&condition.id)
            .ok_or_else(|| not_found("condition", condition.id))?;
        let policy_id = stored.policy_id;
        *stored = Condition {
            policy_id,
            ..condition
        };
        Ok(stored.clone())
    }

    async fn delete_condition(&self, condition_id: i64) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state
            .conditions
            .remove(&condition_id)
            .map(|_| ())
            .ok_or_else(|| not_found("condition", condition_id))
    }

    async fn create_infrastructure_condition(
        &self,
        mut condition: InfrastructureCondition,
    ) -> ApiResult<InfrastructureCondition> {
        let mut state = self.state.lock().await;
        state.policy_exists(condition.policy_id)?;
        let now = unix_now();
        condition.id = state.next_id();
        condition.created_at = Some(now);
        condition.updated_at = Some(now);
        if condition.violation_close_timer.is_none() {
            condition.violation_close_timer = Some(24);
        }
        state
            .infra_conditions
            .insert(condition.id, condition.clone());
        Ok(condition)
    }

    async fn get_infrastructure_condition(
        &self,
        condition_id: i64,
    ) -> ApiResult<InfrastructureCondition> {
        let state = self.state.lock().await;
        state
            .infra_conditions
            .get(&condition_id)
            .cloned()
            .ok_or_else(|| not_found("infrastructure condition", condition_id))
    }

    async fn update_infrastructure_condition(
        &self,
        condition: InfrastructureCondition,
    ) -> ApiResult<InfrastructureCondition> {
        let mut state = self.state.lock().await;
        let stored = state
            .infra_conditions
            .get_mut(&condition.id)
            .ok_or_else(|| not_found("infrastructure condition", condition.id))?;
        let created_at = stored.created_at;
        let violation_close_timer = condition
            .violation_close_timer
            .or(stored.violation_close_timer);
        *stored = InfrastructureCondition {
            created_at,
            updated_at: Some(unix_now()),
            violation_close_timer,
            ..condition
        };
        Ok(stored.clone())
    }

    async fn delete_infrastructure_condition(&self, condition_id: i64) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state
            .infra_conditions
            .remove(&condition_id)
            .map(|_| ())
            .ok_or_else(|| not_found("infrastructure condition", condition_id))
    }

    async fn create_multi_location_condition(
        &self,
        policy_id: i64,
        mut condition: MultiLocationSyntheticsCondition,
    ) -> ApiResult<MultiLocationSyntheticsCondition> {
        let mut state = self.state.lock().await;
        state.policy_exists(policy_id)?;
        condition.id = state.next_id();
        state
            .multi_location_conditions
            .insert(condition.id, (policy_id, condition.clone()));
        Ok(condition)
    }

    async fn get_multi_location_condition(
        &self,
        policy_id: i64,
        condition_id: i64,
    ) -> ApiResult<MultiLocationSyntheticsCondition> {
        let state = self.state.lock().await;
        state
            .multi_location_conditions
            .get(&condition_id)
            .filter(|(p, _)| *p == policy_id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| not_found("multi-location condition", condition_id))
    }

    async fn update_multi_location_condition(
        &self,
        condition: MultiLocationSyntheticsCondition,
    ) -> ApiResult<MultiLocationSyntheticsCondition> {
        let mut state = self.state.lock().await;
        let (_, stored) = state
            .multi_location_conditions
            .get_mut(&condition.id)
            .ok_or_else(|| not_found("multi-location condition", condition.id))?;
        *stored = condition;
        Ok(stored.clone())
    }

    async fn delete_multi_location_condition(&self, condition_id: i64) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state
            .multi_location_conditions
            .remove(&condition_id)
            .map(|_| ())
            .ok_or_else(|| not_found("multi-location condition", condition_id))
    }

    async fn create_nrql_condition(
        &self,
        account_id: i64,
        policy_id: i64,
        condition: NrqlConditionBase,
    ) -> ApiResult<NrqlAlertCondition> {
        let mut state = self.state.lock().await;
        state.policy_exists(policy_id)?;
        check_nrql_condition(&condition)?;
        let id = state.next_id();
        let stored = NrqlAlertCondition {
            id,
            policy_id,
            entity_guid: condition_entity_guid(id, account_id),
            base: nrql_server_defaults(account_id, condition),
        };
        debug!(condition_id = id, "memory: created NRQL condition");
        state
            .nrql_conditions
            .insert(id, (account_id, stored.clone()));
        Ok(stored)
    }

    async fn get_nrql_condition(
        &self,
        account_id: i64,
        condition_id: i64,
    ) -> ApiResult<NrqlAlertCondition> {
        let state = self.state.lock().await;
        state
            .nrql_conditions
            .get(&condition_id)
            .filter(|(account, _)| *account == account_id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| not_found("NRQL condition", condition_id))
    }

    async fn update_nrql_condition(
        &self,
        account_id: i64,
        condition_id: i64,
        condition: NrqlConditionBase,
    ) -> ApiResult<NrqlAlertCondition> {
        let mut state = self.state.lock().await;
        check_nrql_condition(&condition)?;
        let (_, stored) = state
            .nrql_conditions
            .get_mut(&condition_id)
            .filter(|(account, _)| *account == account_id)
            .ok_or_else(|| not_found("NRQL condition", condition_id))?;
        if stored.base.condition_type != condition.condition_type {
            return Err(ApiError::Remote(format!(
                "cannot change the type of NRQL condition {} from {} to {}",
                condition_id, stored.base.condition_type, condition.condition_type
            )));
        }
        stored.base = nrql_server_defaults(account_id, condition);
        Ok(stored.clone())
    }

    async fn delete_nrql_condition(&self, account_id: i64, condition_id: i64) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        match state.nrql_conditions.get(&condition_id) {
            Some((account, _)) if *account == account_id => {
                state.nrql_conditions.remove(&condition_id);
                Ok(())
            }
            _ => Err(not_found("NRQL condition", condition_id)),
        }
    }
}

#[async_trait]
impl EntitiesApi for MemoryClient {
    async fn add_tags(&self, guid: &str, tags: &[TaggingTag]) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        let mut merged = state.entity(guid)?.latest().to_vec();
        for tag in tags {
            match merged.iter_mut().find(|t| t.key == tag.key) {
                Some(existing) => {
                    for value in &tag.values {
                        if !existing.values.contains(value) {
                            existing.values.push(value.clone());
                        }
                    }
                }
                None => merged.push(tag.clone()),
            }
        }
        state.write_tags(guid, merged);
        Ok(())
    }

    async fn replace_tags(&self, guid: &str, tags: &[TaggingTag]) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        let mut replaced: Vec<TaggingTag> = state
            .entity(guid)?
            .latest()
            .iter()
            .filter(|t| t.is_default())
            .cloned()
            .collect();
        replaced.extend(tags.iter().cloned());
        state.write_tags(guid, replaced);
        Ok(())
    }

    async fn delete_tag_keys(&self, guid: &str, keys: &[String]) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        let remaining: Vec<TaggingTag> = state
            .entity(guid)?
            .latest()
            .iter()
            .filter(|t| !keys.contains(&t.key))
            .cloned()
            .collect();
        state.write_tags(guid, remaining);
        Ok(())
    }

    async fn get_tags(&self, guid: &str) -> ApiResult<Vec<TaggingTag>> {
        let mut state = self.state.lock().await;
        if let Some(message) = &state.tag_lookup_failure {
            return Err(ApiError::Remote(message.clone()));
        }
        let entity = state
            .entities
            .get_mut(guid)
            .ok_or_else(|| not_found("entity", guid))?;

        if let Some(pending) = entity.pending.as_mut() {
            if pending.reads_left == 0 {
                if let Some(applied) = entity.pending.take() {
                    entity.visible = applied.tags;
                }
            } else {
                pending.reads_left -= 1;
            }
        }
        Ok(entity.visible.clone())
    }
}

#[async_trait]
impl EventsToMetricsApi for MemoryClient {
    async fn create_rule(
        &self,
        input: EventsToMetricsCreateRuleInput,
    ) -> ApiResult<EventsToMetricsRule> {
        let mut state = self.state.lock().await;
        let rule = EventsToMetricsRule {
            account_id: input.account_id,
            id: format!("e2m-{}", state.next_id()),
            name: input.name,
            description: input.description,
            nrql: input.nrql,
            enabled: true,
        };
        state
            .rules
            .insert((rule.account_id, rule.id.clone()), rule.clone());
        Ok(rule)
    }

    async fn get_rule(&self, account_id: i64, rule_id: &str) -> ApiResult<EventsToMetricsRule> {
        let state = self.state.lock().await;
        state
            .rules
            .get(&(account_id, rule_id.to_string()))
            .cloned()
            .ok_or_else(|| not_found("events to metrics rule", rule_id))
    }

    async fn set_rule_enabled(
        &self,
        account_id: i64,
        rule_id: &str,
        enabled: bool,
    ) -> ApiResult<EventsToMetricsRule> {
        let mut state = self.state.lock().await;
        let rule = state
            .rules
            .get_mut(&(account_id, rule_id.to_string()))
            .ok_or_else(|| not_found("events to metrics rule", rule_id))?;
        rule.enabled = enabled;
        Ok(rule.clone())
    }

    async fn delete_rule(&self, account_id: i64, rule_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state
            .rules
            .remove(&(account_id, rule_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found("events to metrics rule", rule_id))
    }
}

#[async_trait]
impl InsightsApi for MemoryClient {
    async fn post_events(&self, events: &[InsightsEvent]) -> ApiResult<()> {
        if events.is_empty() {
            return Err(ApiError::Remote("no events to post".to_string()));
        }
        self.state.lock().await.events.extend_from_slice(events);
        Ok(())
    }
}

/// Server-side checks NerdGraph applies to every NRQL condition mutation.
fn check_nrql_condition(condition: &NrqlConditionBase) -> ApiResult<()> {
    if condition.terms.is_empty() {
        return Err(ApiError::Remote(
            "a NRQL condition needs at least one term".to_string(),
        ));
    }
    if condition.condition_type == NrqlConditionType::Baseline
        && condition.baseline_direction.is_none()
    {
        return Err(ApiError::Remote(
            "baseline conditions require a baseline direction".to_string(),
        ));
    }
    Ok(())
}

/// Fill the fields NerdGraph defaults when the mutation leaves them out.
fn nrql_server_defaults(account_id: i64, mut condition: NrqlConditionBase) -> NrqlConditionBase {
    condition.nrql.data_account_id.get_or_insert(account_id);
    condition.signal.aggregation_window.get_or_insert(60);
    if condition.signal.aggregation_method.is_none() {
        condition.signal.aggregation_method = Some("EVENT_FLOW".to_string());
        condition.signal.aggregation_delay.get_or_insert(120);
    }
    if condition.condition_type == NrqlConditionType::Baseline {
        condition
            .signal_seasonality
            .get_or_insert_with(|| "NEW_RELIC_CALCULATION".to_string());
    }
    condition
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> ApiError {
    ApiError::NotFound(format!("{} {} not found", kind, id))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::entities::find_tag;
    use crate::client::{
        ChannelConfiguration, IncidentPreference, NrqlConditionQuery, NrqlConditionTerm,
    };

    #[test]
    fn test_unix_now_is_positive_seconds() {
        let now = unix_now();
        assert!(now > 1_600_000_000, "{}", now);
        assert!(now < i64::MAX);
    }

    #[tokio::test]
    async fn test_policy_crud() {
        let client = MemoryClient::new();
        let policy = client
            .create_policy(
                1,
                AlertsPolicyInput {
                    name: "web".to_string(),
                    incident_preference: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(policy.incident_preference, IncidentPreference::PerPolicy);

        assert!(client.query_policy(2, policy.id).await.unwrap_err().is_not_found());

        client.delete_policy(1, policy.id).await.unwrap();
        assert!(client.query_policy(1, policy.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_condition_requires_policy() {
        let client = MemoryClient::new();
        let err = client
            .create_condition(999, Condition::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    async fn policy(client: &MemoryClient) -> i64 {
        client
            .create_policy(
                1,
                AlertsPolicyInput {
                    name: "p".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_channel_read_blanks_secrets_and_links_policies() {
        let client = MemoryClient::new();
        let channel = client
            .create_channel(AlertChannel {
                name: "slack".to_string(),
                channel_type: "slack".to_string(),
                configuration: ChannelConfiguration {
                    url: "https://hooks.slack.com/services/T0/B0/x".to_string(),
                    channel: "#alerts".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        let policy_id = policy(&client).await;
        client
            .update_policy_channels(policy_id, &[channel.id])
            .await
            .unwrap();

        let read = client.get_channel(channel.id).await.unwrap();
        assert!(read.configuration.url.is_empty());
        assert_eq!(read.configuration.channel, "#alerts");
        assert_eq!(read.links.policy_ids, vec![policy_id]);

        client
            .delete_policy_channel(policy_id, channel.id)
            .await
            .unwrap();
        assert!(client
            .delete_policy_channel(policy_id, channel.id)
            .await
            .unwrap_err()
            .is_not_found());

        client.delete_channel(channel.id).await.unwrap();
        assert!(client.get_channel(channel.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_policy_channels_require_existing_channel() {
        let client = MemoryClient::new();
        let policy_id = policy(&client).await;
        let err = client
            .update_policy_channels(policy_id, &[404])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_nrql_condition_defaults_and_type_lock() {
        let client = MemoryClient::new();
        let policy_id = policy(&client).await;
        let base = NrqlConditionBase {
            name: "errors".to_string(),
            enabled: true,
            nrql: NrqlConditionQuery {
                query: "SELECT count(*) FROM TransactionError".to_string(),
                ..Default::default()
            },
            terms: vec![NrqlConditionTerm {
                operator: "ABOVE".to_string(),
                priority: "CRITICAL".to_string(),
                threshold: 5.0,
                threshold_duration: 300,
                threshold_occurrences: "ALL".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let created = client
            .create_nrql_condition(1, policy_id, base.clone())
            .await
            .unwrap();
        assert_eq!(created.base.nrql.data_account_id, Some(1));
        assert_eq!(created.base.signal.aggregation_window, Some(60));
        assert_eq!(created.entity_guid, condition_entity_guid(created.id, 1));
        assert!(client
            .get_nrql_condition(2, created.id)
            .await
            .unwrap_err()
            .is_not_found());

        let baseline = NrqlConditionBase {
            condition_type: NrqlConditionType::Baseline,
            ..base.clone()
        };
        assert!(matches!(
            client.update_nrql_condition(1, created.id, baseline.clone()).await,
            Err(ApiError::Remote(_))
        ));
        assert!(matches!(
            client.create_nrql_condition(1, policy_id, baseline).await,
            Err(ApiError::Remote(_))
        ));

        client.delete_nrql_condition(1, created.id).await.unwrap();
        assert_eq!(client.condition_count().await, 0);
    }

    #[tokio::test]
    async fn test_tag_visibility_delay() {
        let client = MemoryClient::new().with_tag_visibility_delay(2);
        client.register_entity("ABC").await;
        client
            .add_tags("ABC", &[TaggingTag::new("env", ["prod"])])
            .await
            .unwrap();

        for _ in 0..2 {
            let tags = client.get_tags("ABC").await.unwrap();
            assert!(find_tag(&tags, "env").is_none());
        }
        let tags = client.get_tags("ABC").await.unwrap();
        assert!(find_tag(&tags, "env").is_some());
    }

    #[tokio::test]
    async fn test_replace_keeps_default_tags() {
        let client = MemoryClient::new();
        client.register_entity("ABC").await;
        client
            .add_tags("ABC", &[TaggingTag::new("env", ["prod"])])
            .await
            .unwrap();
        client
            .replace_tags("ABC", &[TaggingTag::new("team", ["core"])])
            .await
            .unwrap();

        let tags = client.get_tags("ABC").await.unwrap();
        assert!(find_tag(&tags, "env").is_none());
        assert!(find_tag(&tags, "team").is_some());
        assert!(find_tag(&tags, "accountId").is_some());
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let client = MemoryClient::new();
        assert!(client.get_tags("nope").await.unwrap_err().is_not_found());
        assert!(client
            .add_tags("nope", &[TaggingTag::new("env", ["prod"])])
            .await
            .unwrap_err()
            .is_not_found());
    }
}
