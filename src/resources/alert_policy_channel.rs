//! `newrelic_alert_policy_channel` resource.
//!
//! Attaches notification channels to a policy. ID: the policy ID followed by
//! the sorted channel IDs, `policyID:channelID[:channelID...]`.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::{required_i64, Context};
use crate::client::ApiError;
use crate::data::{Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::{parse_hashed_ids, serialize_ids};
use crate::schema::{Attribute, AttributeType, Schema};

pub const NAME: &str = "newrelic_alert_policy_channel";

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Notification channels attached to an alert policy.")
        .with_attribute(
            "policy_id",
            Attribute::required_int64()
                .with_force_new()
                .with_description("The ID of the policy."),
        )
        .with_attribute(
            "channel_ids",
            Attribute::required_set(AttributeType::Int64)
                .with_force_new()
                .with_description("Channel IDs to attach to the policy."),
        )
}

/// The policy and its sorted, deduplicated channel IDs.
pub fn expand(d: &impl Attributes) -> Result<(i64, Vec<i64>), ProviderError> {
    let policy_id = required_i64(d, "policy_id")?;
    let channel_ids: BTreeSet<i64> = d.ints("channel_ids").into_iter().collect();
    if channel_ids.is_empty() {
        return Err(ProviderError::Validation(format!(
            "must provide channel_ids for resource {}",
            NAME
        )));
    }
    Ok((policy_id, channel_ids.into_iter().collect()))
}

/// Split the ID into the policy and its channels.
pub fn parse_id(id: &str) -> Result<(i64, Vec<i64>), ProviderError> {
    match parse_hashed_ids(id)?.split_first() {
        Some((policy_id, channels)) if !channels.is_empty() => {
            let mut channels = channels.to_vec();
            channels.sort_unstable();
            Ok((*policy_id, channels))
        }
        _ => Err(ProviderError::Validation(format!(
            "invalid {} ID {:?}: expected policyID:channelID",
            NAME, id
        ))),
    }
}

/// Whether every channel exists and is attached to the policy.
async fn attached(ctx: &Context<'_>, policy_id: i64, channel_ids: &[i64]) -> Result<bool, ApiError> {
    let channels = ctx.api.list_channels().await?;
    Ok(channel_ids.iter().all(|id| {
        channels
            .iter()
            .any(|c| c.id == *id && c.links.policy_ids.contains(&policy_id))
    }))
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let (policy_id, channel_ids) = expand(&d)?;
    let mut ids = vec![policy_id];
    ids.extend(&channel_ids);
    let id = serialize_ids(&ids);

    info!(policy_id, channels = ?channel_ids, "attaching channels to alert policy");
    ctx.api.update_policy_channels(policy_id, &channel_ids).await?;
    d.set_id(id);

    read(ctx, d).await
}

pub async fn read(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let (policy_id, channel_ids) = parse_id(d.require_id(NAME)?)?;

    if !attached(ctx, policy_id, &channel_ids).await? {
        warn!(id = ?d.id(), "policy channels no longer attached, removing from state");
        d.clear_id();
        return Ok(d);
    }

    d.set("policy_id", policy_id);
    d.set("channel_ids", channel_ids);
    Ok(d)
}

pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let (policy_id, channel_ids) = parse_id(d.require_id(NAME)?)?;

    if !attached(ctx, policy_id, &channel_ids).await? {
        return Ok(());
    }

    info!(policy_id, channels = ?channel_ids, "detaching channels from alert policy");
    for channel_id in channel_ids {
        match ctx.api.delete_policy_channel(policy_id, channel_id).await {
            Ok(()) => {}
            Err(ApiError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
