//! `newrelic_entity_tags` resource.
//!
//! Manages user tags on one entity, identified by its GUID. Tag writes are
//! eventually consistent, so create and update poll the entity until every
//! configured key and value is visible.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::info;

use super::{found, required_str, Context};
use crate::client::entities::find_tag;
use crate::client::TaggingTag;
use crate::data::{block, Attributes, ResourceData};
use crate::error::ProviderError;
use crate::retry::{operation_timeout, poll_until, RetryError, DEFAULT_POLL_INTERVAL};
use crate::schema::{Attribute, AttributeType, Block, NestedBlock, Schema};

pub const NAME: &str = "newrelic_entity_tags";

/// How long create and update wait for tags to show up.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("User tags on a New Relic entity.")
        .with_attribute(
            "guid",
            Attribute::required_string()
                .with_force_new()
                .with_description("The GUID of the entity to tag."),
        )
        .with_block(
            "tag",
            NestedBlock::set(
                Block::new()
                    .with_attribute("key", Attribute::required_string())
                    .with_attribute("values", Attribute::required_set(AttributeType::String)),
            )
            .with_min_items(1),
        )
        .with_block(
            "timeouts",
            NestedBlock::single(
                Block::new().with_attribute(
                    "create",
                    Attribute::optional_string()
                        .with_description("How long to wait for tags to become visible, e.g. \"30s\"."),
                ),
            ),
        )
}

pub fn expand(d: &impl Attributes) -> Vec<TaggingTag> {
    d.blocks("tag")
        .into_iter()
        .map(|t| TaggingTag::new(t.string("key"), t.strings("values")))
        .collect()
}

/// Default tags are dropped.
pub fn flatten(tags: &[TaggingTag], d: &mut ResourceData) {
    let guid = d.id().unwrap_or_default().to_string();
    d.set("guid", guid);

    let managed: Vec<Value> = tags
        .iter()
        .filter(|t| !t.is_default())
        .map(|t| Value::Object(tag_block(t)))
        .collect();
    d.set("tag", managed);
}

fn tag_block(tag: &TaggingTag) -> Map<String, Value> {
    block([("key", json!(tag.key)), ("values", json!(tag.values))])
}

/// Retryable until every wanted key carries every wanted value.
fn check_visible(current: &[TaggingTag], wanted: &[TaggingTag]) -> Result<(), RetryError> {
    for tag in wanted {
        let Some(found) = find_tag(current, &tag.key) else {
            return Err(RetryError::Retryable(format!(
                "expected entity tag {} to have been updated but was not found",
                tag.key
            )));
        };
        if !found.has_values(&tag.values) {
            return Err(RetryError::Retryable(format!(
                "expected entity tag values {:?} to have been updated for tag {} but were not found",
                tag.values, tag.key
            )));
        }
    }
    Ok(())
}

/// Poll until `wanted` is visible on the entity and return its tags.
async fn wait_for_tags(
    ctx: &Context<'_>,
    d: &ResourceData,
    guid: &str,
    wanted: &[TaggingTag],
) -> Result<Vec<TaggingTag>, ProviderError> {
    let timeout = operation_timeout(d, "create", DEFAULT_CREATE_TIMEOUT)?;
    let api = ctx.api;

    poll_until(timeout, DEFAULT_POLL_INTERVAL, ctx.cancel, move || async move {
        let current = api.get_tags(guid).await.map_err(|e| {
            RetryError::NonRetryable(ProviderError::Remote(format!(
                "error retrieving entity tags for guid {}: {}",
                guid, e
            )))
        })?;
        check_visible(&current, wanted)?;
        Ok(current)
    })
    .await
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let guid = required_str(&d, "guid")?.to_string();
    let tags = expand(&d);

    info!(%guid, count = tags.len(), "adding entity tags");
    ctx.api.add_tags(&guid, &tags).await?;
    d.set_id(guid.as_str());

    let current = wait_for_tags(ctx, &d, &guid, &tags).await?;
    flatten(&current, &mut d);
    Ok(d)
}

pub async fn read(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let guid = d.require_id(NAME)?.to_string();

    let result = ctx.api.get_tags(&guid).await;
    if let Some(tags) = found(result, &mut d)? {
        flatten(&tags, &mut d);
    }
    Ok(d)
}

pub async fn update(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let guid = d.require_id(NAME)?.to_string();
    let tags = expand(&d);

    info!(%guid, count = tags.len(), "replacing entity tags");
    ctx.api.replace_tags(&guid, &tags).await?;

    let current = wait_for_tags(ctx, &d, &guid, &tags).await?;
    flatten(&current, &mut d);
    Ok(d)
}

/// Removes only the configured keys.
pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let guid = d.require_id(NAME)?;
    let keys: Vec<String> = expand(d).into_iter().map(|t| t.key).collect();

    info!(%guid, ?keys, "deleting entity tags");
    ctx.api.delete_tag_keys(guid, &keys).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::config::ProviderConfig;
    use tokio_util::sync::CancellationToken;

    const GUID: &str = "MXxBUE18QVBQTElDQVRJT058MQ";

    fn config() -> ProviderConfig {
        ProviderConfig::from_value_with_env(&json!({"api_key": "k", "account_id": 1}), |_| None)
            .unwrap()
    }

    fn tagged(timeout: Option<&str>) -> ResourceData {
        let mut value = json!({
            "guid": GUID,
            "tag": [
                {"key": "env", "values": ["prod"]},
                {"key": "team", "values": ["core", "sre"]},
            ],
        });
        if let Some(timeout) = timeout {
            value["timeouts"] = json!([{"create": timeout}]);
        }
        ResourceData::from_value(value).unwrap()
    }

    #[test]
    fn test_check_visible() {
        let wanted = vec![TaggingTag::new("env", ["prod", "eu"])];

        match check_visible(&[], &wanted) {
            Err(RetryError::Retryable(msg)) => assert_eq!(
                msg,
                "expected entity tag env to have been updated but was not found"
            ),
            other => panic!("expected retryable, got {:?}", other),
        }

        let partial = vec![TaggingTag::new("env", ["prod"])];
        assert!(matches!(
            check_visible(&partial, &wanted),
            Err(RetryError::Retryable(_))
        ));

        let complete = vec![TaggingTag::new("env", ["eu", "prod", "extra"])];
        assert!(check_visible(&complete, &wanted).is_ok());
    }

    #[test]
    fn test_flatten_drops_default_tags() {
        let mut d = ResourceData::new();
        d.set_id(GUID);
        flatten(
            &[
                TaggingTag::new("accountId", ["1"]),
                TaggingTag::new("env", ["prod"]),
                TaggingTag::new("guid", [GUID]),
            ],
            &mut d,
        );
        let state = d.into_state();
        assert_eq!(state["guid"], GUID);
        assert_eq!(state["tag"], json!([{"key": "env", "values": ["prod"]}]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_visibility() {
        let client = MemoryClient::new().with_tag_visibility_delay(2);
        client.register_entity(GUID).await;
        let config = config();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        let d = create(&ctx, tagged(None)).await.unwrap();
        assert_eq!(d.id(), Some(GUID));
        assert_eq!(d.blocks("tag").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_times_out_naming_tag() {
        let client = MemoryClient::new().with_tag_visibility_delay(1_000);
        client.register_entity(GUID).await;
        let config = config();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        match create(&ctx, tagged(Some("2s"))).await {
            Err(ProviderError::DeadlineExceeded(msg)) => {
                assert!(msg.contains("expected entity tag env"), "{}", msg)
            }
            other => panic!("expected deadline error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_retried() {
        let client = MemoryClient::new();
        client.register_entity(GUID).await;
        client.fail_tag_lookups("rate limited").await;
        let config = config();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        match create(&ctx, tagged(None)).await {
            Err(ProviderError::Remote(msg)) => {
                assert!(msg.starts_with("error retrieving entity tags for guid"), "{}", msg)
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stopped_provider_cancels_poll() {
        let client = MemoryClient::new().with_tag_visibility_delay(1_000);
        client.register_entity(GUID).await;
        let config = config();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = Context::new(&client, &config, &cancel);

        assert!(matches!(
            create(&ctx, tagged(None)).await,
            Err(ProviderError::Cancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let client = MemoryClient::new();
        client.register_entity(GUID).await;
        let config = config();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        let d = create(&ctx, tagged(None)).await.unwrap();

        let mut next = d.into_value();
        next["tag"] = json!([{"key": "env", "values": ["staging"]}]);
        let d = update(&ctx, ResourceData::from_value(next).unwrap())
            .await
            .unwrap();
        assert_eq!(
            d.into_state()["tag"],
            json!([{"key": "env", "values": ["staging"]}])
        );

        let mut d = ResourceData::new();
        d.set_id(GUID);
        d.set("tag", json!([{"key": "env", "values": ["staging"]}]));
        delete(&ctx, &d).await.unwrap();

        let remaining = client.entity_tags(GUID).await.unwrap();
        assert!(remaining.iter().all(TaggingTag::is_default));
    }
}
