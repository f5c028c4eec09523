//! `newrelic_insights_event` resource.
//!
//! Posts custom events once on create. Events cannot be read back or
//! deleted, so the resource only exists in state: read is a no-op, delete
//! forgets it and every field forces replacement.

use rand::Rng;
use serde_json::{Map, Value};
use tracing::info;

use super::{required_str, Context};
use crate::client::InsightsEvent;
use crate::data::{Attributes, ResourceData};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock, Schema};

pub const NAME: &str = "newrelic_insights_event";

fn attribute_block() -> Block {
    Block::new()
        .with_attribute(
            "key",
            Attribute::required_string()
                .with_force_new()
                .length_between(1, 255),
        )
        .with_attribute("value", Attribute::required_string().with_force_new())
        .with_attribute(
            "type",
            Attribute::optional_string()
                .with_force_new()
                .one_of_ignore_case(&["", "int", "float", "string"])
                .with_description("How to send the value: string (default), int or float."),
        )
}

fn event_block() -> Block {
    Block::new()
        .with_attribute(
            "type",
            Attribute::required_string()
                .with_force_new()
                .charset("_: ")
                .with_description("The event type: alphanumerics, underscores, colons and spaces."),
        )
        .with_attribute(
            "timestamp",
            Attribute::optional_int64()
                .with_force_new()
                .with_description("Unix epoch timestamp in seconds or milliseconds."),
        )
        .with_block(
            "attribute",
            NestedBlock::set(attribute_block())
                .with_min_items(1)
                .with_max_items(255)
                .with_force_new(),
        )
}

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Send custom events to New Relic.")
        .with_block(
            "event",
            NestedBlock::set(event_block())
                .with_min_items(1)
                .with_force_new(),
        )
}

/// Convert an attribute value to the JSON type named by `value_type`.
pub fn coerce(value: &str, value_type: &str) -> Result<Value, ProviderError> {
    match value_type.to_lowercase().as_str() {
        "int" => value.parse::<i64>().map(Value::from).map_err(|_| {
            ProviderError::Validation(format!("unable to convert value {:?} to an int", value))
        }),
        "float" => value
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                ProviderError::Validation(format!(
                    "unable to convert value {:?} to a float",
                    value
                ))
            }),
        "string" | "" => Ok(Value::String(value.to_string())),
        _ => Err(ProviderError::Validation(format!(
            "{:?} is not a valid type for an attribute value",
            value_type
        ))),
    }
}

pub fn expand(d: &impl Attributes) -> Result<Vec<InsightsEvent>, ProviderError> {
    d.blocks("event").into_iter().map(expand_event).collect()
}

fn expand_event(event: &Map<String, Value>) -> Result<InsightsEvent, ProviderError> {
    let mut expanded = InsightsEvent::new(required_str(event, "type")?);
    if let Some(timestamp) = event.get_i64("timestamp").filter(|t| *t > 0) {
        expanded = expanded.with_timestamp(timestamp);
    }
    for attr in event.blocks("attribute") {
        let key = required_str(attr, "key")?;
        let raw = attr.get("value").and_then(Value::as_str).unwrap_or_default();
        let value = coerce(raw, &attr.string("type"))?;
        expanded = expanded.with_attribute(key, value);
    }
    Ok(expanded)
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    if ctx.config.insights_insert_key.is_none() {
        return Err(ProviderError::Configuration(
            "insights_insert_key must be set to post events".to_string(),
        ));
    }
    let events = expand(&d)?;

    info!(count = events.len(), "posting events to Insights");
    ctx.api.post_events(&events).await.map_err(|e| {
        ProviderError::Remote(format!(
            "error occurred while posting events to Insights: {}",
            e
        ))
    })?;

    let id: i64 = rand::thread_rng().gen_range(1..i64::MAX);
    d.set_id(id.to_string());
    Ok(d)
}

pub async fn read(_ctx: &Context<'_>, d: ResourceData) -> Result<ResourceData, ProviderError> {
    Ok(d)
}

pub async fn delete(_ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    info!(id = ?d.id(), "removing Insights event from state");
    Ok(())
}
