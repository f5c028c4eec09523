//! `newrelic_alert_channel` resource.
//!
//! ID: `channelID`. Channels cannot be changed through the API, so every
//! attribute forces a new channel. The `config` fields a channel accepts
//! depend on its `type`; see [`CHANNEL_FIELDS`].

use serde_json::{json, Map, Value};
use tracing::info;

use super::{found, required_str, Context};
use crate::client::{AlertChannel, ChannelConfiguration};
use crate::data::{Attributes, ResourceData};
use crate::error::ProviderError;
use crate::id::parse_ids;
use crate::schema::{Attribute, Block, NestedBlock, Schema};

pub const NAME: &str = "newrelic_alert_channel";

/// Config fields each channel type accepts.
pub const CHANNEL_FIELDS: &[(&str, &[&str])] = &[
    ("email", &["include_json_attachment", "recipients"]),
    ("opsgenie", &["api_key", "recipients", "region", "tags", "teams"]),
    ("pagerduty", &["service_key"]),
    ("slack", &["channel", "url"]),
    ("user", &["user_id"]),
    ("victorops", &["key", "route_key"]),
    (
        "webhook",
        &[
            "auth_password",
            "auth_type",
            "auth_username",
            "base_url",
            "headers_string",
            "payload_string",
            "payload_type",
        ],
    ),
];

/// Fields the API never returns; state keeps the configured value.
const SECRET_FIELDS: [&str; 5] = ["api_key", "auth_password", "key", "service_key", "url"];

fn channel_types() -> Vec<&'static str> {
    CHANNEL_FIELDS.iter().map(|(t, _)| *t).collect()
}

fn config_block() -> Block {
    let secret = || Attribute::optional_string().sensitive();
    Block::new()
        .with_attribute(
            "api_key",
            secret().with_description("The API key for integrating with OpsGenie."),
        )
        .with_attribute("auth_password", secret())
        .with_attribute("auth_type", secret().one_of(&["BASIC"]))
        .with_attribute("auth_username", Attribute::optional_string())
        .with_attribute(
            "base_url",
            secret().with_description("The base URL of the webhook destination."),
        )
        .with_attribute("channel", Attribute::optional_string())
        .with_attribute(
            "headers_string",
            secret().with_description("Extra webhook HTTP headers as a JSON object."),
        )
        .with_attribute(
            "include_json_attachment",
            Attribute::optional_string().one_of_ignore_case(&["true", "false", "1", "0"]),
        )
        .with_attribute("key", secret())
        .with_attribute(
            "payload_string",
            secret().with_description("The webhook payload as a JSON object."),
        )
        .with_attribute(
            "payload_type",
            Attribute::optional_string()
                .one_of(&["application/json", "application/x-www-form-urlencoded"]),
        )
        .with_attribute(
            "recipients",
            Attribute::optional_string().with_description("Comma separated recipients."),
        )
        .with_attribute("region", Attribute::optional_string().one_of(&["US", "EU"]))
        .with_attribute("route_key", secret())
        .with_attribute("service_key", secret())
        .with_attribute("tags", Attribute::optional_string())
        .with_attribute("teams", Attribute::optional_string())
        .with_attribute("url", secret())
        .with_attribute("user_id", Attribute::optional_string())
}

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("A notification channel for alert policies.")
        .with_attribute(
            "account_id",
            Attribute::optional_int64().with_computed().with_force_new(),
        )
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_description("The name of the channel."),
        )
        .with_attribute(
            "type",
            Attribute::required_string()
                .with_force_new()
                .one_of(&channel_types()),
        )
        .with_block(
            "config",
            NestedBlock::single(config_block())
                .with_min_items(1)
                .with_max_items(1)
                .with_force_new(),
        )
}

/// Reject config fields the channel type does not take.
pub fn validate_for_type(
    channel_type: &str,
    config: &Map<String, Value>,
) -> Result<(), ProviderError> {
    let allowed = CHANNEL_FIELDS
        .iter()
        .find(|(t, _)| *t == channel_type)
        .map(|(_, fields)| *fields)
        .ok_or_else(|| {
            ProviderError::Validation(format!("invalid alert channel type {:?}", channel_type))
        })?;

    let mut set: Vec<&String> = config
        .iter()
        .filter(|(key, _)| config.get_ok(key).is_some())
        .map(|(key, _)| key)
        .collect();
    set.sort();

    match set.into_iter().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(ProviderError::Validation(format!(
            "{} is not supported by channel type {}",
            key, channel_type
        ))),
        None => Ok(()),
    }
}

fn json_object(config: &Map<String, Value>, key: &str) -> Result<Map<String, Value>, ProviderError> {
    match config.get_str(key) {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(ProviderError::Validation(format!(
                "{} must be a JSON object",
                key
            ))),
        },
    }
}

pub fn expand(d: &impl Attributes) -> Result<AlertChannel, ProviderError> {
    let name = required_str(d, "name")?.to_string();
    let channel_type = required_str(d, "type")?.to_string();
    let config = d.single_block("config").ok_or_else(|| {
        ProviderError::Validation("alert channel requires a config block".to_string())
    })?;
    validate_for_type(&channel_type, config)?;

    let configuration = ChannelConfiguration {
        api_key: config.string("api_key"),
        auth_password: config.string("auth_password"),
        auth_type: config.string("auth_type"),
        auth_username: config.string("auth_username"),
        base_url: config.string("base_url"),
        channel: config.string("channel"),
        headers: json_object(config, "headers_string")?,
        include_json_attachment: config.string("include_json_attachment"),
        key: config.string("key"),
        payload: json_object(config, "payload_string")?,
        payload_type: config.string("payload_type"),
        recipients: config.string("recipients"),
        region: config.string("region"),
        route_key: config.string("route_key"),
        service_key: config.string("service_key"),
        tags: config.string("tags"),
        teams: config.string("teams"),
        url: config.string("url"),
        user_id: config.string("user_id"),
    };
    if !configuration.payload.is_empty() && configuration.payload_type.is_empty() {
        return Err(ProviderError::Validation(
            "payload_type is required when using payload".to_string(),
        ));
    }

    Ok(AlertChannel {
        name,
        channel_type,
        configuration,
        ..Default::default()
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// A JSON-valued config field: the configured text wins while it still
/// describes the server's object.
fn flatten_json(configured: Option<&str>, server: &Map<String, Value>) -> Option<String> {
    if let Some(raw) = configured {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) if &map == server => return Some(raw.to_string()),
            _ => {}
        }
    }
    if server.is_empty() {
        None
    } else {
        Some(Value::Object(server.clone()).to_string())
    }
}

pub fn flatten(channel: &AlertChannel, d: &mut ResourceData) {
    let configured = d.single_block("config").cloned().unwrap_or_default();
    let c = &channel.configuration;

    let mut config = Map::new();
    let mut put = |key: &str, value: &str| {
        if !value.is_empty() {
            config.insert(key.to_string(), json!(value));
        }
    };
    put("auth_type", &c.auth_type);
    put("auth_username", &c.auth_username);
    put("base_url", &c.base_url);
    put("channel", &c.channel);
    put("payload_type", &c.payload_type);
    put("recipients", &c.recipients);
    put("region", &c.region);
    put("route_key", &c.route_key);
    put("tags", &c.tags);
    put("teams", &c.teams);
    put("user_id", &c.user_id);

    // "1" and "true" are the same flag; keep the configured spelling.
    let server_flag = parse_flag(&c.include_json_attachment);
    let attachment = match configured.get_str("include_json_attachment") {
        Some(raw) if server_flag.is_some() && parse_flag(raw) == server_flag => raw,
        _ => c.include_json_attachment.as_str(),
    };
    put("include_json_attachment", attachment);

    for key in SECRET_FIELDS {
        let server = match key {
            "api_key" => &c.api_key,
            "auth_password" => &c.auth_password,
            "key" => &c.key,
            "service_key" => &c.service_key,
            _ => &c.url,
        };
        let value = if server.is_empty() {
            configured.string(key)
        } else {
            server.clone()
        };
        put(key, &value);
    }

    for (key, server) in [("headers_string", &c.headers), ("payload_string", &c.payload)] {
        if let Some(value) = flatten_json(configured.get_str(key), server) {
            config.insert(key.to_string(), json!(value));
        }
    }

    d.set("name", channel.name.as_str());
    d.set("type", channel.channel_type.as_str());
    d.set_block("config", config);
}

fn channel_id(d: &ResourceData) -> Result<i64, ProviderError> {
    Ok(parse_ids(d.require_id(NAME)?, 1)?[0])
}

pub async fn create(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let channel = expand(&d)?;

    info!(name = %channel.name, channel_type = %channel.channel_type, "creating alert channel");
    let created = ctx.api.create_channel(channel).await?;
    d.set_id(created.id.to_string());
    if let Some(account_id) = ctx.config.select_account_id(d.get_i64("account_id")) {
        d.set("account_id", account_id);
    }

    read(ctx, d).await
}

pub async fn read(ctx: &Context<'_>, mut d: ResourceData) -> Result<ResourceData, ProviderError> {
    let id = channel_id(&d)?;

    let result = ctx.api.get_channel(id).await;
    if let Some(channel) = found(result, &mut d)? {
        flatten(&channel, &mut d);
    }
    Ok(d)
}

pub async fn delete(ctx: &Context<'_>, d: &ResourceData) -> Result<(), ProviderError> {
    let id = channel_id(d)?;

    info!(channel_id = id, "deleting alert channel");
    ctx.api.delete_channel(id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AlertsApi, MemoryClient};
    use crate::config::ProviderConfig;
    use crate::validation::validate;
    use tokio_util::sync::CancellationToken;

    fn data(value: Value) -> ResourceData {
        ResourceData::from_value(value).unwrap()
    }

    fn validation_message(value: Value) -> String {
        match expand(&data(value)) {
            Err(ProviderError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    fn webhook() -> Value {
        json!({
            "name": "deploys",
            "type": "webhook",
            "config": [{
                "base_url": "https://hooks.example.com/alerts",
                "auth_username": "nr",
                "auth_password": "hunter2",
                "payload_type": "application/json",
                "payload_string": "{\"condition\": \"$CONDITION_NAME\"}",
            }],
        })
    }

    #[test]
    fn test_schema_requires_config() {
        assert!(validate(&schema(), &webhook()).is_empty());
        let diagnostics = validate(&schema(), &json!({"name": "n", "type": "email"}));
        assert!(diagnostics.iter().any(|d| d.is_error()), "{:?}", diagnostics);
    }

    #[test]
    fn test_expand_webhook_parses_json_fields() {
        let channel = expand(&data(webhook())).unwrap();
        assert_eq!(channel.channel_type, "webhook");
        assert_eq!(
            channel.configuration.payload.get("condition"),
            Some(&json!("$CONDITION_NAME"))
        );
        assert!(channel.configuration.headers.is_empty());
    }

    #[test]
    fn test_field_of_another_type_is_rejected() {
        let value = json!({
            "name": "oncall",
            "type": "slack",
            "config": [{"url": "https://hooks.slack.com/x", "service_key": "abc"}],
        });
        assert_eq!(
            validation_message(value),
            "service_key is not supported by channel type slack"
        );
    }

    #[test]
    fn test_payload_requires_payload_type() {
        let mut value = webhook();
        value["config"][0]
            .as_object_mut()
            .unwrap()
            .remove("payload_type");
        assert_eq!(
            validation_message(value),
            "payload_type is required when using payload"
        );
    }

    #[test]
    fn test_payload_must_be_an_object() {
        let mut value = webhook();
        value["config"][0]["payload_string"] = json!("[1, 2]");
        assert_eq!(validation_message(value), "payload_string must be a JSON object");
    }

    #[test]
    fn test_flatten_keeps_configured_secrets_and_json_text() {
        let channel = AlertChannel {
            id: 9,
            name: "deploys".to_string(),
            channel_type: "webhook".to_string(),
            configuration: ChannelConfiguration {
                base_url: "https://hooks.example.com/alerts".to_string(),
                auth_username: "nr".to_string(),
                payload_type: "application/json".to_string(),
                payload: json!({"condition": "$CONDITION_NAME"})
                    .as_object()
                    .cloned()
                    .unwrap(),
                ..Default::default()
            },
            ..Default::default()
        };

        let mut d = data(webhook());
        d.set_id("9");
        flatten(&channel, &mut d);
        let state = d.into_state();
        let config = &state["config"][0];

        assert_eq!(config["auth_password"], "hunter2");
        assert_eq!(
            config["payload_string"],
            "{\"condition\": \"$CONDITION_NAME\"}"
        );
        assert!(config.get("headers_string").is_none());
    }

    #[test]
    fn test_flatten_keeps_equivalent_attachment_flag() {
        let channel = AlertChannel {
            id: 3,
            name: "ops".to_string(),
            channel_type: "email".to_string(),
            configuration: ChannelConfiguration {
                recipients: "ops@example.com".to_string(),
                include_json_attachment: "true".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut d = data(json!({
            "id": "3",
            "config": [{"recipients": "ops@example.com", "include_json_attachment": "1"}],
        }));
        flatten(&channel, &mut d);
        assert_eq!(d.into_state()["config"][0]["include_json_attachment"], "1");
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let client = MemoryClient::new();
        let config = ProviderConfig::from_value_with_env(
            &json!({"api_key": "k", "account_id": 1}),
            |_| None,
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let ctx = Context::new(&client, &config, &cancel);

        let d = create(&ctx, data(webhook())).await.unwrap();
        let id = channel_id(&d).unwrap();
        assert_eq!(d.get_i64("account_id"), Some(1));
        let config = d.single_block("config").unwrap();
        assert_eq!(config.get_str("auth_password"), Some("hunter2"));

        delete(&ctx, &d).await.unwrap();
        let d = read(&ctx, d).await.unwrap();
        assert!(d.id().is_none());
        assert!(client.get_channel(id).await.unwrap_err().is_not_found());
    }
}
