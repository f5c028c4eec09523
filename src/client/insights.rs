//! Custom events sent to the Insights insert API.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// One custom event.
///
/// On the wire an event is a flat JSON object: `eventType`, an optional
/// `timestamp`, then one key per attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightsEvent {
    pub event_type: String,
    pub timestamp: Option<i64>,
    pub attributes: Vec<(String, Value)>,
}

impl InsightsEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.push((key.into(), value));
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

impl Serialize for InsightsEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 1 + usize::from(self.timestamp.is_some()) + self.attributes.len();
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("eventType", &self.event_type)?;
        if let Some(timestamp) = self.timestamp {
            map.serialize_entry("timestamp", &timestamp)?;
        }
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
