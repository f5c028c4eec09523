//! Typed access to a resource's configuration snapshot.
//!
//! The host sends configuration and state as JSON objects. Single nested
//! blocks are one-element arrays, repeated blocks and sets are arrays, and
//! the resource ID lives under `id`.
//!
//! Two notions of presence are used by the mappers:
//!
//! - [`Attributes::get`]: the key exists and is not `null`.
//! - [`Attributes::get_ok`]: the key exists and holds a non-zero value
//!   (`""`, `0`, `false` and empty collections count as unset).

use serde_json::{Map, Value};

use crate::error::ProviderError;

/// Key under which the resource ID is stored.
pub const ID_KEY: &str = "id";

/// Read accessors shared by the root snapshot and nested blocks.
pub trait Attributes {
    /// Raw access to a key.
    fn raw(&self, key: &str) -> Option<&Value>;

    /// The value when present and non-null.
    fn get(&self, key: &str) -> Option<&Value> {
        self.raw(key).filter(|v| !v.is_null())
    }

    /// The value when present and not the zero value of its type.
    fn get_ok(&self, key: &str) -> Option<&Value> {
        self.get(key).filter(|v| !is_zero(v))
    }

    /// Non-empty string value.
    fn get_str(&self, key: &str) -> Option<&str> {
        self.get_ok(key).and_then(Value::as_str)
    }

    /// String value, empty when unset.
    fn string(&self, key: &str) -> String {
        self.get_str(key).unwrap_or_default().to_string()
    }

    /// Integer value when present (zero included).
    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(as_i64)
    }

    /// Non-zero integer value.
    fn get_i64_ok(&self, key: &str) -> Option<i64> {
        self.get_i64(key).filter(|v| *v != 0)
    }

    /// Float value when present (zero included).
    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Bool value when present (`false` included).
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// The only element of a single nested block.
    fn single_block(&self, key: &str) -> Option<&Map<String, Value>> {
        match self.get(key)? {
            Value::Array(items) => items.first().and_then(Value::as_object),
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Every element of a repeated block, in the order received.
    fn blocks(&self, key: &str) -> Vec<&Map<String, Value>> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            _ => Vec::new(),
        }
    }

    /// String elements of a list or set attribute.
    fn strings(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Integer elements of a list or set attribute.
    fn ints(&self, key: &str) -> Vec<i64> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(as_i64).collect(),
            _ => Vec::new(),
        }
    }
}

impl Attributes for Map<String, Value> {
    fn raw(&self, key: &str) -> Option<&Value> {
        Map::get(self, key)
    }
}

/// The configuration snapshot of one resource for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceData {
    values: Map<String, Value>,
}

impl Attributes for ResourceData {
    fn raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

impl ResourceData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a state or configuration document. `null` yields an empty snapshot.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            other => Err(ProviderError::Validation(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// The resource ID, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_KEY)
    }

    /// The resource ID, or a validation error naming `resource`.
    pub fn require_id(&self, resource: &str) -> Result<&str, ProviderError> {
        self.id().ok_or_else(|| {
            ProviderError::Validation(format!("{} state has no ID", resource))
        })
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.values.insert(ID_KEY.to_string(), Value::String(id.into()));
    }

    /// Forget the resource; the host drops it from state.
    pub fn clear_id(&mut self) {
        self.values.remove(ID_KEY);
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Write a single nested block as a one-element array.
    pub fn set_block(&mut self, key: &str, block: Map<String, Value>) {
        self.set(key, Value::Array(vec![Value::Object(block)]));
    }

    /// Write `value` only when `key` was already configured.
    pub fn set_if_configured(&mut self, key: &str, value: impl Into<Value>) {
        if self.get(key).is_some() {
            self.set(key, value);
        }
    }

    /// Write a string the server may leave empty; empty removes the key.
    pub fn set_optional_str(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.values.remove(key);
        } else {
            self.set(key, value);
        }
    }

    /// Write an integer the server may leave at zero; zero removes the key.
    pub fn set_optional_i64(&mut self, key: &str, value: i64) {
        if value == 0 {
            self.values.remove(key);
        } else {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Final state document; a cleared ID yields `null`.
    pub fn into_state(self) -> Value {
        if self.id().is_none() {
            Value::Null
        } else {
            Value::Object(self.values)
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

/// Build a nested block from key/value pairs.
pub fn block<I, K>(fields: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

fn as_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}
