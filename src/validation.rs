//! Schema validation.
//!
//! Validates a configuration `serde_json::Value` against a [`Schema`]: shape,
//! types, presence of required attributes, block cardinality and the value
//! [`Constraint`]s attached to attributes.
//!
//! # Example
//!
//! ```
//! use newrelic_provider::schema::{Schema, Attribute};
//! use newrelic_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("duration", Attribute::optional_int64().int_between(5, 120));
//!
//! assert!(validate(&schema, &json!({"name": "cpu", "duration": 10})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "cpu", "duration": 1}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("duration".to_string()));
//! ```

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Constraint, Diagnostic, NestedBlock, Schema,
};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Attribute types must match the schema
/// - Attribute constraints must hold for every present value
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value)))
                    .with_attribute_if_not_empty(path),
            );
            return;
        }
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        }
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() == before {
                validate_constraints(&attr.constraints, v, path, diagnostics);
            }
        }
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        }
        AttributeType::Float64 => {
            if !value.is_number() {
                diagnostics.push(type_error(path, "float64", value));
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        }
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                let expected = if matches!(attr_type, AttributeType::List(_)) {
                    "list"
                } else {
                    "set"
                };
                diagnostics.push(type_error(path, expected, value));
            }
        }
    }
}

/// Constraints on collection attributes apply to each element.
fn validate_constraints(
    constraints: &[Constraint],
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if let Value::Array(items) = value {
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{}.{}", path, i);
            validate_constraints(constraints, item, &item_path, diagnostics);
        }
        return;
    }

    for constraint in constraints {
        if let Some(detail) = check_constraint(constraint, value) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                    .with_detail(detail)
                    .with_attribute(path),
            );
        }
    }
}

/// Returns a description of the violation, or `None` when the value passes.
fn check_constraint(constraint: &Constraint, value: &Value) -> Option<String> {
    match constraint {
        Constraint::OneOf {
            values,
            ignore_case,
        } => {
            let matched = values.iter().any(|allowed| match (allowed, value) {
                (Value::String(a), Value::String(v)) if *ignore_case => a.eq_ignore_ascii_case(v),
                (Value::Number(a), Value::Number(v)) => a.as_f64() == v.as_f64(),
                (a, v) => a == v,
            });
            if matched {
                None
            } else {
                let allowed: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                Some(format!(
                    "expected one of [{}], got {}",
                    allowed.join(", "),
                    value
                ))
            }
        }
        Constraint::IntBetween { min, max } => {
            let n = value.as_f64()?;
            if n < *min as f64 || n > *max as f64 {
                Some(format!("expected a value between {} and {}, got {}", min, max, value))
            } else {
                None
            }
        }
        Constraint::FloatAtLeast { min } => {
            let n = value.as_f64()?;
            if n < *min {
                Some(format!("expected a value of at least {}, got {}", min, value))
            } else {
                None
            }
        }
        Constraint::LengthBetween { min, max } => {
            let len = value.as_str()?.chars().count();
            if len < *min || len > *max {
                Some(format!(
                    "expected length between {} and {}, got {}",
                    min, max, len
                ))
            } else {
                None
            }
        }
        Constraint::Charset { extra } => {
            let s = value.as_str()?;
            if s.is_empty() {
                return Some("must not be empty".to_string());
            }
            match s
                .chars()
                .find(|c| !c.is_ascii_alphanumeric() && !extra.contains(*c))
            {
                Some(bad) => Some(format!("character {:?} is not allowed", bad)),
                None => None,
            }
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match nested.nesting_mode {
        BlockNestingMode::Single => validate_single_block(nested, value, path, diagnostics),
        BlockNestingMode::List | BlockNestingMode::Set => {
            validate_list_block(nested, value, path, diagnostics)
        }
    }
}

/// Single blocks arrive as one-element arrays; a bare object is accepted too.
fn validate_single_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        Some(Value::Array(arr)) if arr.len() > 1 => {
            diagnostics.push(
                Diagnostic::error(format!(
                    "Block '{}' allows at most 1 item(s), got {}",
                    path,
                    arr.len()
                ))
                .with_attribute(path),
            );
        }
        Some(Value::Array(arr)) if arr.len() == 1 => {
            validate_block(&nested.block, &arr[0], path, diagnostics);
        }
        Some(v @ Value::Object(_)) => validate_block(&nested.block, v, path, diagnostics),
        None | Some(Value::Null) | Some(Value::Array(_)) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        }
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        }
    }
}

fn validate_list_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        }
        Some(Value::Array(arr)) => {
            let len = arr.len() as u32;

            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // 0 means unlimited
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        }
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        }
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        }
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

trait DiagnosticExt {
    fn with_attribute_if_not_empty(self, path: &str) -> Self;
}

impl DiagnosticExt for Diagnostic {
    fn with_attribute_if_not_empty(self, path: &str) -> Self {
        if path.is_empty() {
            self
        } else {
            self.with_attribute(path)
        }
    }
}
