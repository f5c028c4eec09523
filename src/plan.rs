//! Plan computation.
//!
//! A plan compares the prior state with the proposed configuration of one
//! resource. The planned state is the proposed configuration with schema
//! defaults filled in and computed attributes carried over from the prior
//! state. Changes are reported per attribute path; a change to a force-new
//! attribute or block means the resource must be replaced.

use serde_json::{Map, Value};

use crate::schema::{AttributeType, Block, BlockNestingMode, NestedBlock, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Compute the plan for one resource.
///
/// `proposed` is `null` when the resource is being destroyed.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: Value) -> PlanResult {
    let prior = prior.filter(|v| !v.is_null());

    if proposed.is_null() {
        let changes = match prior {
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        };
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let mut planned = apply_defaults(&schema.block, proposed);
    if let (Some(Value::Object(prior_map)), Value::Object(planned_map)) = (prior, &mut planned) {
        carry_computed(&schema.block, prior_map, planned_map);
    }

    let Some(prior) = prior else {
        let changes = match &planned {
            Value::Object(map) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| AttributeChange::added(k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        };
        return PlanResult::with_changes(planned, changes, false);
    };

    let mut changes = Vec::new();
    diff_block(
        &schema.block,
        "",
        prior.as_object(),
        planned.as_object(),
        &mut changes,
    );
    if changes.is_empty() {
        return PlanResult::no_change(planned);
    }

    let requires_replace = changes
        .iter()
        .any(|c| forces_replacement(&schema.block, &c.path));
    PlanResult::with_changes(planned, changes, requires_replace)
}

/// Fill in schema defaults for absent attributes, recursing into nested blocks.
pub fn apply_defaults(block: &Block, value: Value) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };

    for (name, attr) in &block.attributes {
        let Some(default) = &attr.default else {
            continue;
        };
        if map.get(name).map_or(true, Value::is_null) {
            map.insert(name.clone(), default.clone());
        }
    }

    for (name, nested) in &block.blocks {
        if let Some(items) = map.remove(name) {
            map.insert(name.clone(), apply_block_defaults(nested, items));
        }
    }

    Value::Object(map)
}

fn apply_block_defaults(nested: &NestedBlock, items: Value) -> Value {
    match items {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| apply_defaults(&nested.block, item))
                .collect(),
        ),
        Value::Object(_) => apply_defaults(&nested.block, items),
        other => other,
    }
}

/// Keep provider-computed values the configuration leaves unset.
fn carry_computed(block: &Block, prior: &Map<String, Value>, planned: &mut Map<String, Value>) {
    for (name, value) in prior {
        if value.is_null() || planned.get(name).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let computed = match block.attributes.get(name) {
            Some(attr) => attr.flags.computed,
            // `id` and other bookkeeping keys are not part of the schema.
            None => !block.blocks.contains_key(name),
        };
        if computed {
            planned.insert(name.clone(), value.clone());
        }
    }

    for (name, nested) in &block.blocks {
        if nested.nesting_mode == BlockNestingMode::Set {
            continue;
        }
        let (Some(Value::Array(before)), Some(Value::Array(after))) =
            (prior.get(name), planned.get_mut(name))
        else {
            continue;
        };
        if before.len() != after.len() {
            continue;
        }
        for (before, after) in before.iter().zip(after.iter_mut()) {
            if let (Value::Object(before), Value::Object(after)) = (before, after) {
                carry_computed(&nested.block, before, after);
            }
        }
    }
}

fn diff_block(
    block: &Block,
    path: &str,
    before: Option<&Map<String, Value>>,
    after: Option<&Map<String, Value>>,
    changes: &mut Vec<AttributeChange>,
) {
    let empty = Map::new();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);

    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let key_path = join_path(path, key);
        let old = before.get(key).filter(|v| !v.is_null());
        let new = after.get(key).filter(|v| !v.is_null());

        if let Some(nested) = block.blocks.get(key) {
            diff_nested(nested, &key_path, old, new, changes);
            continue;
        }

        let equal = match (old, new, block.attributes.get(key)) {
            (Some(a), Some(b), Some(attr)) => {
                values_equal(&attr.attr_type, attr.ignores_case(), a, b)
            }
            _ => old == new,
        };
        if !equal {
            changes.push(AttributeChange::new(key_path, old.cloned(), new.cloned()));
        }
    }
}

fn diff_nested(
    nested: &NestedBlock,
    path: &str,
    old: Option<&Value>,
    new: Option<&Value>,
    changes: &mut Vec<AttributeChange>,
) {
    let old_items = as_items(old);
    let new_items = as_items(new);

    match nested.nesting_mode {
        BlockNestingMode::Set => {
            if !same_elements_by(&old_items, &new_items, |a, b| {
                blocks_equal(&nested.block, a, b)
            }) {
                changes.push(AttributeChange::new(path, old.cloned(), new.cloned()));
            }
        }
        BlockNestingMode::Single | BlockNestingMode::List => {
            if old_items.len() != new_items.len() {
                changes.push(AttributeChange::new(path, old.cloned(), new.cloned()));
                return;
            }
            for (index, (before, after)) in old_items.iter().zip(&new_items).enumerate() {
                diff_block(
                    &nested.block,
                    &format!("{}.{}", path, index),
                    before.as_object(),
                    after.as_object(),
                    changes,
                );
            }
        }
    }
}

fn as_items(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(obj @ Value::Object(_)) => vec![obj.clone()],
        _ => Vec::new(),
    }
}

/// Order-independent comparison for sets.
fn same_elements_by<F>(a: &[Value], b: &[Value], eq: F) -> bool
where
    F: Fn(&Value, &Value) -> bool,
{
    a.len() == b.len()
        && a.iter().all(|x| b.iter().any(|y| eq(x, y)))
        && b.iter().all(|y| a.iter().any(|x| eq(x, y)))
}

/// Compare two attribute values the way the schema types them.
///
/// Floats compare numerically, so `90` and `90.0` are the same threshold.
fn values_equal(attr_type: &AttributeType, ignore_case: bool, a: &Value, b: &Value) -> bool {
    match (attr_type, a, b) {
        (AttributeType::String, Value::String(a), Value::String(b)) if ignore_case => {
            a.eq_ignore_ascii_case(b)
        }
        (AttributeType::Float64, Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (AttributeType::Set(element), Value::Array(a), Value::Array(b)) => {
            same_elements_by(a, b, |x, y| values_equal(element, false, x, y))
        }
        (AttributeType::List(element), Value::Array(a), Value::Array(b)) => {
            a.len() == b.len()
                && a.iter().zip(b).all(|(x, y)| values_equal(element, false, x, y))
        }
        _ => a == b,
    }
}

/// Schema-aware equality of two nested block elements.
fn blocks_equal(block: &Block, a: &Value, b: &Value) -> bool {
    let (Some(a), Some(b)) = (a.as_object(), b.as_object()) else {
        return a == b;
    };

    a.keys().chain(b.keys()).all(|key| {
        let old = a.get(key).filter(|v| !v.is_null());
        let new = b.get(key).filter(|v| !v.is_null());
        match (old, new) {
            (None, None) => true,
            (Some(x), Some(y)) => {
                if let Some(nested) = block.blocks.get(key) {
                    nested_equal(nested, x, y)
                } else if let Some(attr) = block.attributes.get(key) {
                    values_equal(&attr.attr_type, attr.ignores_case(), x, y)
                } else {
                    x == y
                }
            }
            _ => false,
        }
    })
}

fn nested_equal(nested: &NestedBlock, a: &Value, b: &Value) -> bool {
    let a = as_items(Some(a));
    let b = as_items(Some(b));
    match nested.nesting_mode {
        BlockNestingMode::Set => same_elements_by(&a, &b, |x, y| blocks_equal(&nested.block, x, y)),
        BlockNestingMode::Single | BlockNestingMode::List => {
            a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| blocks_equal(&nested.block, x, y))
        }
    }
}

/// Whether a change at `path` (dotted, with list indices) requires replacement.
fn forces_replacement(block: &Block, path: &str) -> bool {
    let mut current = block;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if let Some(attr) = current.attributes.get(segment) {
            return attr.force_new;
        }
        let Some(nested) = current.blocks.get(segment) else {
            return false;
        };
        if nested.force_new {
            return true;
        }
        // Skip the element index.
        if segments.peek().is_some_and(|s| s.parse::<usize>().is_ok()) {
            segments.next();
        }
        if segments.peek().is_none() {
            // Whole-block change: replace if any inner attribute forces it.
            return nested.block.attributes.values().any(|a| a.force_new);
        }
        current = &nested.block;
    }
    false
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("policy_id", Attribute::required_int64().with_force_new())
            .with_attribute(
                "enabled",
                Attribute::optional_bool().with_default(json!(true)),
            )
            .with_attribute(
                "type",
                Attribute::required_string()
                    .with_force_new()
                    .one_of_ignore_case(&["infra_metric"]),
            )
            .with_attribute("entities", Attribute::optional_set(AttributeType::Int64))
            .with_attribute("created_at", Attribute::computed_int64())
            .with_block(
                "critical",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("duration", Attribute::required_int64())
                        .with_attribute(
                            "time_function",
                            Attribute::optional_string().with_default(json!("all")),
                        ),
                ),
            )
            .with_block(
                "warning",
                NestedBlock::single(
                    Block::new().with_attribute("duration", Attribute::required_int64()),
                )
                .with_force_new(),
            )
    }

    fn prior() -> Value {
        json!({
            "id": "1:2",
            "name": "cpu",
            "policy_id": 1,
            "enabled": true,
            "type": "infra_metric",
            "entities": [1, 2],
            "created_at": 1600000000,
            "critical": [{"duration": 5, "time_function": "all"}],
        })
    }

    #[test]
    fn test_create_plan_applies_defaults() {
        let result = plan(
            &schema(),
            None,
            json!({"name": "cpu", "policy_id": 1, "type": "infra_metric", "critical": [{"duration": 5}]}),
        );

        assert_eq!(result.planned_state["enabled"], json!(true));
        assert_eq!(result.planned_state["critical"][0]["time_function"], "all");
        assert!(result.changes_attribute("name"));
        assert!(!result.requires_replace);
    }

    #[test]
    fn test_no_change_keeps_computed() {
        let mut proposed = prior();
        if let Value::Object(map) = &mut proposed {
            map.remove("id");
            map.remove("created_at");
        }
        let prior = prior();
        let result = plan(&schema(), Some(&prior), proposed);

        assert!(result.changes.is_empty(), "{:?}", result.changes);
        assert_eq!(result.planned_state["id"], "1:2");
        assert_eq!(result.planned_state["created_at"], 1600000000);
    }

    #[test]
    fn test_in_place_update() {
        let prior = prior();
        let mut proposed = prior.clone();
        proposed["critical"] = json!([{"duration": 10}]);
        let result = plan(&schema(), Some(&prior), proposed);

        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "critical.0.duration");
        assert!(!result.requires_replace);
    }

    #[test]
    fn test_force_new_attribute_requires_replace() {
        let prior = prior();
        let mut proposed = prior.clone();
        proposed["policy_id"] = json!(7);
        let result = plan(&schema(), Some(&prior), proposed);

        assert!(result.changes_attribute("policy_id"));
        assert!(result.requires_replace);
    }

    #[test]
    fn test_force_new_block_requires_replace() {
        let prior = prior();
        let mut proposed = prior.clone();
        proposed["warning"] = json!([{"duration": 5}]);
        let result = plan(&schema(), Some(&prior), proposed);

        assert!(result.changes_attribute("warning"));
        assert!(result.requires_replace);
    }

    #[test]
    fn test_case_insensitive_and_set_comparisons() {
        let prior = prior();
        let mut proposed = prior.clone();
        proposed["type"] = json!("INFRA_METRIC");
        proposed["entities"] = json!([2, 1]);
        let result = plan(&schema(), Some(&prior), proposed);

        assert!(result.changes.is_empty(), "{:?}", result.changes);
    }

    fn tagged_schema() -> Schema {
        Schema::v0()
            .with_block(
                "term",
                NestedBlock::set(
                    Block::new()
                        .with_attribute("priority", Attribute::required_string())
                        .with_attribute("threshold", Attribute::required_float64()),
                ),
            )
            .with_block(
                "tag",
                NestedBlock::set(
                    Block::new()
                        .with_attribute("key", Attribute::required_string())
                        .with_attribute("values", Attribute::required_set(AttributeType::String)),
                ),
            )
            .with_block(
                "critical",
                NestedBlock::single(
                    Block::new().with_attribute("value", Attribute::optional_float64()),
                ),
            )
    }

    #[test]
    fn test_integer_literal_matches_float_state() {
        let prior = json!({
            "id": "1:2",
            "term": [{"priority": "critical", "threshold": 1.0}],
            "critical": [{"value": 90.0}],
        });
        let proposed = json!({
            "term": [{"priority": "critical", "threshold": 1}],
            "critical": [{"value": 90}],
        });
        let result = plan(&tagged_schema(), Some(&prior), proposed);
        assert!(result.changes.is_empty(), "{:?}", result.changes);

        let changed = json!({
            "term": [{"priority": "critical", "threshold": 2}],
            "critical": [{"value": 90}],
        });
        let result = plan(&tagged_schema(), Some(&prior), changed);
        assert!(result.changes_attribute("term"));
    }

    #[test]
    fn test_set_inside_set_block_ignores_order() {
        let prior = json!({
            "id": "guid",
            "tag": [
                {"key": "team", "values": ["core", "sre"]},
                {"key": "env", "values": ["prod"]},
            ],
        });
        let proposed = json!({
            "tag": [
                {"key": "env", "values": ["prod"]},
                {"key": "team", "values": ["sre", "core"]},
            ],
        });
        let result = plan(&tagged_schema(), Some(&prior), proposed);
        assert!(result.changes.is_empty(), "{:?}", result.changes);

        let dropped = json!({"tag": [{"key": "team", "values": ["sre"]}, {"key": "env", "values": ["prod"]}]});
        let result = plan(&tagged_schema(), Some(&prior), dropped);
        assert!(result.changes_attribute("tag"));
    }

    #[test]
    fn test_computed_inside_single_block_is_kept() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_block(
                "nrql",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("query", Attribute::required_string())
                        .with_attribute(
                            "data_account_id",
                            Attribute::optional_int64().with_computed(),
                        ),
                ),
            );
        let prior = json!({
            "id": "1:2",
            "name": "errors",
            "nrql": [{"query": "SELECT count(*) FROM Transaction", "data_account_id": 1}],
        });

        let result = plan(
            &schema,
            Some(&prior),
            json!({
                "name": "errors",
                "nrql": [{"query": "SELECT count(*) FROM Transaction"}],
            }),
        );
        assert!(result.changes.is_empty(), "{:?}", result.changes);
        assert_eq!(result.planned_state["nrql"][0]["data_account_id"], 1);

        let result = plan(
            &schema,
            Some(&prior),
            json!({
                "name": "errors",
                "nrql": [{"query": "SELECT max(duration) FROM Transaction"}],
            }),
        );
        assert!(result.changes_attribute("nrql.0.query"));
        assert!(!result.changes_attribute("nrql.0.data_account_id"));
    }

    #[test]
    fn test_destroy_plan() {
        let prior = prior();
        let result = plan(&schema(), Some(&prior), Value::Null);

        assert!(result.planned_state.is_null());
        assert!(result.changes.iter().all(|c| c.after.is_none()));
        assert!(result.changes_attribute("name"));
    }
}
