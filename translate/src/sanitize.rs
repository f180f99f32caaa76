//! JSON Schema sanitizer.
//!
//! The upstream validator accepts a restricted schema dialect: no
//! composition, no references, no numeric/string constraints, and no empty
//! object schemas. Client tools arrive with the full JSON Schema vocabulary,
//! so every declaration is rewritten through four phases before it goes on
//! the wire:
//!
//! 1. lossless normalization (`const` to `enum`, type arrays to a single
//!    type with the original recorded in the description),
//! 2. composition flattening (`allOf` deep-merged, `anyOf`/`oneOf` replaced
//!    by the widest branch),
//! 3. constraint hoisting (scalar constraints preserved as description
//!    prose),
//! 4. stripping of everything else the validator rejects.
//!
//! Sanitizing an already-sanitized schema is a no-op: each phase only fires
//! on keys a previous pass deletes.

use serde_json::{Map, Value, json};

/// Description given to the synthetic property injected into empty object
/// schemas (the validator rejects `"type": "object"` without properties).
const PLACEHOLDER_DESCRIPTION: &str = "Unused placeholder field; always omit or pass false.";

/// Constraints hoisted into the description in phase 3 and deleted in
/// phase 4 either way.
const HOISTED_CONSTRAINTS: &[&str] = &[
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "pattern",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
    "format",
    "default",
    "examples",
];

/// Keywords the validator rejects outright.
const STRIPPED_KEYWORDS: &[&str] = &[
    "$schema",
    "$defs",
    "definitions",
    "$ref",
    "$id",
    "$comment",
    "title",
    "propertyNames",
    "additionalProperties",
    "if",
    "then",
    "else",
    "not",
    "dependentSchemas",
    "dependentRequired",
];

/// Rewrite a client schema into the restricted upstream dialect.
#[must_use]
pub fn sanitize_schema(schema: &Value) -> Value {
    let mut out = schema.clone();
    sanitize_node(&mut out);
    out
}

fn sanitize_node(node: &mut Value) {
    let Some(obj) = node.as_object_mut() else {
        return;
    };

    normalize(obj);
    flatten_composition(obj);
    hoist_constraints(obj);
    strip(obj);

    // Recurse into subschemas.
    if let Some(properties) = obj.get_mut("properties").and_then(Value::as_object_mut) {
        for child in properties.values_mut() {
            sanitize_node(child);
        }
    }
    if let Some(items) = obj.get_mut("items") {
        match items {
            Value::Array(entries) => {
                for entry in entries {
                    sanitize_node(entry);
                }
            }
            other => sanitize_node(other),
        }
    }

    ensure_object_not_empty(obj);
}

/// Phase 1: lossless rewrites.
fn normalize(obj: &mut Map<String, Value>) {
    if let Some(constant) = obj.remove("const")
        && !obj.contains_key("enum")
    {
        obj.insert("enum".to_string(), Value::Array(vec![constant]));
    }

    if let Some(Value::Array(types)) = obj.get("type").cloned() {
        let nullable = types.iter().any(|t| t.as_str() == Some("null"));
        let first = types
            .iter()
            .find(|t| t.as_str() != Some("null"))
            .cloned()
            .unwrap_or(Value::String("string".to_string()));

        let listed = types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        append_description(obj, &format!("type was one of: {listed}"));
        if nullable {
            append_description(obj, "nullable");
        }
        obj.insert("type".to_string(), first);
    }
}

/// Phase 2: composition flattening.
fn flatten_composition(obj: &mut Map<String, Value>) {
    if let Some(Value::Array(branches)) = obj.remove("allOf") {
        for branch in branches {
            if let Value::Object(branch) = branch {
                merge_first_wins(obj, branch);
            }
        }
        append_description(obj, "allOf flattened");
    }

    for key in ["anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = obj.remove(key) {
            let widest = branches
                .into_iter()
                .filter_map(|b| match b {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .max_by_key(Map::len);
            if let Some(widest) = widest {
                merge_first_wins(obj, widest);
            }
            append_description(obj, &format!("{key} flattened"));
        }
    }
}

/// Merge `branch` into `target`: `properties` maps merge per-key, all other
/// keys keep whatever `target` already had.
fn merge_first_wins(target: &mut Map<String, Value>, branch: Map<String, Value>) {
    for (key, value) in branch {
        if key == "properties" {
            let slot = target
                .entry("properties")
                .or_insert_with(|| json!({}));
            if let (Some(existing), Value::Object(incoming)) = (slot.as_object_mut(), value) {
                for (name, schema) in incoming {
                    existing.entry(name).or_insert(schema);
                }
            }
        } else {
            target.entry(key).or_insert(value);
        }
    }
}

/// Phase 3: constraints the dialect cannot express become prose.
fn hoist_constraints(obj: &mut Map<String, Value>) {
    for key in HOISTED_CONSTRAINTS {
        let is_scalar = obj
            .get(*key)
            .is_some_and(|v| !v.is_object() && !v.is_array());
        if is_scalar {
            let value = obj.remove(*key).unwrap_or(Value::Null);
            let rendered = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            append_description(obj, &format!("{key}: {rendered}"));
        }
    }
}

/// Phase 4: delete everything the validator rejects, including non-scalar
/// leftovers from the constraint list.
fn strip(obj: &mut Map<String, Value>) {
    for key in STRIPPED_KEYWORDS {
        obj.remove(*key);
    }
    for key in HOISTED_CONSTRAINTS {
        obj.remove(*key);
    }
}

/// The validator rejects object schemas without properties; give them a
/// synthetic boolean.
fn ensure_object_not_empty(obj: &mut Map<String, Value>) {
    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return;
    }
    let needs_placeholder = obj
        .get("properties")
        .and_then(Value::as_object)
        .is_none_or(Map::is_empty);
    if needs_placeholder {
        obj.insert(
            "properties".to_string(),
            json!({
                "_placeholder": {
                    "type": "boolean",
                    "description": PLACEHOLDER_DESCRIPTION,
                }
            }),
        );
    }
}

fn append_description(obj: &mut Map<String, Value>, note: &str) {
    let existing = obj.get("description").and_then(Value::as_str).unwrap_or("");
    let combined = if existing.is_empty() {
        note.to_string()
    } else {
        format!("{existing}; {note}")
    };
    obj.insert("description".to_string(), Value::String(combined));
}
