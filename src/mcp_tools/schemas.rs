//! JSON Schemas for the fixed 18-tool catalog. Names and shapes are part
//! of the wire contract; every schema is `type: object` with an explicit
//! `required` list and `additionalProperties: false`.

use serde_json::{json, Value};

/// Every tool name in catalog order. Used by tests and by
/// `ToolRegistry::bootstrap` to assert full coverage.
pub const TOOL_NAMES: &[&str] = &[
    "list_requirements",
    "get_requirement",
    "search_requirements",
    "list_labels",
    "create_requirement",
    "update_requirement_field",
    "set_requirement_labels",
    "set_requirement_attachments",
    "set_requirement_links",
    "delete_requirement",
    "create_label",
    "update_label",
    "delete_label",
    "link_requirements",
    "list_user_documents",
    "read_user_document",
    "create_user_document",
    "delete_user_document",
];

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

pub fn list_requirements() -> Value {
    object_schema(
        json!({
            "per_page": {"type": "integer", "description": "Page size."},
            "page": {"type": "integer", "description": "1-based page index."},
        }),
        &["per_page"],
    )
}

pub fn get_requirement() -> Value {
    object_schema(
        json!({"rid": {"type": "string", "description": "Requirement identifier, e.g. DEMO1."}}),
        &["rid"],
    )
}

pub fn search_requirements() -> Value {
    object_schema(
        json!({
            "query": {"type": "string", "description": "Full-text search query."},
            "per_page": {"type": "integer"},
        }),
        &["query"],
    )
}

pub fn list_labels() -> Value {
    object_schema(json!({}), &[])
}

pub fn create_requirement() -> Value {
    object_schema(
        json!({
            "title": {"type": "string"},
            "statement": {"type": "string"},
            "labels": {"type": "array", "items": {"type": "string"}},
        }),
        &["title", "statement"],
    )
}

pub fn update_requirement_field() -> Value {
    object_schema(
        json!({
            "rid": {"type": "string"},
            "field": {"type": "string"},
            "value": {"type": "string"},
        }),
        &["rid", "field", "value"],
    )
}

pub fn set_requirement_labels() -> Value {
    object_schema(
        json!({
            "rid": {"type": "string"},
            "labels": {"type": "array", "items": {"type": "string"}},
        }),
        &["rid", "labels"],
    )
}

pub fn set_requirement_attachments() -> Value {
    object_schema(
        json!({
            "rid": {"type": "string"},
            "attachments": {"type": "array", "items": {"type": "string"}},
        }),
        &["rid", "attachments"],
    )
}

pub fn set_requirement_links() -> Value {
    object_schema(
        json!({
            "rid": {"type": "string"},
            "links": {"type": "array", "items": {"type": "string"}},
        }),
        &["rid", "links"],
    )
}

pub fn delete_requirement() -> Value {
    object_schema(json!({"rid": {"type": "string"}}), &["rid"])
}

pub fn create_label() -> Value {
    object_schema(
        json!({
            "name": {"type": "string"},
            "color": {"type": "string"},
        }),
        &["name"],
    )
}

pub fn update_label() -> Value {
    object_schema(
        json!({
            "name": {"type": "string"},
            "color": {"type": "string"},
        }),
        &["name"],
    )
}

pub fn delete_label() -> Value {
    object_schema(json!({"name": {"type": "string"}}), &["name"])
}

pub fn link_requirements() -> Value {
    object_schema(
        json!({
            "source_rid": {"type": "string"},
            "target_rid": {"type": "string"},
            "relation": {"type": "string"},
        }),
        &["source_rid", "target_rid"],
    )
}

pub fn list_user_documents() -> Value {
    object_schema(json!({}), &[])
}

pub fn read_user_document() -> Value {
    object_schema(json!({"name": {"type": "string"}}), &["name"])
}

pub fn create_user_document() -> Value {
    object_schema(
        json!({
            "name": {"type": "string"},
            "content": {"type": "string"},
        }),
        &["name", "content"],
    )
}

pub fn delete_user_document() -> Value {
    object_schema(json!({"name": {"type": "string"}}), &["name"])
}

/// Validate a JSON object against a simple subset of the schema shapes
/// produced above: required keys present, and (when
/// `additionalProperties` is `false`) no keys outside `properties`.
pub fn validate(schema: &Value, arguments: &Value) -> Result<(), String> {
    let obj = arguments
        .as_object()
        .ok_or_else(|| "arguments must be a JSON object".to_string())?;

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for key in required {
            let key = key.as_str().unwrap_or_default();
            if !obj.contains_key(key) {
                return Err(format!("missing required field: {}", key));
            }
        }
    }

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        let allowed: std::collections::HashSet<&str> = schema
            .get("properties")
            .and_then(|v| v.as_object())
            .map(|m| m.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default();
        for key in obj.keys() {
            if !allowed.contains(key.as_str()) {
                return Err(format!("unexpected field: {}", key));
            }
        }
    }

    Ok(())
}
