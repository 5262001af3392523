//! Tool-call argument reconstruction shared across LLM backend adapters.
//!
//! Different wire formats describe the same thing — "call tool X with
//! arguments Y" — differently enough that a single adapter cannot assume
//! one shape. This mirrors the upstream toolkit's `parse_tool_call`
//! brace-counting recovery in `agent.rs`, generalized to the five
//! encodings this runtime's backends are known to emit:
//!
//! 1. a plain JSON object for `arguments`,
//! 2. a JSON-encoded string for `arguments` (`"{\"rid\": \"X\"}"`),
//! 3. streamed deltas keyed by `(id, index)`, concatenated in arrival
//!    order before parsing,
//! 4. a Harmony-style `function_call` entry whose `arguments` field is
//!    itself a JSON string,
//! 5. an SDK `model_dump()` that omits the arguments field entirely when
//!    empty, treated as `{}`.

use crate::run_contract::ToolCallRequest;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

static SHARED_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// One pooled `reqwest::Client` reused by every backend adapter, carried
/// over from the upstream toolkit's connection-pooling helper of the same
/// name — building a new client per request drops keep-alive connections
/// on the floor.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    SHARED_HTTP_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("reqwest client builds with default TLS backend")
    })
}

/// Parse whatever `tool_calls`-shaped value a backend handed back into
/// the canonical [`ToolCallRequest`] list.
///
/// Accepts either a top-level array (encodings 1, 2, 4, 5) or an object
/// with a `deltas` array (encoding 3, used by streaming backends that
/// hand this function the raw accumulated delta list instead of a
/// finished call list).
pub fn parse_tool_calls(value: &Value) -> Vec<ToolCallRequest> {
    if let Some(deltas) = value.get("deltas").and_then(|v| v.as_array()) {
        return reconstruct_from_deltas(deltas);
    }

    let calls = match value.as_array() {
        Some(arr) => arr.clone(),
        None => return Vec::new(),
    };

    calls
        .iter()
        .filter_map(|entry| parse_one_call(entry))
        .collect()
}

fn parse_one_call(entry: &Value) -> Option<ToolCallRequest> {
    let id = entry
        .get("id")
        .or_else(|| entry.get("call_id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    // Harmony-style: {"type": "function_call", "name": ..., "arguments": "..."}
    let name = entry
        .get("name")
        .or_else(|| entry.get("function").and_then(|f| f.get("name")))
        .and_then(|v| v.as_str())?
        .to_string();

    let raw_arguments = entry
        .get("arguments")
        .or_else(|| entry.get("function").and_then(|f| f.get("arguments")));

    let arguments = match raw_arguments {
        None => serde_json::json!({}),
        Some(Value::String(s)) if s.trim().is_empty() => serde_json::json!({}),
        Some(Value::String(s)) => parse_argument_string(s),
        Some(other) => other.clone(),
    };

    Some(ToolCallRequest {
        id,
        name,
        arguments,
    })
}

/// Parse a JSON-object-shaped string, recovering from a truncated tail by
/// counting braces and trimming back to the last balanced point — the
/// same recovery strategy as the upstream toolkit's streaming tool-call
/// parser, needed because some backends stream `arguments` incrementally
/// and hand it to us before the final delta has arrived.
fn parse_argument_string(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str(raw) {
        return value;
    }

    let mut depth: i32 = 0;
    let mut last_balanced = None;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    last_balanced = Some(idx);
                }
            }
            _ => {}
        }
    }

    if let Some(end) = last_balanced {
        if let Ok(value) = serde_json::from_str(&raw[..=end]) {
            return value;
        }
    }

    serde_json::json!({})
}

/// Parse a Harmony-style `output` array — a flat list of `message` and
/// `function_call` items, the alternative top-level response shape to
/// `choices[0].message` — into the same `(content, tool_calls)` pair a
/// `choices`-shaped response yields.
pub fn parse_harmony_output(output: &[Value]) -> (Option<String>, Vec<ToolCallRequest>) {
    let mut text_segments: Vec<String> = Vec::new();
    let mut tool_calls = Vec::new();

    for item in output {
        match item.get("type").and_then(|v| v.as_str()) {
            Some("function_call") => {
                if let Some(call) = parse_one_call(item) {
                    tool_calls.push(call);
                }
            }
            Some("message") | None => {
                if let Some(content) = item.get("content").and_then(|v| v.as_array()) {
                    for part in content {
                        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                            text_segments.push(text.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let content = if text_segments.is_empty() {
        None
    } else {
        Some(text_segments.join(""))
    };
    (content, tool_calls)
}

/// Concatenate streamed argument fragments keyed by `(call_id, index)` in
/// arrival order, then parse the assembled string per call.
fn reconstruct_from_deltas(deltas: &[Value]) -> Vec<ToolCallRequest> {
    let mut order: Vec<String> = Vec::new();
    let mut names: BTreeMap<String, String> = BTreeMap::new();
    let mut buffers: BTreeMap<String, String> = BTreeMap::new();

    for delta in deltas {
        let id = delta
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if id.is_empty() {
            continue;
        }
        if !buffers.contains_key(&id) {
            order.push(id.clone());
            buffers.insert(id.clone(), String::new());
        }
        if let Some(name) = delta.get("name").and_then(|v| v.as_str()) {
            names.entry(id.clone()).or_insert_with(|| name.to_string());
        }
        if let Some(fragment) = delta.get("arguments_delta").and_then(|v| v.as_str()) {
            buffers.get_mut(&id).unwrap().push_str(fragment);
        }
    }

    order
        .into_iter()
        .filter_map(|id| {
            let name = names.get(&id)?.clone();
            let raw = buffers.get(&id).cloned().unwrap_or_default();
            let arguments = if raw.trim().is_empty() {
                serde_json::json!({})
            } else {
                parse_argument_string(&raw)
            };
            Some(ToolCallRequest {
                id,
                name,
                arguments,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_arguments_pass_through() {
        let value = serde_json::json!([
            {"id": "c1", "name": "get_requirement", "arguments": {"rid": "DEMO1"}}
        ]);
        let calls = parse_tool_calls(&value);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, serde_json::json!({"rid": "DEMO1"}));
    }

    #[test]
    fn json_encoded_string_arguments_are_parsed() {
        let value = serde_json::json!([
            {"id": "c1", "name": "get_requirement", "arguments": "{\"rid\": \"DEMO1\"}"}
        ]);
        let calls = parse_tool_calls(&value);
        assert_eq!(calls[0].arguments, serde_json::json!({"rid": "DEMO1"}));
    }

    #[test]
    fn harmony_function_call_shape_is_parsed() {
        let value = serde_json::json!([
            {"id": "c1", "type": "function_call", "function": {"name": "get_requirement", "arguments": "{\"rid\": \"DEMO1\"}"}}
        ]);
        let calls = parse_tool_calls(&value);
        assert_eq!(calls[0].name, "get_requirement");
        assert_eq!(calls[0].arguments, serde_json::json!({"rid": "DEMO1"}));
    }

    #[test]
    fn missing_arguments_field_defaults_to_empty_object() {
        let value = serde_json::json!([{"id": "c1", "name": "list_labels"}]);
        let calls = parse_tool_calls(&value);
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn streamed_deltas_reconstruct_in_arrival_order() {
        let deltas = serde_json::json!({"deltas": [
            {"id": "c1", "name": "update_requirement_field"},
            {"id": "c1", "arguments_delta": "{\"rid\":\"DEMO21\","},
            {"id": "c1", "arguments_delta": "\"field\":\"statement\","},
            {"id": "c1", "arguments_delta": "\"value\":\"Тест\"}"},
        ]});
        let calls = parse_tool_calls(&deltas);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].arguments,
            serde_json::json!({"rid": "DEMO21", "field": "statement", "value": "Тест"})
        );
    }

    #[test]
    fn harmony_output_array_yields_content_and_tool_calls() {
        let output = serde_json::json!([
            {"type": "message", "content": [{"type": "output_text", "text": "done"}]},
            {"type": "function_call", "call_id": "call-1", "name": "get_requirement", "arguments": "{\"rid\":\"DEMO1\"}"}
        ]);
        let (content, calls) = parse_harmony_output(output.as_array().unwrap());
        assert_eq!(content.as_deref(), Some("done"));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call-1");
        assert_eq!(calls[0].arguments, serde_json::json!({"rid": "DEMO1"}));
    }

    #[test]
    fn truncated_trailing_fragment_recovers_last_balanced_object() {
        let raw = "{\"rid\": \"DEMO1\"}trailing garbage";
        assert_eq!(parse_argument_string(raw), serde_json::json!({"rid": "DEMO1"}));
    }
}
