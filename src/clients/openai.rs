//! An OpenAI-compatible Chat Completions adapter.
//!
//! Generalized from the upstream toolkit's `OpenAIClient`, which wrapped
//! the `openai_rust2` SDK. This runtime talks to `/v1/chat/completions`
//! directly over `reqwest` instead, since the run contract only needs a
//! handful of response fields (`content`, `tool_calls`, `usage`) and a
//! direct request lets `base_url` point at any OpenAI-compatible
//! endpoint without vendoring a second HTTP layer.

use crate::cancellation::CancellationToken;
use crate::client_wrapper::{ClientWrapper, TokenUsage, ToolDefinition};
use crate::clients::common::{get_shared_http_client, parse_harmony_output, parse_tool_calls};
use crate::errors::AgentError;
use crate::run_contract::{ConversationMessage, LlmStepResponse};
use async_trait::async_trait;
use tokio::sync::Mutex;

pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    last_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1")
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            last_usage: Mutex::new(None),
        }
    }

    fn to_wire_message(message: &ConversationMessage) -> serde_json::Value {
        let mut value = serde_json::json!({
            "role": message.role,
            "content": message.content,
        });
        if let Some(tool_calls) = &message.tool_calls {
            value["tool_calls"] = serde_json::json!(tool_calls
                .iter()
                .map(|call| serde_json::json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": serde_json::to_string(&call.arguments).unwrap_or_default(),
                    }
                }))
                .collect::<Vec<_>>());
        }
        if let Some(tool_call_id) = &message.tool_call_id {
            value["tool_call_id"] = serde_json::json!(tool_call_id);
        }
        if let Some(name) = &message.name {
            value["name"] = serde_json::json!(name);
        }
        value
    }

    fn to_wire_tool(tool: &ToolDefinition) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters_schema,
            }
        })
    }

    /// Parse a successful response body into `(content, tool_calls)`,
    /// accepting either a Harmony-style top-level `output` array or the
    /// conventional `choices[0].message` shape.
    fn parse_response_body(
        payload: &serde_json::Value,
    ) -> Result<(Option<String>, Vec<crate::run_contract::ToolCallRequest>), AgentError> {
        if let Some(output) = payload.get("output").and_then(|v| v.as_array()) {
            return Ok(parse_harmony_output(output));
        }

        let choice = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| AgentError::Internal("openai response has no choices".to_string()))?;
        let message = choice
            .get("message")
            .ok_or_else(|| AgentError::Internal("openai choice has no message".to_string()))?;

        let content = message
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let tool_calls = message
            .get("tool_calls")
            .map(|value| parse_tool_calls(value))
            .unwrap_or_default();

        Ok((content, tool_calls))
    }
}

#[async_trait]
impl ClientWrapper for OpenAiClient {
    async fn step(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolDefinition],
        cancellation: &CancellationToken,
    ) -> Result<LlmStepResponse, AgentError> {
        cancellation.raise_if_cancelled()?;

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages.iter().map(Self::to_wire_message).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools.iter().map(Self::to_wire_tool).collect::<Vec<_>>());
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = get_shared_http_client()
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| AgentError::Internal(format!("openai request failed: {}", err)))?;

        cancellation.raise_if_cancelled()?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|err| AgentError::Internal(format!("openai response decode failed: {}", err)))?;

        if !status.is_success() {
            let message = payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("openai request rejected")
                .to_string();
            return Err(AgentError::Internal(message));
        }

        if let Some(usage) = payload.get("usage") {
            let usage = TokenUsage {
                input_tokens: usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                output_tokens: usage
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                total_tokens: usage.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            };
            *self.last_usage.lock().await = Some(usage);
        }

        let (content, tool_calls) = Self::parse_response_body(&payload)?;

        Ok(LlmStepResponse {
            content,
            tool_calls,
            reasoning: Vec::new(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn last_usage(&self) -> Option<TokenUsage> {
        *self.last_usage.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_includes_tool_call_id_for_tool_results() {
        let message = ConversationMessage::tool_result("call-1", "get_requirement", "{\"ok\":true}");
        let wire = OpenAiClient::to_wire_message(&message);
        assert_eq!(wire["tool_call_id"], "call-1");
        assert_eq!(wire["role"], "tool");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiClient::with_base_url("key", "gpt-4.1-nano", "https://example.com/v1/");
        assert_eq!(client.base_url, "https://example.com/v1");
    }

    #[test]
    fn parses_choices_shaped_response_body() {
        let payload = serde_json::json!({
            "choices": [{"message": {"content": "hello", "tool_calls": null}}]
        });
        let (content, calls) = OpenAiClient::parse_response_body(&payload).unwrap();
        assert_eq!(content.as_deref(), Some("hello"));
        assert!(calls.is_empty());
    }

    #[test]
    fn parses_harmony_output_shaped_response_body() {
        let payload = serde_json::json!({
            "output": [
                {"type": "function_call", "call_id": "call-1", "name": "get_requirement", "arguments": "{\"rid\":\"DEMO1\"}"}
            ]
        });
        let (content, calls) = OpenAiClient::parse_response_body(&payload).unwrap();
        assert!(content.is_none());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_requirement");
    }

    #[test]
    fn missing_choices_and_output_is_an_internal_error() {
        let payload = serde_json::json!({});
        let err = OpenAiClient::parse_response_body(&payload).unwrap_err();
        assert!(matches!(err, AgentError::Internal(_)));
    }
}
