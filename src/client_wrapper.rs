//! The `ClientWrapper` trait: a uniform seam between the agent turn engine
//! and whichever LLM backend is configured. Shape carried over from the
//! upstream toolkit's `client_wrapper.rs`, generalized so one LLM step
//! returns the run contract's [`LlmStepResponse`] directly instead of a
//! free-floating `Message`.

use crate::run_contract::{ConversationMessage, LlmStepResponse, ToolCallRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Token accounting for one LLM round trip, when the backend reports it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// A tool an LLM backend may call, described in its own wire schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Adapter between the agent turn engine and one concrete LLM backend.
///
/// A step always produces exactly one [`LlmStepResponse`]; backends that
/// stream internally (§4.5's delta reconstruction) still return the fully
/// assembled step once the stream completes. Cancellation is cooperative:
/// implementations should poll `cancellation` where the backend allows
/// aborting an in-flight request, but are not required to guarantee
/// sub-second responsiveness.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    async fn step(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolDefinition],
        cancellation: &crate::cancellation::CancellationToken,
    ) -> Result<LlmStepResponse, crate::errors::AgentError>;

    fn model_name(&self) -> &str;

    async fn last_usage(&self) -> Option<TokenUsage> {
        None
    }
}

/// Reconstruct a [`ToolCallRequest`] list from whatever wire shape a
/// backend returned. Kept here (rather than duplicated per backend) since
/// every adapter under `clients/` needs the same five encodings from
/// §4.5: a plain JSON object, a JSON-encoded string, streamed
/// `(id, index)`-keyed deltas, a Harmony-style `function_call` with
/// stringified args, and an SDK `model_dump()` with the arguments field
/// omitted entirely (treated as `{}`).
pub fn tool_calls_from_value(value: &serde_json::Value) -> Vec<ToolCallRequest> {
    crate::clients::common::parse_tool_calls(value)
}

pub type SharedClient = Arc<dyn ClientWrapper>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_defaults_to_zero() {
        let usage = TokenUsage::default();
        assert_eq!(usage.total_tokens, 0);
    }
}
