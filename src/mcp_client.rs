//! HTTP client for the [`mcp_server`](crate::mcp_server) endpoints.
//!
//! Generalized from the upstream toolkit's notion of a thin transport
//! wrapper around a running tool server, trading its `/tools/list` +
//! `/tools/execute` pair for this runtime's single `/mcp` dispatch route.

use crate::errors::AgentError;
use serde_json::Value;
use std::time::Duration;

/// Whether a destructive tool call has been explicitly confirmed by the
/// caller. Mirrors the confirmation gate the original Python client asked
/// a human operator to satisfy before running `delete_*`/mutating tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Required,
    Granted,
}

pub struct McpClient {
    base_url: String,
    bearer_token: Option<String>,
    http: reqwest::Client,
}

impl McpClient {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client builds with default TLS backend"),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Readiness probe: confirms the server is reachable and serving a
    /// schema, without depending on any particular tool or document
    /// existing yet.
    pub async fn check_tools(&self) -> Result<(), AgentError> {
        let url = format!("{}/mcp/schema", self.base_url);
        let response = self
            .request(self.http.get(&url))
            .send()
            .await
            .map_err(|err| AgentError::Internal(format!("mcp server unreachable: {}", err)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::Internal(format!(
                "mcp server schema probe returned {}",
                response.status()
            )))
        }
    }

    /// `POST /mcp`, translating the response envelope into the matching
    /// [`AgentError`] variant.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, AgentError> {
        let url = format!("{}/mcp", self.base_url);
        let response = self
            .request(self.http.post(&url))
            .json(&serde_json::json!({"name": name, "arguments": arguments}))
            .send()
            .await
            .map_err(|err| AgentError::Internal(format!("mcp request failed: {}", err)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|err| AgentError::Internal(format!("mcp response decode failed: {}", err)))?;

        if status.is_success() {
            return Ok(body.get("result").cloned().unwrap_or(body));
        }

        let code = body
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str())
            .unwrap_or("INTERNAL");
        let message = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("mcp tool call failed")
            .to_string();

        Err(match code {
            "VALIDATION_ERROR" => AgentError::Validation(message),
            "NOT_FOUND" => AgentError::NotFound(message),
            "UNAUTHORIZED" => AgentError::Unauthorized,
            "CANCELLED" => AgentError::Cancelled,
            "CONFLICT" => AgentError::Conflict(message),
            _ => AgentError::Internal(message),
        })
    }

    /// Gate destructive tool calls behind an explicit confirmation token
    /// before dispatching. `is_destructive` is provided by the caller
    /// (typically backed by the registry's own `is_destructive`) rather
    /// than re-fetched over the wire on every call. A destructive call
    /// without a granted confirmation is treated as the caller declining
    /// the operation, not as a malformed request, so it surfaces as
    /// `Cancelled` rather than `Validation`.
    pub async fn call_tool_checked(
        &self,
        name: &str,
        arguments: Value,
        is_destructive: bool,
        confirmation: Confirmation,
    ) -> Result<Value, AgentError> {
        if is_destructive && confirmation != Confirmation::Granted {
            return Err(AgentError::Cancelled);
        }
        self.call_tool(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = McpClient::new("http://localhost:8080/", None, Duration::from_secs(5));
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[tokio::test]
    async fn destructive_call_without_confirmation_is_rejected_before_dispatch() {
        let client = McpClient::new("http://127.0.0.1:1", None, Duration::from_millis(50));
        let err = client
            .call_tool_checked("delete_requirement", serde_json::json!({"rid": "DEMO1"}), true, Confirmation::Required)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::Cancelled);
    }
}
