//! End-to-end exercise of the agent turn engine against a real MCP HTTP
//! server: the agent dispatches `list_requirements` over the network,
//! the same path a deployed agent and tool server would use.

use agentctl::cancellation::CancellationToken;
use agentctl::client_wrapper::{ClientWrapper, ToolDefinition};
use agentctl::errors::AgentError;
use agentctl::mcp_server::{self, ServerContext};
use agentctl::mcp_tools::ToolRegistry;
use agentctl::run_contract::{ConversationMessage, LlmStepResponse, RunStatus, ToolCallRequest, ToolStatus};
use agentctl::{Agent, AgentConfig, McpClient, NullObserver};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedClient {
    responses: Mutex<Vec<LlmStepResponse>>,
    calls: AtomicUsize,
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn step(
        &self,
        _messages: &[ConversationMessage],
        _tools: &[ToolDefinition],
        _cancellation: &CancellationToken,
    ) -> Result<LlmStepResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(LlmStepResponse::default());
        }
        Ok(responses.remove(0))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[tokio::test]
async fn a_tool_call_round_trips_through_the_real_mcp_server() {
    let registry = ToolRegistry::bootstrap();
    let ctx = ServerContext::new(registry.clone(), Some("test-token".to_string()));
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let handle = mcp_server::http::start_server(ctx, addr)
        .await
        .expect("server should start");

    let base_url = format!("http://{}", handle.addr);
    let mcp = Arc::new(McpClient::new(&base_url, Some("test-token".to_string()), Duration::from_secs(5)));
    let client = Arc::new(ScriptedClient {
        responses: Mutex::new(vec![
            LlmStepResponse {
                content: None,
                tool_calls: vec![ToolCallRequest {
                    id: "call-1".to_string(),
                    name: "list_requirements".to_string(),
                    arguments: serde_json::json!({}),
                }],
                reasoning: vec![],
            },
            LlmStepResponse {
                content: Some("done".to_string()),
                tool_calls: vec![],
                reasoning: vec![],
            },
        ]),
        calls: AtomicUsize::new(0),
    });
    let agent = Agent::new(client, mcp, registry, AgentConfig::default());
    let cancellation = CancellationToken::new();
    let payload = agent
        .run_turn("system", &[], &[], "list the requirements", &cancellation, &NullObserver)
        .await;

    assert_eq!(payload.status, RunStatus::Succeeded);
    assert_eq!(payload.result_text, "done");
    assert_eq!(payload.tool_results.len(), 1);
    assert_eq!(payload.tool_results[0].status, ToolStatus::Succeeded);
    assert_eq!(payload.tool_results[0].tool_name, "list_requirements");

    handle.stop().await;
}

#[tokio::test]
async fn repeated_invalid_tool_calls_fail_the_run_after_max_retries() {
    let registry = ToolRegistry::bootstrap();
    let ctx = ServerContext::new(registry.clone(), None);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let handle = mcp_server::http::start_server(ctx, addr)
        .await
        .expect("server should start");

    let base_url = format!("http://{}", handle.addr);
    let mcp = Arc::new(McpClient::new(&base_url, None, Duration::from_secs(5)));
    let invalid_call = || LlmStepResponse {
        content: None,
        tool_calls: vec![ToolCallRequest {
            id: "call-1".to_string(),
            name: "get_requirement".to_string(),
            arguments: serde_json::json!({}),
        }],
        reasoning: vec![],
    };
    let client = Arc::new(ScriptedClient {
        responses: Mutex::new(vec![invalid_call(), invalid_call(), invalid_call()]),
        calls: AtomicUsize::new(0),
    });
    let agent = Agent::new(client, mcp, registry, AgentConfig::default());
    let cancellation = CancellationToken::new();
    let payload = agent
        .run_turn("system", &[], &[], "get a requirement", &cancellation, &NullObserver)
        .await;

    assert_eq!(payload.status, RunStatus::Failed);
    assert_eq!(payload.agent_stop_reason.as_deref(), Some("error"));
    assert_eq!(payload.tool_results.len(), 3);
    assert!(payload
        .tool_results
        .iter()
        .all(|r| r.status == ToolStatus::Failed));
    assert!(payload.error.is_some());

    handle.stop().await;
}

#[tokio::test]
async fn an_unauthorized_request_surfaces_as_a_failed_tool_result() {
    let registry = ToolRegistry::bootstrap();
    let ctx = ServerContext::new(registry.clone(), Some("real-token".to_string()));
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let handle = mcp_server::http::start_server(ctx, addr)
        .await
        .expect("server should start");

    let base_url = format!("http://{}", handle.addr);
    let mcp = Arc::new(McpClient::new(&base_url, Some("wrong-token".to_string()), Duration::from_secs(5)));
    let client = Arc::new(ScriptedClient {
        responses: Mutex::new(vec![LlmStepResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "call-1".to_string(),
                name: "list_requirements".to_string(),
                arguments: serde_json::json!({}),
            }],
            reasoning: vec![],
        }]),
        calls: AtomicUsize::new(0),
    });
    let agent = Agent::new(client, mcp, registry, AgentConfig::default());
    let cancellation = CancellationToken::new();
    let payload = agent
        .run_turn("system", &[], &[], "list the requirements", &cancellation, &NullObserver)
        .await;

    assert_eq!(payload.tool_results.len(), 1);
    assert_eq!(payload.tool_results[0].status, ToolStatus::Failed);

    handle.stop().await;
}
