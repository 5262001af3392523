//! The Agent Turn Engine: drives one multi-step conversation against an
//! LLM, dispatching tool calls through the MCP client and assembling a
//! deterministic [`AgentRunPayload`] whether the run completes, is
//! cancelled, or errors out.
//!
//! Generalized from the upstream toolkit's `Agent::send`: that method's
//! single-shot request/response loop over a fixed set of tool adapters
//! becomes a bounded step loop over an arbitrary MCP tool server, with
//! sequence-numbered [`AgentEvent`] emission at every suspension point so
//! an observer can reconstruct the run without racing the engine thread.

use crate::cancellation::CancellationToken;
use crate::client_wrapper::{ClientWrapper, ToolDefinition};
use crate::errors::AgentError;
use crate::mcp_client::McpClient;
use crate::mcp_tools::ToolRegistry;
use crate::run_contract::{
    AgentEvent, AgentEventKind, AgentRunPayload, ConversationMessage, ErrorDetail, LlmStep,
    LlmTrace, RunStatus, ToolResultSnapshot,
};
use crate::timeline::{build_timeline, timeline_checksum};
use std::sync::Arc;

/// Observer hooks invoked as a run progresses. Calls happen on the
/// engine's own task; implementations must be non-blocking and tolerant
/// of out-of-order delivery (reconcile using `sequence`), matching
/// spec §4.6's subscriber contract.
pub trait AgentObserver: Send + Sync {
    fn on_llm_step(&self, _step: &LlmStep) {}
    fn on_tool_snapshot(&self, _snapshot: &ToolResultSnapshot) {}
}

/// An observer that does nothing, for callers with no UI to drive.
pub struct NullObserver;
impl AgentObserver for NullObserver {}

pub struct AgentConfig {
    pub max_steps: usize,
    pub max_retries: usize,
    /// Whether destructive tool calls (`delete_*`, other mutating tools
    /// the registry flags `destructive`) may dispatch without an
    /// out-of-band confirmation. `false` by default: a destructive call
    /// is then denied (`AgentError::Cancelled`) rather than silently
    /// granted, since this headless engine has no operator to prompt.
    pub auto_confirm_destructive: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 32,
            max_retries: 2,
            auto_confirm_destructive: false,
        }
    }
}

/// Drives one agent turn. Owns no per-run state; every invocation of
/// [`Agent::run_turn`] starts a fresh event log, step trace, and snapshot
/// list, mirroring the original's stateless `run_contract.py` payload
/// construction.
pub struct Agent {
    client: Arc<dyn ClientWrapper>,
    mcp: Arc<McpClient>,
    registry: Arc<ToolRegistry>,
    config: AgentConfig,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Agent {
    pub fn new(
        client: Arc<dyn ClientWrapper>,
        mcp: Arc<McpClient>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            client,
            mcp,
            registry,
            config,
        }
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let described = self.registry.describe();
        let tools = described["tools"].as_object().cloned().unwrap_or_default();
        tools
            .into_iter()
            .map(|(name, metadata)| ToolDefinition {
                name,
                description: metadata["description"].as_str().unwrap_or_default().to_string(),
                parameters_schema: metadata["arguments_schema"].clone(),
            })
            .collect()
    }

    /// Run one full turn: assemble the conversation, loop LLM calls and
    /// tool dispatches until a terminal condition, and finalize into an
    /// [`AgentRunPayload`]. Always returns a payload, never propagates an
    /// error — failures and cancellation are terminal statuses, not
    /// `Err` variants, per spec §4.6's "outputs: `AgentRunPayload`
    /// (always)" contract.
    pub async fn run_turn(
        &self,
        system_prompt: &str,
        context_messages: &[ConversationMessage],
        history: &[ConversationMessage],
        prompt: &str,
        cancellation: &CancellationToken,
        observer: &dyn AgentObserver,
    ) -> AgentRunPayload {
        let mut conversation = Vec::new();
        conversation.push(ConversationMessage::system(system_prompt));
        conversation.extend(context_messages.iter().cloned());
        conversation.extend(history.iter().cloned());
        conversation.push(ConversationMessage::user(prompt));

        let mut events: Vec<AgentEvent> = Vec::new();
        let mut steps: Vec<LlmStep> = Vec::new();
        let mut snapshots: Vec<ToolResultSnapshot> = Vec::new();
        let mut sequence: u64 = 0;
        let mut retries: usize = 0;
        let tools = self.tool_definitions();

        let outcome = 'outer: loop {
            if steps.len() >= self.config.max_steps {
                break 'outer Outcome::stopped(RunStatus::Failed, "max_steps");
            }

            if cancellation.raise_if_cancelled().is_err() {
                break 'outer Outcome::cancelled();
            }

            events.push(self.emit(&mut sequence, AgentEventKind::LlmStepStarted, serde_json::json!({})));

            let response = match self.client.step(&conversation, &tools, cancellation).await {
                Ok(r) => r,
                Err(AgentError::Cancelled) => break 'outer Outcome::cancelled(),
                Err(AgentError::Validation(message)) => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        break 'outer Outcome::stopped(RunStatus::Failed, "error")
                            .with_error(ErrorDetail::new(message));
                    }
                    conversation.push(ConversationMessage::user(format!(
                        "Your previous response was rejected: {}. Please retry.",
                        message
                    )));
                    continue 'outer;
                }
                Err(err) => {
                    break 'outer Outcome::stopped(RunStatus::Failed, "error")
                        .with_error(ErrorDetail::from(&err));
                }
            };

            let step_index = steps.len() + 1;
            let step = LlmStep {
                index: step_index,
                occurred_at: now(),
                request: conversation.clone(),
                response: response.clone(),
            };
            steps.push(step.clone());
            events.push(self.emit(
                &mut sequence,
                AgentEventKind::LlmStep,
                serde_json::json!({"step_index": step_index}),
            ));
            observer.on_llm_step(&step);

            if response.tool_calls.is_empty() {
                conversation.push(ConversationMessage::assistant(response.content.clone(), vec![]));
                break 'outer Outcome::stopped(RunStatus::Succeeded, "completed")
                    .with_result_text(response.content.clone().unwrap_or_default());
            }

            conversation.push(ConversationMessage::assistant(
                Some(response.content.clone().unwrap_or_default()),
                response.tool_calls.clone(),
            ));

            let mut last_tool = None;
            for call in &response.tool_calls {
                last_tool = Some(call.name.clone());
                let call_sequence = sequence;
                let started_at = now();
                let mut snapshot = ToolResultSnapshot::new_running(
                    call_sequence,
                    call.id.clone(),
                    call.name.clone(),
                    call.arguments.clone(),
                    started_at.clone(),
                );
                events.push(self.emit(
                    &mut sequence,
                    AgentEventKind::ToolStarted,
                    serde_json::json!({"call_id": call.id, "tool_name": call.name}),
                ));
                observer.on_tool_snapshot(&snapshot);

                if cancellation.raise_if_cancelled().is_err() {
                    snapshot.finish(
                        false,
                        now(),
                        serde_json::json!({"message": "cancelled", "code": "CANCELLED"}),
                    );
                    snapshots.push(snapshot.clone());
                    observer.on_tool_snapshot(&snapshot);
                    break 'outer Outcome::cancelled();
                }

                let is_destructive = self.registry.is_destructive(&call.name);
                let confirmation = if is_destructive && !self.config.auto_confirm_destructive {
                    crate::mcp_client::Confirmation::Required
                } else {
                    crate::mcp_client::Confirmation::Granted
                };
                let result = self
                    .mcp
                    .call_tool_checked(&call.name, call.arguments.clone(), is_destructive, confirmation)
                    .await;

                let mut exhausted_retries: Option<ErrorDetail> = None;
                let tool_message = match result {
                    Ok(value) => {
                        snapshot.finish(true, now(), value.clone());
                        events.push(self.emit(
                            &mut sequence,
                            AgentEventKind::ToolCompleted,
                            serde_json::json!({"call_id": call.id}),
                        ));
                        ConversationMessage::tool_result(
                            call.id.clone(),
                            call.name.clone(),
                            serde_json::to_string(&value).unwrap_or_default(),
                        )
                    }
                    Err(err) => {
                        let detail = ErrorDetail::from(&err);
                        if err.code() == crate::errors::ErrorCode::ValidationError {
                            retries += 1;
                            if retries > self.config.max_retries {
                                exhausted_retries = Some(detail.clone());
                            }
                        }
                        snapshot.finish(
                            false,
                            now(),
                            serde_json::json!({"message": detail.message, "code": detail.code}),
                        );
                        events.push(self.emit(
                            &mut sequence,
                            AgentEventKind::ToolFailed,
                            serde_json::json!({"call_id": call.id}),
                        ));
                        ConversationMessage::tool_result(
                            call.id.clone(),
                            call.name.clone(),
                            serde_json::to_string(&serde_json::json!({"error": detail}))
                                .unwrap_or_default(),
                        )
                    }
                };

                snapshots.push(snapshot.clone());
                observer.on_tool_snapshot(&snapshot);
                conversation.push(tool_message);

                if let Some(detail) = exhausted_retries {
                    break 'outer Outcome::stopped(RunStatus::Failed, "error").with_error(detail);
                }
            }
            let _ = last_tool;
        };

        self.finalize(events, steps, snapshots, sequence, outcome)
    }

    fn emit(&self, sequence: &mut u64, kind: AgentEventKind, payload: serde_json::Value) -> AgentEvent {
        let event = AgentEvent {
            kind,
            occurred_at: now(),
            sequence: *sequence,
            payload,
        };
        *sequence += 1;
        event
    }

    fn finalize(
        &self,
        mut events: Vec<AgentEvent>,
        steps: Vec<LlmStep>,
        tool_results: Vec<ToolResultSnapshot>,
        mut sequence: u64,
        outcome: Outcome,
    ) -> AgentRunPayload {
        let event_kind = match outcome.status {
            RunStatus::Cancelled => AgentEventKind::AgentCancelled,
            _ => AgentEventKind::AgentFinished,
        };
        events.push(self.emit(
            &mut sequence,
            event_kind,
            serde_json::json!({"status": outcome.stop_reason}),
        ));

        let last_tool = tool_results.last().map(|s| s.tool_name.clone());
        let llm_trace = LlmTrace { steps };
        let timeline = build_timeline(&events, &tool_results, &llm_trace);
        let checksum = timeline_checksum(&timeline);

        AgentRunPayload {
            ok: outcome.status == RunStatus::Succeeded,
            status: outcome.status,
            result_text: outcome.result_text,
            reasoning: None,
            tool_results,
            llm_trace,
            events,
            timeline,
            timeline_checksum: checksum,
            error: outcome.error,
            diagnostic: None,
            tool_schemas: Some(self.registry.describe()),
            last_tool,
            agent_stop_reason: Some(outcome.stop_reason.to_string()),
        }
    }
}

struct Outcome {
    status: RunStatus,
    stop_reason: &'static str,
    result_text: String,
    error: Option<ErrorDetail>,
}

impl Outcome {
    fn stopped(status: RunStatus, stop_reason: &'static str) -> Self {
        Self {
            status,
            stop_reason,
            result_text: String::new(),
            error: None,
        }
    }

    fn cancelled() -> Self {
        Self::stopped(RunStatus::Cancelled, "cancelled")
    }

    fn with_error(mut self, error: ErrorDetail) -> Self {
        self.error = Some(error);
        self
    }

    fn with_result_text(mut self, text: String) -> Self {
        self.result_text = text;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_contract::{LlmStepResponse, ToolCallRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
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

    fn agent_with(responses: Vec<LlmStepResponse>) -> Agent {
        let registry = ToolRegistry::bootstrap();
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        });
        let mcp = Arc::new(McpClient::new("http://127.0.0.1:1", None, Duration::from_millis(50)));
        Agent::new(client, mcp, registry, AgentConfig::default())
    }

    #[tokio::test]
    async fn a_response_with_no_tool_calls_completes_immediately() {
        let agent = agent_with(vec![LlmStepResponse {
            content: Some("done".to_string()),
            tool_calls: vec![],
            reasoning: vec![],
        }]);
        let cancellation = CancellationToken::new();
        let payload = agent
            .run_turn("system", &[], &[], "hello", &cancellation, &NullObserver)
            .await;
        assert_eq!(payload.status, RunStatus::Succeeded);
        assert_eq!(payload.result_text, "done");
        assert_eq!(payload.llm_trace.steps.len(), 1);
        assert!(payload.tool_results.is_empty());
    }

    #[tokio::test]
    async fn max_steps_is_enforced() {
        let registry = ToolRegistry::bootstrap();
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let mcp = Arc::new(McpClient::new("http://127.0.0.1:1", None, Duration::from_millis(50)));
        let agent = Agent::new(
            client,
            mcp,
            registry,
            AgentConfig {
                max_steps: 2,
                max_retries: 2,
                auto_confirm_destructive: false,
            },
        );
        let cancellation = CancellationToken::new();
        let payload = agent
            .run_turn("system", &[], &[], "hello", &cancellation, &NullObserver)
            .await;
        assert_eq!(payload.status, RunStatus::Failed);
        assert_eq!(payload.agent_stop_reason.as_deref(), Some("max_steps"));
        assert_eq!(payload.llm_trace.steps.len(), 2);
    }

    #[tokio::test]
    async fn cancelling_before_the_first_step_yields_cancelled_status() {
        let agent = agent_with(vec![]);
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let payload = agent
            .run_turn("system", &[], &[], "hello", &cancellation, &NullObserver)
            .await;
        assert_eq!(payload.status, RunStatus::Cancelled);
        assert!(payload.llm_trace.steps.is_empty());
    }

    #[tokio::test]
    async fn timeline_checksum_matches_recomputation() {
        let agent = agent_with(vec![LlmStepResponse {
            content: Some("done".to_string()),
            tool_calls: vec![],
            reasoning: vec![],
        }]);
        let cancellation = CancellationToken::new();
        let payload = agent
            .run_turn("system", &[], &[], "hello", &cancellation, &NullObserver)
            .await;
        let recomputed = timeline_checksum(&payload.timeline);
        assert_eq!(payload.timeline_checksum, recomputed);
    }

    #[tokio::test]
    async fn a_tool_call_produces_a_succeeded_snapshot_and_a_second_llm_step() {
        let agent = agent_with(vec![
            LlmStepResponse {
                content: None,
                tool_calls: vec![ToolCallRequest {
                    id: "call-1".to_string(),
                    name: "list_requirements".to_string(),
                    arguments: serde_json::json!({"per_page": 1}),
                }],
                reasoning: vec![],
            },
            LlmStepResponse {
                content: Some("Готово".to_string()),
                tool_calls: vec![],
                reasoning: vec![],
            },
        ]);
        let cancellation = CancellationToken::new();
        let payload = agent
            .run_turn("system", &[], &[], "hello", &cancellation, &NullObserver)
            .await;
        assert_eq!(payload.status, RunStatus::Succeeded);
        assert_eq!(payload.result_text, "Готово");
        assert_eq!(payload.tool_results.len(), 1);
        assert_eq!(
            payload.tool_results[0].status,
            crate::run_contract::ToolStatus::Succeeded
        );
        assert_eq!(payload.llm_trace.steps.len(), 2);
        assert_eq!(payload.timeline.len(), 4);
    }
}
