//! The agent run data model: the neutral, serializable shapes that flow
//! between the agent turn engine, the run controller, and the persisted
//! chat store.
//!
//! Every type here round-trips through `serde_json` without loss —
//! `AgentRunPayload` serialized then deserialized then serialized again
//! produces byte-identical JSON, which is what callers rely on for
//! persistence idempotence.

use serde::{Deserialize, Serialize};

/// A structured error as carried inside a [`ToolResultSnapshot`] or a
/// terminal [`AgentRunPayload`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<&crate::errors::AgentError> for ErrorDetail {
    fn from(err: &crate::errors::AgentError) -> Self {
        let envelope = err.to_envelope();
        Self {
            message: envelope.error.message,
            code: Some(format!("{:?}", envelope.error.code).to_uppercase()),
            details: envelope.error.details,
        }
    }
}

/// Observable lifecycle status of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Succeeded | ToolStatus::Failed)
    }
}

/// One micro-event in a tool invocation's own timeline (`started`,
/// `update`, `completed`, `failed`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolMicroEventKind {
    Started,
    Update,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolMicroEvent {
    pub kind: ToolMicroEventKind,
    pub occurred_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolMetrics {
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// The observable state of one tool invocation, identified by its
/// LLM-chosen `call_id`.
///
/// **Invariants:** once `status` reaches `succeeded` or `failed`, further
/// events must not change it; `completed_at >= started_at` whenever both
/// are present; `call_id` is unique within one `AgentRunPayload`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultSnapshot {
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub events: Vec<ToolMicroEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_observed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ToolMetrics>,
    pub sequence: u64,
}

impl ToolResultSnapshot {
    pub fn new_running(
        sequence: u64,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        started_at: impl Into<String>,
    ) -> Self {
        let started_at = started_at.into();
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            status: ToolStatus::Running,
            arguments,
            result: None,
            error: None,
            events: vec![ToolMicroEvent {
                kind: ToolMicroEventKind::Started,
                occurred_at: started_at.clone(),
                message: None,
            }],
            started_at: Some(started_at.clone()),
            completed_at: None,
            last_observed_at: Some(started_at),
            metrics: None,
            sequence,
        }
    }

    /// Transition to a terminal status. No-op on a snapshot already
    /// terminal, preserving the invariant that status never regresses.
    pub fn finish(&mut self, succeeded: bool, at: impl Into<String>, payload: serde_json::Value) {
        if self.status.is_terminal() {
            return;
        }
        let at = at.into();
        if succeeded {
            self.status = ToolStatus::Succeeded;
            self.result = Some(payload);
            self.events.push(ToolMicroEvent {
                kind: ToolMicroEventKind::Completed,
                occurred_at: at.clone(),
                message: None,
            });
        } else {
            self.status = ToolStatus::Failed;
            self.error = Some(ErrorDetail::new(
                payload
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("tool failed")
                    .to_string(),
            ));
            self.events.push(ToolMicroEvent {
                kind: ToolMicroEventKind::Failed,
                occurred_at: at.clone(),
                message: None,
            });
        }
        self.completed_at = Some(at.clone());
        self.last_observed_at = Some(at);
    }
}

/// A reasoning segment from an LLM response. Whitespace fields are
/// preserved verbatim (never trimmed) so consecutive segments can be
/// rejoined faithfully.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningSegment {
    #[serde(rename = "type")]
    pub segment_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leading_whitespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_whitespace: Option<String>,
}

/// One tool call as requested by the LLM inside an [`LlmStepResponse`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A conversation message as sent to (or received from) the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

/// The LLM's response to one step, including any tool calls it requested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LlmStepResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning: Vec<ReasoningSegment>,
}

/// One request/response round-trip with the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmStep {
    pub index: usize,
    pub occurred_at: String,
    pub request: Vec<ConversationMessage>,
    pub response: LlmStepResponse,
}

/// The ordered sequence of [`LlmStep`]s making up one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LlmTrace {
    pub steps: Vec<LlmStep>,
}

/// One event in the engine's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventKind {
    LlmStepStarted,
    LlmStep,
    ToolStarted,
    ToolUpdate,
    ToolCompleted,
    ToolFailed,
    AgentFinished,
    AgentCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEvent {
    pub kind: AgentEventKind,
    pub occurred_at: String,
    pub sequence: u64,
    pub payload: serde_json::Value,
}

pub type AgentEventLog = Vec<AgentEvent>;

/// Kind of a canonical timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEntryKind {
    LlmStep,
    ToolCall,
    AgentFinished,
}

/// One canonical, ordered item of a run's derived timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTimelineEntry {
    pub kind: TimelineEntryKind,
    pub sequence: u64,
    pub occurred_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Terminal outcome of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// The finalized result of one agent turn. Always produced, even on
/// cancellation or failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRunPayload {
    pub ok: bool,
    pub status: RunStatus,
    pub result_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Vec<ReasoningSegment>>,
    pub tool_results: Vec<ToolResultSnapshot>,
    pub llm_trace: LlmTrace,
    pub events: AgentEventLog,
    pub timeline: Vec<AgentTimelineEntry>,
    pub timeline_checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// Snapshot of the tool registry's schemas at run start, for audit
    /// and replay. Dropped from `spec.md`'s distillation but present in
    /// the source `AgentRunPayload`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_schemas: Option<serde_json::Value>,
    /// Name of the most recently invoked tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tool: Option<String>,
    /// One of `"completed" | "max_steps" | "cancelled" | "error"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_stop_reason: Option<String>,
}

impl AgentRunPayload {
    /// Re-serialize and re-parse through `serde_json`; used to assert
    /// canonicalization idempotence (normalizing an already-canonical
    /// payload is a no-op).
    pub fn canonicalize(self) -> Self {
        let value = serde_json::to_value(&self).expect("AgentRunPayload always serializes");
        serde_json::from_value(value).expect("canonical AgentRunPayload always round-trips")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline;

    fn sample_payload() -> AgentRunPayload {
        let timeline = vec![AgentTimelineEntry {
            kind: TimelineEntryKind::AgentFinished,
            sequence: 0,
            occurred_at: "2026-01-01T00:00:00Z".to_string(),
            step_index: None,
            call_id: None,
            status: Some("succeeded".to_string()),
        }];
        let checksum = timeline::timeline_checksum(&timeline);
        AgentRunPayload {
            ok: true,
            status: RunStatus::Succeeded,
            result_text: "Готово".to_string(),
            reasoning: None,
            tool_results: vec![],
            llm_trace: LlmTrace::default(),
            events: vec![],
            timeline,
            timeline_checksum: checksum,
            error: None,
            diagnostic: None,
            tool_schemas: None,
            last_tool: None,
            agent_stop_reason: Some("completed".to_string()),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let payload = sample_payload();
        let json = serde_json::to_string(&payload).unwrap();
        let restored: AgentRunPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, restored);
    }

    #[test]
    fn canonicalizing_an_already_canonical_payload_is_a_no_op() {
        let payload = sample_payload();
        let once = serde_json::to_string(&payload.clone().canonicalize()).unwrap();
        let twice = serde_json::to_string(&payload.canonicalize().canonicalize()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn tool_results_sort_order_is_caller_responsibility_but_preserved_on_round_trip() {
        let mut payload = sample_payload();
        payload.tool_results.push(ToolResultSnapshot::new_running(
            1,
            "call_1",
            "list_requirements",
            serde_json::json!({"per_page": 1}),
            "2026-01-01T00:00:01Z",
        ));
        let json = serde_json::to_string(&payload).unwrap();
        let restored: AgentRunPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tool_results[0].call_id, "call_1");
    }
}
