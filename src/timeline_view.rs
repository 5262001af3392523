//! Conversation Timeline View Model: a pure, UI-agnostic transform from a
//! stored [`ChatConversation`] into a rendering-ready
//! [`ConversationTimeline`].
//!
//! Grounded on `original_source/app/agent/timeline_utils.py`'s module
//! doc comment guidance ("cache depends on the canonized timeline, not
//! raw event logs") and generalized from the upstream toolkit's
//! per-session event callback into one cached, pure function of a
//! conversation's entries.

use crate::chat_store::{ChatConversation, ChatEntry};
use crate::run_contract::AgentRunPayload;
use std::collections::HashMap;
use std::sync::Mutex;

/// Where a rendered timestamp came from, so the UI can render "no
/// timestamp" placeholders without losing provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    ResponseAt,
    LlmStep,
    ToolStarted,
    Synthesized,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Timestamp {
    pub value: Option<String>,
    pub source: TimestampSource,
    pub missing: bool,
}

impl Timestamp {
    fn present(value: String, source: TimestampSource) -> Self {
        Self {
            value: Some(value),
            source,
            missing: false,
        }
    }

    fn missing(source: TimestampSource) -> Self {
        Self {
            value: None,
            source,
            missing: true,
        }
    }
}

/// Compact, human-readable summary of one tool call, sorted by
/// `(sequence, started_at, call_id)` when rendered in a list.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCallSummary {
    pub call_id: String,
    pub tool_name: String,
    pub sequence: u64,
    pub started_at: Option<String>,
    pub preview: String,
}

/// One rendered agent turn within a [`ConversationTimeline`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentTurn {
    pub final_response: String,
    pub streamed_responses: Vec<String>,
    pub tool_calls: Vec<ToolCallSummary>,
    pub reasoning: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PromptSnapshot {
    pub entry_id: String,
    pub prompt: String,
    pub prompt_at: Timestamp,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TimelineRow {
    pub prompt: PromptSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<AgentTurn>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationTimeline {
    pub conversation_id: String,
    pub rows: Vec<TimelineRow>,
}

fn tool_preview(call: &crate::run_contract::ToolResultSnapshot) -> String {
    match call.tool_name.as_str() {
        "read_user_document" => call
            .result
            .as_ref()
            .and_then(|r| r.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.lines().take(3).collect::<Vec<_>>().join(" / "))
            .unwrap_or_default(),
        "create_user_document" => call
            .arguments
            .get("content")
            .and_then(|c| c.as_str())
            .map(|s| s.chars().take(80).collect())
            .unwrap_or_default(),
        _ => match &call.error {
            Some(err) => format!(
                "{}: {}",
                err.code.clone().unwrap_or_else(|| "ERROR".to_string()),
                err.message
            ),
            None => call
                .result
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default(),
        },
    }
}

fn build_turn(payload: &AgentRunPayload) -> AgentTurn {
    let final_response = payload
        .llm_trace
        .steps
        .last()
        .and_then(|s| s.response.content.clone())
        .unwrap_or_else(|| payload.result_text.clone());

    let streamed_responses: Vec<String> = payload
        .llm_trace
        .steps
        .iter()
        .rev()
        .skip(1)
        .rev()
        .filter_map(|s| s.response.content.clone())
        .filter(|c| c != &final_response)
        .collect();

    let mut tool_calls: Vec<ToolCallSummary> = payload
        .tool_results
        .iter()
        .map(|snapshot| ToolCallSummary {
            call_id: snapshot.call_id.clone(),
            tool_name: snapshot.tool_name.clone(),
            sequence: snapshot.sequence,
            started_at: snapshot.started_at.clone(),
            preview: tool_preview(snapshot),
        })
        .collect();
    tool_calls.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then_with(|| a.started_at.cmp(&b.started_at))
            .then_with(|| a.call_id.cmp(&b.call_id))
    });

    let reasoning = payload
        .llm_trace
        .steps
        .last()
        .map(|s| {
            s.response
                .reasoning
                .iter()
                .map(|r| r.text.clone())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    AgentTurn {
        final_response,
        streamed_responses,
        tool_calls,
        reasoning,
    }
}

fn build_row(entry: &ChatEntry) -> TimelineRow {
    let prompt_at = if entry.prompt_at.is_empty() {
        Timestamp::missing(TimestampSource::Synthesized)
    } else {
        Timestamp::present(entry.prompt_at.clone(), TimestampSource::ResponseAt)
    };

    TimelineRow {
        prompt: PromptSnapshot {
            entry_id: entry.id.clone(),
            prompt: entry.prompt.clone(),
            prompt_at,
        },
        turn: entry.raw_result.as_ref().map(build_turn),
    }
}

fn checksum_key(conversation: &ChatConversation) -> String {
    conversation
        .entries
        .iter()
        .map(|e| {
            e.raw_result
                .as_ref()
                .map(|r| r.timeline_checksum.clone())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Per-conversation cache keyed by conversation id plus the checksum of
/// every entry's timeline; any changed checksum invalidates the cached
/// rendering for that conversation.
#[derive(Default)]
pub struct TimelineViewCache {
    cache: Mutex<HashMap<String, (String, ConversationTimeline)>>,
}

impl TimelineViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&self, conversation: &ChatConversation) -> ConversationTimeline {
        let key = checksum_key(conversation);
        let mut cache = self.cache.lock().unwrap();
        if let Some((cached_key, timeline)) = cache.get(&conversation.id) {
            if cached_key == &key {
                return timeline.clone();
            }
        }

        let timeline = ConversationTimeline {
            conversation_id: conversation.id.clone(),
            rows: conversation.entries.iter().map(build_row).collect(),
        };
        cache.insert(conversation.id.clone(), (key, timeline.clone()));
        timeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_contract::{LlmStep, LlmStepResponse, LlmTrace, RunStatus};

    fn payload_with_content(content: &str) -> AgentRunPayload {
        AgentRunPayload {
            ok: true,
            status: RunStatus::Succeeded,
            result_text: content.to_string(),
            reasoning: None,
            tool_results: vec![],
            llm_trace: LlmTrace {
                steps: vec![LlmStep {
                    index: 1,
                    occurred_at: "2026-01-01T00:00:00Z".to_string(),
                    request: vec![],
                    response: LlmStepResponse {
                        content: Some(content.to_string()),
                        tool_calls: vec![],
                        reasoning: vec![],
                    },
                }],
            },
            events: vec![],
            timeline: vec![],
            timeline_checksum: "abc".to_string(),
            error: None,
            diagnostic: None,
            tool_schemas: None,
            last_tool: None,
            agent_stop_reason: Some("completed".to_string()),
        }
    }

    #[test]
    fn a_completed_entry_produces_one_row_with_a_turn() {
        let mut entry = ChatEntry::pending("e1", "hello", "2026-01-01T00:00:00Z");
        entry.raw_result = Some(payload_with_content("hi there"));
        let conversation = ChatConversation {
            id: "c1".to_string(),
            entries: vec![entry],
        };
        let cache = TimelineViewCache::new();
        let timeline = cache.render(&conversation);
        assert_eq!(timeline.rows.len(), 1);
        assert_eq!(timeline.rows[0].turn.as_ref().unwrap().final_response, "hi there");
    }

    #[test]
    fn cache_invalidates_when_checksum_changes() {
        let mut entry = ChatEntry::pending("e1", "hello", "2026-01-01T00:00:00Z");
        entry.raw_result = Some(payload_with_content("first"));
        let mut conversation = ChatConversation {
            id: "c1".to_string(),
            entries: vec![entry],
        };
        let cache = TimelineViewCache::new();
        let first = cache.render(&conversation);
        assert_eq!(first.rows[0].turn.as_ref().unwrap().final_response, "first");

        let mut updated = payload_with_content("second");
        updated.timeline_checksum = "different".to_string();
        conversation.entries[0].raw_result = Some(updated);
        let second = cache.render(&conversation);
        assert_eq!(second.rows[0].turn.as_ref().unwrap().final_response, "second");
    }

    #[test]
    fn missing_prompt_timestamp_is_flagged() {
        let entry = ChatEntry::pending("e1", "hello", "");
        let conversation = ChatConversation {
            id: "c1".to_string(),
            entries: vec![entry],
        };
        let cache = TimelineViewCache::new();
        let timeline = cache.render(&conversation);
        assert!(timeline.rows[0].prompt.prompt_at.missing);
    }
}
