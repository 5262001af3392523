//! Chat Entry & Conversation Store contract.
//!
//! The core does not implement persistence; it only specifies the
//! invariants a store must uphold (round-trip idempotence, lazy loading,
//! partial-corruption tolerance). [`InMemoryConversationStore`] is a
//! reference implementation used by tests and by embedders with no
//! durable backend of their own, grounded on the upstream toolkit's
//! in-memory `UnifiedMcpServer` state pattern.

use crate::errors::AgentError;
use crate::run_contract::{AgentRunPayload, ConversationMessage, ReasoningSegment};
use crate::timeline::{assess_timeline_integrity, IntegrityStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Coarse classification of a `ChatEntry`'s timeline, recomputed from
/// `raw_result` on every load. `unknown` covers an entry that has not
/// been through a load pass yet (e.g. freshly appended, pre-recompute);
/// `missing` is reserved for a `raw_result` with an empty timeline, per
/// [`IntegrityStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimelineStatus {
    Valid,
    Damaged,
    Missing,
    #[default]
    Unknown,
}

impl From<IntegrityStatus> for TimelineStatus {
    fn from(status: IntegrityStatus) -> Self {
        match status {
            IntegrityStatus::Valid => TimelineStatus::Valid,
            IntegrityStatus::Damaged => TimelineStatus::Damaged,
            IntegrityStatus::Missing => TimelineStatus::Missing,
        }
    }
}

/// A SHA-256 digest of some text paired with the token count it was
/// computed for, so a cache hit can be told apart from a stale one
/// without recounting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenCacheEntry {
    pub digest: String,
    pub token_count: u64,
}

/// Per-model token cache, one entry per field whose digest is taken over
/// the prompt/response text or the canonical JSON of the context
/// messages. A mismatched digest invalidates that field's cached count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelTokenCache {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<TokenCacheEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<TokenCacheEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<TokenCacheEntry>,
}

/// Compute the digest a [`ModelTokenCache`] entry for `text` should carry.
pub fn digest_text(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute the digest a context-messages cache entry should carry: the
/// SHA-256 of the messages' canonical (sorted-key, compact) JSON.
pub fn digest_context_messages(messages: &[ConversationMessage]) -> String {
    let canonical = serde_json::to_string(messages).unwrap_or_default();
    digest_text(&canonical)
}

/// One entry in a conversation: the prompt that produced it and, once
/// the run completes, its result plus the fields denormalized from it
/// for cheap display without deserializing the whole `raw_result`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatEntry {
    pub id: String,
    pub prompt: String,
    pub prompt_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<AgentRunPayload>,
    #[serde(default)]
    pub token_info: HashMap<String, crate::client_wrapper::TokenUsage>,
    #[serde(default)]
    pub token_cache: HashMap<String, ModelTokenCache>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_messages: Option<Vec<ConversationMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Vec<ReasoningSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_messages: Option<Vec<ConversationMessage>>,
    #[serde(default)]
    pub timeline_status: TimelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_checksum: Option<String>,
    #[serde(default)]
    pub regenerated: bool,
}

impl ChatEntry {
    pub fn pending(id: impl Into<String>, prompt: impl Into<String>, prompt_at: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            prompt_at: prompt_at.into(),
            response: None,
            display_response: None,
            response_at: None,
            raw_result: None,
            token_info: HashMap::new(),
            token_cache: HashMap::new(),
            context_messages: None,
            reasoning: None,
            tool_messages: None,
            timeline_status: TimelineStatus::Missing,
            timeline_checksum: None,
            regenerated: false,
        }
    }

    /// Attach a finished run's payload, denormalizing `response`,
    /// `reasoning`, and `tool_messages` from it and recomputing
    /// `timeline_status`/`timeline_checksum`.
    pub fn complete(mut self, raw_result: AgentRunPayload, response_at: impl Into<String>) -> Self {
        self.response = Some(raw_result.result_text.clone());
        self.display_response = Some(raw_result.result_text.clone());
        self.response_at = Some(response_at.into());
        self.reasoning = raw_result.reasoning.clone();
        self.tool_messages = if raw_result.tool_results.is_empty() {
            None
        } else {
            Some(
                raw_result
                    .tool_results
                    .iter()
                    .map(|snapshot| {
                        ConversationMessage::tool_result(
                            &snapshot.call_id,
                            &snapshot.tool_name,
                            serde_json::to_string(&snapshot.result.clone().unwrap_or(serde_json::Value::Null))
                                .unwrap_or_default(),
                        )
                    })
                    .collect(),
            )
        };
        self.raw_result = Some(raw_result);
        self.recompute_timeline_status();
        self
    }

    /// Recompute `timeline_status`/`timeline_checksum` from `raw_result`.
    /// Called on every store load, per the store contract.
    pub fn recompute_timeline_status(&mut self) {
        match &self.raw_result {
            None => {
                self.timeline_status = TimelineStatus::Missing;
                self.timeline_checksum = None;
            }
            Some(payload) => {
                let integrity = assess_timeline_integrity(&payload.timeline, Some(&payload.timeline_checksum));
                self.timeline_status = integrity.status.into();
                self.timeline_checksum = integrity.checksum;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatConversation {
    pub id: String,
    pub entries: Vec<ChatEntry>,
}

/// Storage contract. A persisted entry with `raw_result` set must
/// round-trip: serialize, deserialize, serialize again produces
/// byte-identical JSON; partial corruption in one entry must not fail
/// the whole load, only elide that entry.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, conversation_id: &str) -> Result<ChatConversation, AgentError>;
    async fn append_entry(&self, conversation_id: &str, entry: ChatEntry) -> Result<(), AgentError>;
    async fn list_conversations(&self) -> Result<Vec<String>, AgentError>;
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, ChatConversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, conversation_id: &str) -> Result<ChatConversation, AgentError> {
        let conversations = self.conversations.read().unwrap();
        let mut conversation = conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| ChatConversation {
                id: conversation_id.to_string(),
                entries: Vec::new(),
            });
        for entry in &mut conversation.entries {
            entry.recompute_timeline_status();
        }
        Ok(conversation)
    }

    async fn append_entry(&self, conversation_id: &str, entry: ChatEntry) -> Result<(), AgentError> {
        let mut conversations = self.conversations.write().unwrap();
        let conversation = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ChatConversation {
                id: conversation_id.to_string(),
                entries: Vec::new(),
            });
        conversation.entries.push(entry);
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<String>, AgentError> {
        let conversations = self.conversations.read().unwrap();
        let mut ids: Vec<String> = conversations.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
