//! Run Controller / Executor: a single-worker task queue serializing
//! agent runs per session.
//!
//! Grounded on the upstream toolkit's `UnifiedMcpServer`'s
//! `Arc<RwLock<HashMap<...>>>` aggregation pattern (`mcp_server.rs`),
//! generalized from "route a tool call to the right protocol" to "queue
//! and run at most one agent turn per session at a time".

use crate::agent::Agent;
use crate::cancellation::CancellationToken;
use crate::run_contract::{AgentRunPayload, ConversationMessage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// One queued prompt submission.
struct Job {
    system_prompt: String,
    context_messages: Vec<ConversationMessage>,
    history: Vec<ConversationMessage>,
    prompt: String,
    cancellation: CancellationToken,
    reply: oneshot::Sender<AgentRunPayload>,
}

struct SessionQueue {
    sender: mpsc::UnboundedSender<Job>,
    active_cancellation: Mutex<Option<CancellationToken>>,
}

/// Owns one FIFO worker per session id, so two prompts submitted to the
/// same session never run concurrently while prompts to different
/// sessions proceed independently.
pub struct RunController {
    agent: Arc<Agent>,
    sessions: Mutex<HashMap<String, Arc<SessionQueue>>>,
}

impl RunController {
    pub fn new(agent: Arc<Agent>) -> Arc<Self> {
        Arc::new(Self {
            agent,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn queue_for(self: &Arc<Self>, session_id: &str) -> Arc<SessionQueue> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(queue) = sessions.get(session_id) {
            return queue.clone();
        }

        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let queue = Arc::new(SessionQueue {
            sender,
            active_cancellation: Mutex::new(None),
        });
        sessions.insert(session_id.to_string(), queue.clone());

        let agent = self.agent.clone();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let payload = agent
                    .run_turn(
                        &job.system_prompt,
                        &job.context_messages,
                        &job.history,
                        &job.prompt,
                        &job.cancellation,
                        &crate::agent::NullObserver,
                    )
                    .await;
                let _ = job.reply.send(payload);
            }
        });

        queue
    }

    /// Trim and reject an empty prompt; otherwise enqueue it behind any
    /// run already in flight for `session_id` and await the result.
    pub async fn submit_prompt(
        self: &Arc<Self>,
        session_id: &str,
        system_prompt: &str,
        context_messages: Vec<ConversationMessage>,
        history: Vec<ConversationMessage>,
        prompt: &str,
    ) -> Result<AgentRunPayload, crate::errors::AgentError> {
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(crate::errors::AgentError::Validation(
                "prompt must not be empty".to_string(),
            ));
        }

        let queue = self.queue_for(session_id);
        let cancellation = CancellationToken::new();
        *queue.active_cancellation.lock().unwrap() = Some(cancellation.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            system_prompt: system_prompt.to_string(),
            context_messages,
            history,
            prompt: trimmed.to_string(),
            cancellation,
            reply: reply_tx,
        };
        queue
            .sender
            .send(job)
            .map_err(|_| crate::errors::AgentError::Internal("run queue closed".to_string()))?;

        reply_rx
            .await
            .map_err(|_| crate::errors::AgentError::Internal("run worker dropped reply".to_string()))
    }

    /// Cancel the active run for `session_id`, if any.
    pub fn stop(&self, session_id: &str) {
        let sessions = self.sessions.lock().unwrap();
        if let Some(queue) = sessions.get(session_id) {
            if let Some(token) = queue.active_cancellation.lock().unwrap().as_ref() {
                token.cancel();
            }
        }
    }
}

/// Additive merge of streamed [`crate::run_contract::ToolResultSnapshot`]s
/// by `call_id`: a later snapshot with the same id replaces the earlier
/// one in place; snapshots without a match are appended in arrival order.
pub fn merge_tool_snapshot(
    existing: &mut Vec<crate::run_contract::ToolResultSnapshot>,
    incoming: crate::run_contract::ToolResultSnapshot,
) {
    if let Some(slot) = existing.iter_mut().find(|s| s.call_id == incoming.call_id) {
        *slot = incoming;
    } else {
        existing.push(incoming);
    }
}
