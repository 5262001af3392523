//! Canonical timeline construction, checksumming, and integrity
//! assessment.
//!
//! Translated directly from the canonical-timeline utilities of the
//! system this runtime replaces: a SHA-256 checksum over the stable JSON
//! encoding of each entry's `{kind, sequence, occurred_at, step_index,
//! call_id, status}` fields, plus a structural integrity check that
//! classifies a loaded timeline as `valid`, `missing`, or `damaged`.

use crate::run_contract::{
    AgentEvent, AgentEventKind, AgentEventLog, AgentTimelineEntry, LlmTrace, TimelineEntryKind,
    ToolResultSnapshot, ToolStatus,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Build the canonical timeline from a run's raw event log, tool
/// snapshots, and LLM trace.
///
/// Primary events are collected one per `llm_step`, one per
/// `tool_started` (or synthesized from the earliest snapshot observation
/// when the event is missing), and one per terminal `agent_finished` /
/// `agent_cancelled`. When the event log is empty but snapshots or trace
/// data exist (e.g. after a partial cancellation before any event was
/// recorded), the timeline is synthesized directly from those instead.
pub fn build_timeline(
    events: &AgentEventLog,
    tool_results: &[ToolResultSnapshot],
    llm_trace: &LlmTrace,
) -> Vec<AgentTimelineEntry> {
    let mut entries: Vec<AgentTimelineEntry> = Vec::new();

    if !events.is_empty() {
        for event in events {
            match event.kind {
                AgentEventKind::LlmStep => {
                    let step_index = event
                        .payload
                        .get("step_index")
                        .and_then(|v| v.as_u64())
                        .map(|v| v as usize);
                    entries.push(AgentTimelineEntry {
                        kind: TimelineEntryKind::LlmStep,
                        sequence: event.sequence,
                        occurred_at: event.occurred_at.clone(),
                        step_index,
                        call_id: None,
                        status: None,
                    });
                }
                AgentEventKind::ToolStarted => {
                    let call_id = event
                        .payload
                        .get("call_id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    entries.push(AgentTimelineEntry {
                        kind: TimelineEntryKind::ToolCall,
                        sequence: event.sequence,
                        occurred_at: event.occurred_at.clone(),
                        step_index: None,
                        call_id,
                        status: None,
                    });
                }
                AgentEventKind::AgentFinished | AgentEventKind::AgentCancelled => {
                    let status = event
                        .payload
                        .get("status")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    entries.push(AgentTimelineEntry {
                        kind: TimelineEntryKind::AgentFinished,
                        sequence: event.sequence,
                        occurred_at: event.occurred_at.clone(),
                        step_index: None,
                        call_id: None,
                        status,
                    });
                }
                // tool_update/tool_completed/tool_failed and
                // llm_step_started are intermediate micro-events; the
                // timeline captures one entry per LLM step and per tool
                // call, not every observer-facing update.
                _ => {}
            }
        }
    } else if !tool_results.is_empty() || !llm_trace.steps.is_empty() {
        for step in &llm_trace.steps {
            entries.push(AgentTimelineEntry {
                kind: TimelineEntryKind::LlmStep,
                sequence: step.index as u64,
                occurred_at: step.occurred_at.clone(),
                step_index: Some(step.index),
                call_id: None,
                status: None,
            });
        }
        for snapshot in tool_results {
            entries.push(AgentTimelineEntry {
                kind: TimelineEntryKind::ToolCall,
                sequence: snapshot.sequence,
                occurred_at: snapshot
                    .started_at
                    .clone()
                    .unwrap_or_else(|| snapshot.last_observed_at.clone().unwrap_or_default()),
                step_index: None,
                call_id: Some(snapshot.call_id.clone()),
                status: None,
            });
        }
    }

    // Populate tool_call status from the matching snapshot's final status.
    for entry in entries.iter_mut() {
        if entry.kind == TimelineEntryKind::ToolCall {
            if let Some(call_id) = &entry.call_id {
                if let Some(snapshot) = tool_results.iter().find(|s| &s.call_id == call_id) {
                    entry.status = Some(status_label(snapshot.status));
                }
            }
        }
    }

    entries.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then_with(|| a.occurred_at.cmp(&b.occurred_at))
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.call_id.cmp(&b.call_id))
    });

    entries
}

fn status_label(status: ToolStatus) -> String {
    match status {
        ToolStatus::Pending => "pending",
        ToolStatus::Running => "running",
        ToolStatus::Succeeded => "succeeded",
        ToolStatus::Failed => "failed",
    }
    .to_string()
}

/// SHA-256 hex digest over the ordered, stable JSON encoding of each
/// entry's `{kind, sequence, occurred_at, step_index, call_id, status}`
/// fields (sorted keys, no whitespace, UTF-8).
pub fn timeline_checksum(timeline: &[AgentTimelineEntry]) -> String {
    let mut digest = Sha256::new();
    for entry in timeline {
        digest.update(stable_dump(entry));
    }
    format!("{:x}", digest.finalize())
}

fn stable_dump(entry: &AgentTimelineEntry) -> Vec<u8> {
    let mut normalized: BTreeMap<&'static str, serde_json::Value> = BTreeMap::new();
    normalized.insert(
        "kind",
        serde_json::to_value(entry.kind).expect("TimelineEntryKind serializes"),
    );
    normalized.insert("sequence", serde_json::json!(entry.sequence));
    normalized.insert("occurred_at", serde_json::json!(entry.occurred_at));
    normalized.insert("step_index", serde_json::json!(entry.step_index));
    normalized.insert("call_id", serde_json::json!(entry.call_id));
    normalized.insert("status", serde_json::json!(entry.status));
    serde_json::to_string(&normalized)
        .expect("normalized entry serializes")
        .into_bytes()
}

/// Classification of a loaded timeline's structural consistency.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    Valid,
    Missing,
    Damaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssue {
    MissingSequence,
    DuplicateSequence,
    NonContiguousSequence,
    MissingCallId,
    DuplicateCallId,
    ChecksumMismatch,
    ChecksumError,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimelineIntegrity {
    pub status: IntegrityStatus,
    pub checksum: Option<String>,
    pub issues: Vec<IntegrityIssue>,
}

/// Classify a timeline's consistency without mutating it.
///
/// `missing` is reserved for the absent-timeline case; everything else is
/// either `valid` (no issues, checksum matches when supplied) or
/// `damaged` with the list of issues found.
pub fn assess_timeline_integrity(
    timeline: &[AgentTimelineEntry],
    declared_checksum: Option<&str>,
) -> TimelineIntegrity {
    if timeline.is_empty() {
        return TimelineIntegrity {
            status: IntegrityStatus::Missing,
            checksum: None,
            issues: Vec::new(),
        };
    }

    let mut issues = Vec::new();
    let mut sequences = Vec::new();
    let mut call_ids = std::collections::HashSet::new();

    for entry in timeline {
        sequences.push(entry.sequence);
        if entry.kind == TimelineEntryKind::ToolCall {
            match &entry.call_id {
                None => issues.push(IntegrityIssue::MissingCallId),
                Some(id) if !call_ids.insert(id.clone()) => {
                    issues.push(IntegrityIssue::DuplicateCallId)
                }
                Some(_) => {}
            }
        }
    }

    if !sequences.is_empty() {
        let unique: std::collections::BTreeSet<u64> = sequences.iter().copied().collect();
        if unique.len() != sequences.len() {
            issues.push(IntegrityIssue::DuplicateSequence);
        }
        let sorted: Vec<u64> = unique.into_iter().collect();
        let mut expected = sorted[0];
        for value in &sorted {
            if *value != expected {
                issues.push(IntegrityIssue::NonContiguousSequence);
                break;
            }
            expected += 1;
        }
    }

    let checksum = timeline_checksum(timeline);
    if let Some(declared) = declared_checksum {
        if !declared.is_empty() && declared != checksum {
            issues.push(IntegrityIssue::ChecksumMismatch);
        }
    }

    let status = if issues.is_empty() {
        IntegrityStatus::Valid
    } else {
        IntegrityStatus::Damaged
    };

    TimelineIntegrity {
        status,
        checksum: Some(checksum),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: TimelineEntryKind, sequence: u64, call_id: Option<&str>) -> AgentTimelineEntry {
        AgentTimelineEntry {
            kind,
            sequence,
            occurred_at: format!("2026-01-01T00:00:{:02}Z", sequence),
            step_index: None,
            call_id: call_id.map(|s| s.to_string()),
            status: Some("succeeded".to_string()),
        }
    }

    #[test]
    fn checksum_is_deterministic_and_order_sensitive() {
        let a = vec![
            entry(TimelineEntryKind::LlmStep, 0, None),
            entry(TimelineEntryKind::ToolCall, 1, Some("c1")),
        ];
        let b = vec![
            entry(TimelineEntryKind::ToolCall, 1, Some("c1")),
            entry(TimelineEntryKind::LlmStep, 0, None),
        ];
        assert_eq!(timeline_checksum(&a), timeline_checksum(&a));
        assert_ne!(timeline_checksum(&a), timeline_checksum(&b));
    }

    #[test]
    fn rebuilding_timeline_from_same_inputs_is_idempotent() {
        let events: AgentEventLog = vec![AgentEvent {
            kind: AgentEventKind::AgentFinished,
            occurred_at: "2026-01-01T00:00:00Z".to_string(),
            sequence: 0,
            payload: serde_json::json!({"status": "succeeded"}),
        }];
        let t1 = build_timeline(&events, &[], &LlmTrace::default());
        let t2 = build_timeline(&events, &[], &LlmTrace::default());
        assert_eq!(timeline_checksum(&t1), timeline_checksum(&t2));
    }

    #[test]
    fn valid_timeline_has_no_issues() {
        let timeline = vec![entry(TimelineEntryKind::LlmStep, 0, None)];
        let checksum = timeline_checksum(&timeline);
        let integrity = assess_timeline_integrity(&timeline, Some(&checksum));
        assert_eq!(integrity.status, IntegrityStatus::Valid);
        assert!(integrity.issues.is_empty());
    }

    #[test]
    fn duplicate_call_id_is_flagged_as_damaged() {
        let timeline = vec![
            entry(TimelineEntryKind::ToolCall, 0, Some("dup")),
            entry(TimelineEntryKind::ToolCall, 1, Some("dup")),
        ];
        let integrity = assess_timeline_integrity(&timeline, None);
        assert_eq!(integrity.status, IntegrityStatus::Damaged);
        assert!(integrity.issues.contains(&IntegrityIssue::DuplicateCallId));
    }

    #[test]
    fn checksum_mismatch_is_flagged() {
        let timeline = vec![entry(TimelineEntryKind::LlmStep, 0, None)];
        let integrity = assess_timeline_integrity(&timeline, Some("deadbeef"));
        assert!(integrity
            .issues
            .contains(&IntegrityIssue::ChecksumMismatch));
    }

    #[test]
    fn empty_timeline_is_missing_not_damaged() {
        let integrity = assess_timeline_integrity(&[], None);
        assert_eq!(integrity.status, IntegrityStatus::Missing);
    }
}
