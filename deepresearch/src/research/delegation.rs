//! Worker-to-supervisor delegation requests embedded in worker output.
//!
//! Format: `DELEGATION_REQUEST: topic='<topic>', reason='<reason>'`. One worker run
//! delegates at most one task; requests that do not match are logged and ignored.

use std::sync::OnceLock;

use regex::Regex;

use super::model::{Requester, Task};

fn pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"DELEGATION_REQUEST:\s*topic='([^']+)',\s*reason='([^']+)'").ok()
        })
        .as_ref()
}

/// Id a delegated topic maps to; equal topics (ignoring case) share one task.
pub fn delegated_task_id(topic: &str) -> String {
    format!("delegated_{}", topic.trim().to_lowercase().replace(' ', "_"))
}

const MARKER: &str = "DELEGATION_REQUEST";

/// The task requested in `output`, taken from the first well-formed request.
///
/// Priority is one below the parent (larger number, later in line). A request that
/// names the marker but does not parse is logged and ignored.
pub fn parse_delegation(task_id: &str, output: &str, parent_priority: u8) -> Option<Task> {
    if !output.contains(MARKER) {
        return None;
    }
    let Some(re) = pattern() else {
        tracing::warn!(task_id, "malformed delegation request ignored");
        return None;
    };
    let Some(caps) = re.captures(output) else {
        tracing::warn!(task_id, "malformed delegation request ignored");
        return None;
    };
    let (Some(whole), Some(topic), Some(reason)) = (caps.get(0), caps.get(1), caps.get(2)) else {
        tracing::warn!(task_id, "malformed delegation request ignored");
        return None;
    };
    if output.find(MARKER).is_some_and(|first| first < whole.start()) {
        tracing::warn!(task_id, "malformed delegation request ignored");
    }
    let topic = topic.as_str().trim();
    let reason = reason.as_str().trim();
    if topic.is_empty() {
        tracing::warn!(task_id, reason, "malformed delegation request ignored");
        return None;
    }
    Some(Task::new(
        delegated_task_id(topic),
        topic,
        format!("{} - {}", topic, reason),
        parent_priority.saturating_add(1),
        Requester::SubAgent,
    ))
}
