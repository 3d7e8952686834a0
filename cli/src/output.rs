//! Rendering of run events, thread snapshots and history for the terminal.
//!
//! Text mode prints one short line per stage change and the full report when review is
//! requested. `--json` prints every event as one JSON object per line (NDJSON).

use deepresearch::research::{ConversationSummary, ResearchEvent, Role, StateUpdate, WorkflowState};
use deepresearch::{CheckpointNext, StateSnapshot, StreamEvent};
use serde_json::json;

/// Default max length for error and summary lines; 0 disables truncation.
pub const DEFAULT_MAX_LINE_LEN: usize = 200;

/// Shortens `s` to `max` characters, the last three being `...`. `max == 0` keeps `s`.
pub fn truncate_message(s: &str, max: usize) -> String {
    if max == 0 || s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

pub struct EventPrinter {
    json: bool,
    max_len: usize,
    interrupted: bool,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            max_len: DEFAULT_MAX_LINE_LEN,
            interrupted: false,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// True once an interrupt event was rendered.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn thread_line(&self, thread_id: &str) -> Result<String, serde_json::Error> {
        if self.json {
            serde_json::to_string(&json!({"type": "thread", "thread_id": thread_id}))
        } else {
            Ok(format!("thread: {}", thread_id))
        }
    }

    /// Lines for one event; empty when text mode has nothing to show for it.
    pub fn render(&mut self, event: &ResearchEvent) -> Result<Vec<String>, serde_json::Error> {
        if let StreamEvent::Interrupt { .. } = event {
            self.interrupted = true;
        }
        if self.json {
            return Ok(vec![serde_json::to_string(&event.to_value()?)?]);
        }
        Ok(match event {
            StreamEvent::Values(_) => Vec::new(),
            StreamEvent::Updates {
                node_id,
                task_index,
                update,
            } => {
                let label = match task_index {
                    Some(i) => format!("[{}#{}]", node_id, i),
                    None => format!("[{}]", node_id),
                };
                self.update_lines(&label, update)
            }
            StreamEvent::Checkpoint(cp) => {
                vec![format!("[checkpoint] step {} {}", cp.step, cp.checkpoint_id)]
            }
            StreamEvent::TaskStart { node_id, .. } => vec![format!("[{}] started", node_id)],
            StreamEvent::TaskEnd {
                node_id,
                result: Err(e),
                ..
            } => vec![format!("[{}] failed: {}", node_id, self.cut(e))],
            StreamEvent::TaskEnd { .. } => Vec::new(),
            StreamEvent::Interrupt { node_id, interrupt } => {
                let report = interrupt
                    .value
                    .get("report")
                    .and_then(|r| r.as_str())
                    .unwrap_or_default();
                vec![
                    String::new(),
                    report.to_string(),
                    String::new(),
                    format!("[{}] waiting for review", node_id),
                ]
            }
            StreamEvent::Error { message } => vec![format!("error: {}", message)],
        })
    }

    fn update_lines(&self, label: &str, update: &StateUpdate) -> Vec<String> {
        let mut lines = Vec::new();
        for message in update.messages.iter().filter(|m| m.role == Role::Assistant) {
            lines.push(format!("{} {}", label, message.content));
        }
        if !update.task_history.is_empty() {
            let ids: Vec<&str> = update.task_history.iter().map(|t| t.id.as_str()).collect();
            lines.push(format!("{} planned: {}", label, ids.join(", ")));
        }
        for id in &update.completed {
            lines.push(format!(
                "{} completed {} ({} findings)",
                label,
                id,
                update.findings.len()
            ));
        }
        for id in &update.failed {
            lines.push(format!("{} failed {}", label, id));
        }
        if let Some(gaps) = update.gaps.as_ref().filter(|g| g.has_gaps) {
            lines.push(format!(
                "{} gaps: {}",
                label,
                self.cut(&gaps.gaps_identified.join("; "))
            ));
        }
        if update.is_complete == Some(true) {
            lines.push(format!("{} research complete", label));
        }
        if let Some(Some(feedback)) = &update.reviewer_feedback {
            lines.push(format!("{} refining: {}", label, self.cut(feedback)));
        }
        if let Some(report) = &update.report_content {
            lines.push(format!("{} report ready ({} chars)", label, report.chars().count()));
        }
        for e in &update.errors {
            lines.push(format!("{} error: {}", label, self.cut(e)));
        }
        lines
    }

    fn cut(&self, s: &str) -> String {
        truncate_message(s, self.max_len)
    }
}

fn next_label(next: &CheckpointNext) -> String {
    match next {
        CheckpointNext::Node { node } => format!("runs {}", node),
        CheckpointNext::Route { source } => format!("routes from {}", source),
        CheckpointNext::Interrupted { node, .. } => format!("waiting at {}", node),
        CheckpointNext::End => "finished".to_string(),
    }
}

/// `state` command output.
pub fn render_snapshot(
    snapshot: &StateSnapshot<WorkflowState>,
    json: bool,
) -> Result<String, serde_json::Error> {
    if json {
        return serde_json::to_string(&json!({
            "checkpoint_id": snapshot.checkpoint_id,
            "step": snapshot.step,
            "created_at": snapshot.created_at,
            "next": snapshot.next,
            "state": snapshot.state,
        }));
    }
    let state = &snapshot.state;
    let mut lines = vec![
        format!("checkpoint: {} (step {})", snapshot.checkpoint_id, snapshot.step),
        format!("status: {}", next_label(&snapshot.next)),
    ];
    if let Some(brief) = &state.brief {
        lines.push(format!("scope: {}", brief.scope));
    }
    lines.push(format!(
        "budget: iteration {}/{}, searches {}",
        state.budget.iterations, state.budget.max_iterations, state.budget.searches_used
    ));
    lines.push(format!(
        "tasks: {} planned, {} completed, {} failed",
        state.task_history.len(),
        state.completed.len(),
        state.failed.len()
    ));
    lines.push(format!("findings: {}", state.findings.len()));
    for e in &state.errors {
        lines.push(format!("error: {}", truncate_message(e, DEFAULT_MAX_LINE_LEN)));
    }
    Ok(lines.join("\n"))
}

/// `history` command output.
pub fn render_history(
    items: &[ConversationSummary],
    json: bool,
) -> Result<String, serde_json::Error> {
    if json {
        return serde_json::to_string(items);
    }
    if items.is_empty() {
        return Ok("no conversations".to_string());
    }
    Ok(items
        .iter()
        .map(|c| {
            format!(
                "{}  {}  {}",
                c.created_at,
                c.conversation_id,
                truncate_message(&c.user_query, 80)
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}
