//! Deterministic scripted collaborators.
//!
//! Used by the CLI's `--offline` mode and by tests. They produce well-formed but
//! canned output, so the engine, routing and persistence can be exercised without
//! any model or search service.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::collaborators::{
    CitationExtractor, Clarification, CollaboratorError, Collaborators, ExecutionOutput,
    GapAnalysis, GapAnalyzer, GapContext, ReportRequest, ReportWriter, ScopeCheck,
    ScopeClarifier, TaskExecutor, ToolHandle, ToolLease, ToolRegistry, ToolResult,
};
use super::model::{Citation, Finding, Message, Requester, ResearchBrief, Role, SourceType, Task};

fn slug(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone)]
enum ScopeMode {
    /// Complete once the request has this many words, or the user answered a question.
    Heuristic { min_words: usize },
    Complete(Vec<String>),
    Clarify,
    Fail(String),
}

/// Scope clarifier with a fixed decision.
#[derive(Debug, Clone)]
pub struct ScriptedScope {
    mode: ScopeMode,
}

impl ScriptedScope {
    /// Offline default: short requests get clarifying questions.
    pub fn heuristic() -> Self {
        Self {
            mode: ScopeMode::Heuristic { min_words: 4 },
        }
    }

    pub fn complete(sub_topics: &[&str]) -> Self {
        Self {
            mode: ScopeMode::Complete(sub_topics.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn needs_clarification() -> Self {
        Self {
            mode: ScopeMode::Clarify,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            mode: ScopeMode::Fail(message.to_string()),
        }
    }

    fn sub_topics_for(&self, user_query: &str) -> Vec<String> {
        if let ScopeMode::Complete(topics) = &self.mode {
            return topics.clone();
        }
        let parts: Vec<String> = user_query
            .split(|c| c == ',' || c == ';')
            .flat_map(|p| p.split(" and "))
            .flat_map(|p| p.split(" vs "))
            .map(|p| p.trim().trim_end_matches('?').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() > 1 {
            parts
        } else {
            vec![
                format!("{}: background", user_query.trim()),
                format!("{}: current evidence", user_query.trim()),
            ]
        }
    }
}

#[async_trait]
impl ScopeClarifier for ScriptedScope {
    async fn check_completion(
        &self,
        user_query: &str,
        history: &[Message],
    ) -> Result<ScopeCheck, CollaboratorError> {
        let is_complete = match &self.mode {
            ScopeMode::Heuristic { min_words } => {
                user_query.split_whitespace().count() >= *min_words
                    || history.iter().any(|m| m.role == Role::User)
            }
            ScopeMode::Complete(_) => true,
            ScopeMode::Clarify => false,
            ScopeMode::Fail(message) => return Err(CollaboratorError::Permanent(message.clone())),
        };
        Ok(ScopeCheck {
            is_complete,
            reasoning: if is_complete {
                "request is specific enough".into()
            } else {
                "request is too broad".into()
            },
        })
    }

    async fn clarification_questions(
        &self,
        user_query: &str,
        _history: &[Message],
    ) -> Result<Clarification, CollaboratorError> {
        if let ScopeMode::Fail(message) = &self.mode {
            return Err(CollaboratorError::Permanent(message.clone()));
        }
        Ok(Clarification {
            context: format!("To research \"{}\" well I need a bit more detail.", user_query.trim()),
            questions: vec![
                "Which aspects matter most to you?".into(),
                "Is there a time period or region to focus on?".into(),
            ],
        })
    }

    async fn generate_brief(
        &self,
        user_query: &str,
        history: &[Message],
    ) -> Result<ResearchBrief, CollaboratorError> {
        if let ScopeMode::Fail(message) = &self.mode {
            return Err(CollaboratorError::Permanent(message.clone()));
        }
        let answers: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        let mut constraints = std::collections::BTreeMap::new();
        if !answers.is_empty() {
            constraints.insert("clarifications".to_string(), serde_json::json!(answers));
        }
        Ok(ResearchBrief {
            scope: user_query.trim().to_string(),
            sub_topics: self.sub_topics_for(user_query),
            constraints,
            deliverables: "A cited markdown report".into(),
            format: None,
            enabled_sources: Vec::new(),
        })
    }
}

/// Gap analyzer that plays a script, then falls back to a simple planner.
///
/// Fallback: plan one task per sub-topic on the first turn; afterwards keep the
/// loop open while tasks are pending, then declare the research complete.
#[derive(Default)]
pub struct ScriptedGapAnalyzer {
    script: Mutex<VecDeque<Result<GapAnalysis, CollaboratorError>>>,
    always_gaps: bool,
    calls: AtomicUsize,
}

impl ScriptedGapAnalyzer {
    pub fn scripted(script: Vec<Result<GapAnalysis, CollaboratorError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Never satisfied and never plans anything; the budget has to stop the loop.
    pub fn always_gaps() -> Self {
        Self {
            always_gaps: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn plan(&self, context: &GapContext) -> GapAnalysis {
        if self.always_gaps {
            return GapAnalysis {
                has_gaps: true,
                is_complete: false,
                gaps_identified: vec!["more evidence needed".into()],
                new_tasks: Vec::new(),
                reasoning: "still incomplete".into(),
            };
        }
        if context.first_turn {
            let new_tasks = context
                .brief
                .sub_topics
                .iter()
                .map(|topic| {
                    Task::new(
                        format!("task_{}", slug(topic)),
                        topic.clone(),
                        format!("{} ({})", topic, context.brief.scope),
                        1,
                        Requester::Supervisor,
                    )
                })
                .collect::<Vec<_>>();
            return GapAnalysis {
                has_gaps: true,
                is_complete: false,
                gaps_identified: context.brief.sub_topics.clone(),
                new_tasks,
                reasoning: "initial plan from the brief's sub-topics".into(),
            };
        }
        if !context.pending.is_empty() {
            return GapAnalysis {
                reasoning: format!("{} tasks still pending", context.pending.len()),
                ..Default::default()
            };
        }
        GapAnalysis {
            has_gaps: false,
            is_complete: true,
            reasoning: format!("{} findings cover the brief", context.total_findings),
            ..Default::default()
        }
    }
}

#[async_trait]
impl GapAnalyzer for ScriptedGapAnalyzer {
    async fn analyze(&self, context: GapContext) -> Result<GapAnalysis, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.plan(&context)),
        }
    }
}

/// Report writer producing a plain markdown listing. Records every request.
#[derive(Default)]
pub struct ScriptedReportWriter {
    requests: Arc<Mutex<Vec<ReportRequest>>>,
    fail: Option<String>,
}

impl ScriptedReportWriter {
    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Shared handle on the requests seen so far.
    pub fn requests(&self) -> Arc<Mutex<Vec<ReportRequest>>> {
        self.requests.clone()
    }
}

#[async_trait]
impl ReportWriter for ScriptedReportWriter {
    async fn write(&self, request: ReportRequest) -> Result<String, CollaboratorError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if let Some(message) = &self.fail {
            return Err(CollaboratorError::Transient(message.clone()));
        }

        let mut report = format!(
            "# Research Report: {}\n\n_Format: {}_\n\n## Findings\n\n",
            request.brief.scope,
            request.format.as_str()
        );
        for finding in &request.findings {
            let link = finding.citation.url.as_deref().unwrap_or("");
            report.push_str(&format!(
                "- {} ([{}]({}), credibility {:.2})\n",
                finding.claim, finding.citation.source, link, finding.credibility_score
            ));
        }
        if let Some(feedback) = &request.reviewer_feedback {
            report.push_str(&format!("\n## Reviewer notes\n\n{}\n", feedback));
        }
        Ok(report)
    }
}

/// Tool registry with a fixed tool list. Counts acquisitions and releases.
pub struct StaticToolRegistry {
    tools: Vec<ToolHandle>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl StaticToolRegistry {
    pub fn new(tools: Vec<ToolHandle>) -> Self {
        Self {
            tools,
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn web() -> Self {
        Self::new(vec![ToolHandle::new("web_search", "web")])
    }

    /// Web and academic search.
    pub fn offline() -> Self {
        Self::new(vec![
            ToolHandle::new("web_search", "web"),
            ToolHandle::new("academic_search", "academic"),
        ])
    }

    pub fn acquired_counter(&self) -> Arc<AtomicUsize> {
        self.acquired.clone()
    }

    pub fn released_counter(&self) -> Arc<AtomicUsize> {
        self.released.clone()
    }
}

#[async_trait]
impl ToolRegistry for StaticToolRegistry {
    async fn acquire(&self, enabled_sources: &[String]) -> Result<ToolLease, CollaboratorError> {
        let tools: Vec<ToolHandle> = self
            .tools
            .iter()
            .filter(|t| enabled_sources.iter().any(|s| s == &t.source))
            .cloned()
            .collect();
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        Ok(ToolLease::new(tools).with_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Executor returning one canned result per tool, up to the search allowance.
#[derive(Default, Clone)]
pub struct ScriptedExecutor {
    failures: HashSet<String>,
    empty: HashSet<String>,
    delegations: HashMap<String, (String, String)>,
    delays: HashMap<String, Duration>,
    panics: HashSet<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn failing(mut self, task_id: &str) -> Self {
        self.failures.insert(task_id.to_string());
        self
    }

    /// The task runs but no tool returns anything.
    pub fn without_results(mut self, task_id: &str) -> Self {
        self.empty.insert(task_id.to_string());
        self
    }

    pub fn delegating(mut self, task_id: &str, topic: &str, reason: &str) -> Self {
        self.delegations
            .insert(task_id.to_string(), (topic.to_string(), reason.to_string()));
        self
    }

    pub fn slow(mut self, task_id: &str, delay: Duration) -> Self {
        self.delays.insert(task_id.to_string(), delay);
        self
    }

    pub fn panicking(mut self, task_id: &str) -> Self {
        self.panics.insert(task_id.to_string());
        self
    }

    /// Task ids in execution order, shared across clones.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        task: &Task,
        tools: &[ToolHandle],
        max_searches: u32,
    ) -> Result<ExecutionOutput, CollaboratorError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task.id.clone());
        if let Some(delay) = self.delays.get(&task.id) {
            tokio::time::sleep(*delay).await;
        }
        if self.panics.contains(&task.id) {
            panic!("executor crashed on {}", task.id);
        }
        if self.failures.contains(&task.id) {
            return Err(CollaboratorError::Permanent(format!(
                "search backend rejected '{}'",
                task.query
            )));
        }

        let tool_results = if self.empty.contains(&task.id) {
            Vec::new()
        } else {
            tools
                .iter()
                .take(max_searches.max(1) as usize)
                .map(|tool| ToolResult {
                    tool: tool.name.clone(),
                    content: format!("Key fact about {} reported by {}", task.topic, tool.source),
                })
                .collect()
        };
        let mut output = format!("Researched: {}", task.query);
        if let Some((topic, reason)) = self.delegations.get(&task.id) {
            output.push_str(&format!(
                "\nDELEGATION_REQUEST: topic='{}', reason='{}'",
                topic, reason
            ));
        }
        Ok(ExecutionOutput {
            output,
            tool_results,
        })
    }
}

/// Extractor turning every content line of the raw tool output into one finding.
#[derive(Debug, Clone)]
pub struct MockExtractor {
    credibility: f64,
    fail: bool,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self {
            credibility: 0.8,
            fail: false,
        }
    }
}

impl MockExtractor {
    pub fn with_credibility(credibility: f64) -> Self {
        Self {
            credibility,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CitationExtractor for MockExtractor {
    async fn extract(&self, raw: &str, topic: &str) -> Result<Vec<Finding>, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Malformed("extractor returned no JSON".into()));
        }
        let mut tool = String::from("unknown");
        let mut findings = Vec::new();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(name) = line
                .strip_prefix("[Source: ")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                tool = name.to_string();
                continue;
            }
            let source_type = if tool.contains("academic") {
                SourceType::Academic
            } else {
                SourceType::Web
            };
            findings.push(Finding {
                claim: line.to_string(),
                citation: Citation {
                    source: tool.clone(),
                    url: Some(format!("https://example.org/{}/{}", slug(topic), slug(&tool))),
                    title: Some(format!("{} ({})", topic, tool)),
                    authors: Vec::new(),
                    doi: None,
                    credibility_score: self.credibility,
                    source_type,
                },
                topic: topic.to_string(),
                credibility_score: self.credibility,
            });
        }
        Ok(findings)
    }
}

/// The collaborator set used by `deepresearch --offline`.
pub fn offline_collaborators() -> Collaborators {
    Collaborators {
        scope: Arc::new(ScriptedScope::heuristic()),
        gaps: Arc::new(ScriptedGapAnalyzer::default()),
        writer: Arc::new(ScriptedReportWriter::default()),
        tools: Arc::new(StaticToolRegistry::offline()),
        executor: Arc::new(ScriptedExecutor::default()),
        extractor: Arc::new(MockExtractor::default()),
    }
}
