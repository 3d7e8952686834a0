//! Value types of the research workflow: tasks, budget, findings, brief, review decision.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Who asked for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requester {
    Supervisor,
    SubAgent,
    Reviewer,
    User,
}

/// One unit of research work. Immutable once created; identity is `id`.
///
/// `priority`: 1 is highest, larger numbers run later in the planner's view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub topic: String,
    pub query: String,
    pub priority: u8,
    pub requested_by: Requester,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        query: impl Into<String>,
        priority: u8,
        requested_by: Requester,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            query: query.into(),
            priority,
            requested_by,
        }
    }
}

/// Consumable counters bounding one run. Counters only grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub iterations: u32,
    pub max_iterations: u32,
    /// Cap on total findings accumulated across the run.
    pub max_workers: u32,
    pub searches_used: u32,
    pub max_searches_per_worker: u32,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            iterations: 0,
            max_iterations: 20,
            max_workers: 20,
            searches_used: 0,
            max_searches_per_worker: 2,
        }
    }
}

impl Budget {
    /// True when no further supervisor turn may dispatch work.
    pub fn is_exhausted(&self, total_findings: usize) -> bool {
        self.iterations >= self.max_iterations || total_findings >= self.max_workers as usize
    }

    /// One supervisor turn: `iterations + 1`, everything else unchanged.
    pub fn advance(&self) -> Budget {
        Budget {
            iterations: self.iterations.saturating_add(1),
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    PeerReviewed,
    Academic,
    Preprint,
    Government,
    News,
    Blog,
    Web,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Where a claim came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default)]
    pub credibility_score: f64,
    #[serde(default)]
    pub source_type: SourceType,
}

/// One extracted, cited claim. Appended to state, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub claim: String,
    pub citation: Citation,
    pub topic: String,
    /// In `[0, 1]`.
    pub credibility_score: f64,
}

/// Output of the scope stage; defines what to research.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub scope: String,
    pub sub_topics: Vec<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub deliverables: String,
    /// Requested report format (see `ReportFormat::parse`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Tool sources the workers may use (e.g. `web`, `academic`).
    #[serde(default)]
    pub enabled_sources: Vec<String>,
}

/// Gap-analysis result kept in state for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gaps {
    pub has_gaps: bool,
    pub gaps_identified: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What the reviewer asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Refine,
    ReResearch,
    /// Anything unrecognised. Ends the run.
    #[serde(other)]
    Unknown,
}

impl ReviewAction {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => ReviewAction::Approve,
            "refine" => ReviewAction::Refine,
            "re_research" => ReviewAction::ReResearch,
            _ => ReviewAction::Unknown,
        }
    }
}

/// Input supplied when resuming the review pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl ReviewDecision {
    pub fn new(action: ReviewAction, feedback: Option<String>) -> Self {
        Self { action, feedback }
    }

    pub fn approve() -> Self {
        Self::new(ReviewAction::Approve, None)
    }

    /// Reads a decision from a resume value. Missing or malformed input is `Unknown`.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let action = value
            .get("action")
            .and_then(|a| a.as_str())
            .map(ReviewAction::parse)
            .unwrap_or(ReviewAction::Unknown);
        let feedback = value
            .get("feedback")
            .and_then(|f| f.as_str())
            .map(str::to_string);
        Self { action, feedback }
    }
}

/// Report layouts the writer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Summary,
    Comparison,
    Ranking,
    FactValidation,
    LiteratureReview,
    GapAnalysis,
    Other,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Summary => "summary",
            ReportFormat::Comparison => "comparison",
            ReportFormat::Ranking => "ranking",
            ReportFormat::FactValidation => "fact_validation",
            ReportFormat::LiteratureReview => "literature_review",
            ReportFormat::GapAnalysis => "gap_analysis",
            ReportFormat::Other => "other",
        }
    }

    /// Case-insensitive; `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "summary" => ReportFormat::Summary,
            "comparison" => ReportFormat::Comparison,
            "ranking" => ReportFormat::Ranking,
            "fact_validation" => ReportFormat::FactValidation,
            "literature_review" => ReportFormat::LiteratureReview,
            "gap_analysis" => ReportFormat::GapAnalysis,
            "other" => ReportFormat::Other,
            _ => return None,
        })
    }

    /// Layout chosen from the findings when the brief asks for none.
    pub fn default_for(findings: &[Finding]) -> Self {
        if findings.is_empty() {
            return ReportFormat::Summary;
        }
        let count = findings.len();
        let topics: HashSet<&str> = findings.iter().map(|f| f.topic.as_str()).collect();
        let avg = findings.iter().map(|f| f.credibility_score).sum::<f64>() / count as f64;

        if count >= 10 && topics.len() >= 4 {
            return if avg >= 0.7 {
                ReportFormat::LiteratureReview
            } else {
                ReportFormat::GapAnalysis
            };
        }
        if topics.len() >= 3 {
            return ReportFormat::Comparison;
        }
        if avg < 0.6 {
            return ReportFormat::FactValidation;
        }
        ReportFormat::Summary
    }
}

/// Tasks in `history` whose id is in neither `completed` nor `failed`, in history
/// order, each id once.
pub fn pending_tasks<'a>(history: &'a [Task], completed: &[String], failed: &[String]) -> Vec<&'a Task> {
    let done: HashSet<&str> = completed
        .iter()
        .chain(failed.iter())
        .map(String::as_str)
        .collect();
    let mut seen = HashSet::new();
    history
        .iter()
        .filter(|t| !done.contains(t.id.as_str()) && seen.insert(t.id.as_str()))
        .collect()
}
