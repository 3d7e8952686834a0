//! Report stage: aggregates the findings and has the writer produce markdown.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StageError;
use crate::graph::{Next, Node};

use super::aggregate::aggregate;
use super::collaborators::{ReportRequest, ReportWriter};
use super::model::{ReportFormat, ResearchBrief};
use super::state::{StateUpdate, WorkflowState};
use super::REPORT;

pub struct ReportNode {
    writer: Arc<dyn ReportWriter>,
}

impl ReportNode {
    pub fn new(writer: Arc<dyn ReportWriter>) -> Self {
        Self { writer }
    }
}

/// Report used when nothing survived aggregation; the writer is not called.
pub fn no_findings_report(brief: &ResearchBrief) -> String {
    let sub_topics: String = brief
        .sub_topics
        .iter()
        .map(|t| format!("- {}\n", t))
        .collect();
    format!(
        "# Research Report: {scope}\n\n\
         ## Overview\n\n\
         This report was generated based on the following research brief:\n\n\
         **Scope**: {scope}\n\n\
         **Sub-topics**:\n{sub_topics}\n\
         ## Findings\n\n\
         No research findings were available to generate this report.\n\n\
         ## Conclusion\n\n\
         Unable to complete research due to lack of findings. Please expand the research scope or try different search queries.\n",
        scope = brief.scope,
        sub_topics = sub_topics,
    )
}

#[async_trait]
impl Node<WorkflowState> for ReportNode {
    fn id(&self) -> &str {
        REPORT
    }

    async fn run(&self, state: WorkflowState) -> Result<(StateUpdate, Next), StageError> {
        let Some(brief) = state.brief.clone() else {
            return Ok((
                StateUpdate {
                    report_content: Some(
                        "Error: No research brief available for report generation.".into(),
                    ),
                    errors: vec!["Missing research brief".into()],
                    ..Default::default()
                },
                Next::Continue,
            ));
        };

        let findings = aggregate(&state.findings);
        if findings.is_empty() {
            tracing::info!("no findings survived aggregation; writing placeholder report");
            return Ok((
                StateUpdate {
                    report_content: Some(no_findings_report(&brief)),
                    reviewer_feedback: Some(None),
                    ..Default::default()
                },
                Next::Continue,
            ));
        }

        let format = brief
            .format
            .as_deref()
            .and_then(ReportFormat::parse)
            .unwrap_or_else(|| ReportFormat::default_for(&findings));
        tracing::info!(
            format = format.as_str(),
            findings = findings.len(),
            refining = state.reviewer_feedback.is_some(),
            "generating report"
        );
        let request = ReportRequest {
            brief,
            findings,
            format,
            reviewer_feedback: state.reviewer_feedback.clone(),
        };

        let update = match self.writer.write(request).await {
            Ok(report) => StateUpdate {
                report_content: Some(report),
                reviewer_feedback: Some(None),
                ..Default::default()
            },
            Err(e) => {
                tracing::error!(error = %e, "report generation failed");
                StateUpdate {
                    report_content: Some(format!("Error generating report: {}", e)),
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        };
        Ok((update, Next::Continue))
    }
}
