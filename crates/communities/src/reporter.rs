use extract::{ChatRequest, LanguageModel, strip_code_fence};
use futures::stream::{self, StreamExt};
use index::{CommunityReport, GraphStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use crate::graph_export::{CommunityView, community_views};

const MAX_PROMPT_MEMBERS: usize = 50;
const MAX_PROMPT_RELATIONSHIPS: usize = 100;

const REPORT_SYSTEM_PROMPT: &str = r#"You are an AI assistant that helps a human analyst to perform general information discovery. Information discovery is the process of identifying and assessing relevant information associated with certain entities (e.g., organizations and individuals) within a network.

Write a comprehensive report of a community, given a list of entities that belong to the community as well as their relationships. The report will be used to inform decision-makers about information associated with the community and their potential impact.

Return output as a well-formed JSON object with exactly these fields:
{
  "title": "short, specific name of the community that includes representative entity names",
  "summary": "executive summary of the community's overall structure, how its entities relate to each other, and significant information associated with them",
  "rating": 5.0,
  "rating_explanation": "a single sentence explaining the rating"
}

"rating" is a float between 0 and 10 scoring the importance or impact of the community. Do not include information that is not supported by the data. Output ONLY the JSON object."#;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("language model failed: {0}")]
    Llm(#[from] extract::LlmError),
    #[error("report does not match the expected schema: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Strict shape of the model's report.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ReportResponse {
    title: String,
    summary: String,
    rating: f64,
    rating_explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportFailure {
    pub community: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportOutcome {
    pub reports: Vec<CommunityReport>,
    pub failures: Vec<ReportFailure>,
    /// Communities with a single member; these never get a report.
    pub singletons: usize,
}

pub fn build_report_prompt(view: &CommunityView) -> String {
    let mut prompt = String::from("Entities\n\nname,types,description\n");
    for member in view.members.iter().take(MAX_PROMPT_MEMBERS) {
        let _ = writeln!(
            prompt,
            "{},{},{}",
            member.name,
            member.types.join("|"),
            member.summary.replace('\n', " ")
        );
    }

    prompt.push_str("\nRelationships\n\nsource,target,types,description\n");
    for rel in view.relationships.iter().take(MAX_PROMPT_RELATIONSHIPS) {
        let _ = writeln!(
            prompt,
            "{},{},{},{}",
            rel.source,
            rel.target,
            rel.relation_types.join("|"),
            rel.description.replace('\n', " ")
        );
    }
    prompt
}

fn parse_report(raw: &str) -> Result<ReportResponse, serde_json::Error> {
    serde_json::from_str(strip_code_fence(raw))
}

/// Writes one report per multi-member community.
pub struct CommunityReporter {
    llm: Arc<dyn LanguageModel>,
    workers: usize,
}

impl CommunityReporter {
    pub fn new(llm: Arc<dyn LanguageModel>, workers: usize) -> Self {
        Self {
            llm,
            workers: workers.max(1),
        }
    }

    /// Replace all community reports with freshly generated ones.
    ///
    /// A failed community is recorded and skipped; only graph errors abort.
    pub async fn report(&self, graph: &dyn GraphStore) -> Result<ReportOutcome, StoreError> {
        graph.clear_communities().await?;

        let entities = graph.entities().await?;
        let relationships = graph.relationships().await?;
        let summarized = graph.summarized_relationships().await?;
        let views = community_views(&entities, &relationships, &summarized);

        let (views, singles): (Vec<CommunityView>, Vec<CommunityView>) =
            views.into_iter().partition(|v| v.members.len() >= 2);

        tracing::info!(
            communities = views.len(),
            singletons = singles.len(),
            workers = self.workers,
            "generating community reports"
        );

        let results: Vec<Result<Result<CommunityReport, ReportFailure>, StoreError>> =
            stream::iter(views)
                .map(|view| self.report_one(graph, view))
                .buffer_unordered(self.workers)
                .collect()
                .await;

        let mut outcome = ReportOutcome {
            singletons: singles.len(),
            ..Default::default()
        };
        for result in results {
            match result? {
                Ok(report) => outcome.reports.push(report),
                Err(failure) => {
                    tracing::warn!(community = failure.community, error = %failure.error, "community report failed");
                    outcome.failures.push(failure);
                }
            }
        }
        outcome.reports.sort_by_key(|r| r.id);
        outcome.failures.sort_by_key(|f| f.community);
        Ok(outcome)
    }

    async fn report_one(
        &self,
        graph: &dyn GraphStore,
        view: CommunityView,
    ) -> Result<Result<CommunityReport, ReportFailure>, StoreError> {
        let generated = match self.generate(&view).await {
            Ok(generated) => generated,
            Err(e) => {
                return Ok(Err(ReportFailure {
                    community: view.id,
                    error: e.to_string(),
                }));
            }
        };

        let report = CommunityReport {
            id: view.id,
            title: generated.title.trim().to_string(),
            summary: generated.summary.trim().to_string(),
            rating: generated.rating.clamp(0.0, 10.0),
            rating_explanation: generated.rating_explanation.trim().to_string(),
            members: view.member_names(),
        };
        graph.upsert_community_report(&report).await?;
        tracing::debug!(community = report.id, title = %report.title, "community report written");
        Ok(Ok(report))
    }

    async fn generate(&self, view: &CommunityView) -> Result<ReportResponse, ReportError> {
        let request = ChatRequest::json(REPORT_SYSTEM_PROMPT, build_report_prompt(view));
        let raw = self.llm.complete(&request).await?;
        Ok(parse_report(&raw)?)
    }
}
