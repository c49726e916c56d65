use extract::{ChatRequest, LanguageModel};
use futures::stream::{self, StreamExt};
use index::{GraphStore, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant responsible for generating a \
comprehensive summary of the data provided below. You are given one entity or one pair of \
related entities and a list of descriptions collected from different documents. Merge them \
into a single, comprehensive description that covers all of them. If the descriptions are \
contradictory, resolve the contradiction and keep the result coherent. Write in the third \
person and mention the entity names so the summary stands on its own. Answer with the summary \
text only.";

fn entity_prompt(name: &str, descriptions: &[String]) -> String {
    let mut prompt = format!("Entity: {name}\nDescriptions:\n");
    for description in descriptions {
        prompt.push_str("- ");
        prompt.push_str(description);
        prompt.push('\n');
    }
    prompt
}

fn relationship_prompt(source: &str, target: &str, types: &[String], descriptions: &[String]) -> String {
    let mut prompt = format!(
        "Relationship: {source} -> {target} ({})\nDescriptions:\n",
        types.join(", ")
    );
    for description in descriptions {
        prompt.push_str("- ");
        prompt.push_str(description);
        prompt.push('\n');
    }
    prompt
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SummaryTarget {
    Entity { name: String },
    Relationship { source: String, target: String },
}

impl std::fmt::Display for SummaryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryTarget::Entity { name } => write!(f, "entity {name}"),
            SummaryTarget::Relationship { source, target } => {
                write!(f, "relationship {source} -> {target}")
            }
        }
    }
}

/// A summarization call that failed; the target keeps its raw descriptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryFailure {
    pub target: SummaryTarget,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryReport {
    /// Exactly one description, stored as-is.
    pub copied: usize,
    /// Merged by the language model.
    pub summarized: usize,
    pub failures: Vec<SummaryFailure>,
}

impl SummaryReport {
    pub fn merge(&mut self, other: SummaryReport) {
        self.copied += other.copied;
        self.summarized += other.summarized;
        self.failures.extend(other.failures);
    }
}

enum Outcome {
    Copied,
    Summarized,
    Failed(SummaryFailure),
}

/// One pass of entity and relationship summarization.
pub struct GraphSummarizer {
    llm: Arc<dyn LanguageModel>,
    workers: usize,
}

impl GraphSummarizer {
    pub fn new(llm: Arc<dyn LanguageModel>, workers: usize) -> Self {
        Self {
            llm,
            workers: workers.max(1),
        }
    }

    /// Entities first, then relationship pairs.
    pub async fn summarize(&self, graph: &dyn GraphStore) -> Result<SummaryReport, StoreError> {
        let mut report = self.summarize_entities(graph).await?;
        report.merge(self.summarize_relationships(graph).await?);
        Ok(report)
    }

    pub async fn summarize_entities(
        &self,
        graph: &dyn GraphStore,
    ) -> Result<SummaryReport, StoreError> {
        let entities = graph.entities().await?;
        let jobs: Vec<(String, Vec<String>)> = entities
            .into_iter()
            .filter(|e| !e.descriptions.is_empty())
            .map(|e| (e.name, e.descriptions))
            .collect();

        tracing::info!(entities = jobs.len(), workers = self.workers, "summarizing entities");

        let outcomes: Vec<Result<Outcome, StoreError>> = stream::iter(jobs)
            .map(|(name, descriptions)| self.summarize_entity(graph, name, descriptions))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        collect_report(outcomes)
    }

    /// One summarized edge per directed pair with at least one raw edge.
    pub async fn summarize_relationships(
        &self,
        graph: &dyn GraphStore,
    ) -> Result<SummaryReport, StoreError> {
        let mut pairs: BTreeMap<(String, String), (Vec<String>, Vec<String>)> = BTreeMap::new();
        for rel in graph.relationships().await? {
            let (types, descriptions) = pairs.entry((rel.source, rel.target)).or_default();
            if !types.contains(&rel.relation_type) {
                types.push(rel.relation_type);
            }
            if !rel.description.is_empty() && !descriptions.contains(&rel.description) {
                descriptions.push(rel.description);
            }
        }

        tracing::info!(pairs = pairs.len(), workers = self.workers, "summarizing relationships");

        let outcomes: Vec<Result<Outcome, StoreError>> = stream::iter(pairs)
            .map(|((source, target), (types, descriptions))| {
                self.summarize_pair(graph, source, target, types, descriptions)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        collect_report(outcomes)
    }

    async fn summarize_entity(
        &self,
        graph: &dyn GraphStore,
        name: String,
        descriptions: Vec<String>,
    ) -> Result<Outcome, StoreError> {
        if let [only] = descriptions.as_slice() {
            graph.set_entity_summary(&name, only).await?;
            return Ok(Outcome::Copied);
        }

        let request = ChatRequest::text(SUMMARY_SYSTEM_PROMPT, entity_prompt(&name, &descriptions));
        match self.llm.complete(&request).await {
            Ok(summary) => {
                graph.set_entity_summary(&name, summary.trim()).await?;
                Ok(Outcome::Summarized)
            }
            Err(e) => Ok(Outcome::Failed(SummaryFailure {
                target: SummaryTarget::Entity { name },
                error: e.to_string(),
            })),
        }
    }

    /// Without descriptions the pair summary falls back to its relationship types.
    async fn summarize_pair(
        &self,
        graph: &dyn GraphStore,
        source: String,
        target: String,
        types: Vec<String>,
        descriptions: Vec<String>,
    ) -> Result<Outcome, StoreError> {
        let (summary, outcome) = match descriptions.as_slice() {
            [] => (types.join(", "), Outcome::Copied),
            [only] => (only.clone(), Outcome::Copied),
            _ => {
                let request = ChatRequest::text(
                    SUMMARY_SYSTEM_PROMPT,
                    relationship_prompt(&source, &target, &types, &descriptions),
                );
                match self.llm.complete(&request).await {
                    Ok(summary) => (summary.trim().to_string(), Outcome::Summarized),
                    Err(e) => {
                        return Ok(Outcome::Failed(SummaryFailure {
                            target: SummaryTarget::Relationship { source, target },
                            error: e.to_string(),
                        }));
                    }
                }
            }
        };

        graph
            .upsert_summarized_relationship(&source, &target, &summary)
            .await?;
        Ok(outcome)
    }
}

fn collect_report(outcomes: Vec<Result<Outcome, StoreError>>) -> Result<SummaryReport, StoreError> {
    let mut report = SummaryReport::default();
    for outcome in outcomes {
        match outcome? {
            Outcome::Copied => report.copied += 1,
            Outcome::Summarized => report.summarized += 1,
            Outcome::Failed(failure) => {
                tracing::warn!(target_item = %failure.target, error = %failure.error, "summarization failed");
                report.failures.push(failure);
            }
        }
    }
    Ok(report)
}
