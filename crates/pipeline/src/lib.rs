pub mod config;
pub mod services;

pub use config::{LogConfig, LogFormat, PipelineConfig, ServerConfig, Settings};
pub use services::Services;

use anyhow::{Context, Result};
use communities::{
    ClusteringOutcome, CommunityDetector, CommunityReporter, GraphSummarizer, ReportFailure,
    SummaryReport,
};
use extract::{ExtractionBatch, Extractor, OnError};
use index::{GraphStats, GraphStore, Indexer};
use ingest::Document;
use serde::Serialize;
use std::time::Instant;

/// A document left out of the graph under `on_error = "ignore"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDocument {
    pub doc_id: String,
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub documents: usize,
    pub extracted: usize,
    pub skipped: Vec<SkippedDocument>,
    pub entities_merged: usize,
    pub relationships_merged: usize,
    pub summaries: SummaryReport,
    pub clustering: ClusteringOutcome,
    pub communities_reported: usize,
    pub singleton_communities: usize,
    pub report_failures: Vec<ReportFailure>,
    /// Points written to the entity vector index, if one is configured.
    pub vector_points: Option<usize>,
    pub graph: GraphStats,
    pub elapsed_ms: u64,
}

/// Extract → merge → summarize → cluster → report → embed.
pub struct Pipeline {
    services: Services,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(services: Services, config: PipelineConfig) -> Self {
        Self { services, config }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn run(&self, documents: &[Document]) -> Result<RunReport> {
        let started = Instant::now();
        let graph = self.services.graph.as_ref();
        let mut report = RunReport {
            documents: documents.len(),
            ..Default::default()
        };

        if self.config.clear_graph {
            graph.clear().await.context("failed to clear graph")?;
            tracing::info!("cleared existing graph");
        }

        self.extract_and_merge(documents, &mut report).await?;

        report.summaries = GraphSummarizer::new(self.services.llm.clone(), self.config.workers)
            .summarize(graph)
            .await
            .context("summarization failed")?;
        tracing::info!(
            copied = report.summaries.copied,
            summarized = report.summaries.summarized,
            failures = report.summaries.failures.len(),
            "summarization finished"
        );

        report.clustering = CommunityDetector::new(self.config.clustering)
            .detect(graph)
            .await
            .context("community detection failed")?;

        let reports = CommunityReporter::new(self.services.llm.clone(), self.config.workers)
            .report(graph)
            .await
            .context("community reporting failed")?;
        report.communities_reported = reports.reports.len();
        report.singleton_communities = reports.singletons;
        report.report_failures = reports.failures;
        tracing::info!(
            reports = report.communities_reported,
            failures = report.report_failures.len(),
            "community reports written"
        );

        if let Some(entity_index) = &self.services.entity_index {
            let points = entity_index
                .rebuild(graph)
                .await
                .context("failed to rebuild entity vector index")?;
            report.vector_points = Some(points);
        }

        report.graph = graph.stats().await.context("failed to read graph stats")?;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            documents = report.documents,
            skipped = report.skipped.len(),
            entities = report.graph.entities,
            relationships = report.graph.relationships,
            communities = report.graph.communities,
            elapsed_ms = report.elapsed_ms,
            "pipeline finished"
        );
        Ok(report)
    }

    /// Each document is merged before the next one is extracted, so an abort
    /// leaves exactly the earlier documents in the graph.
    async fn extract_and_merge(&self, documents: &[Document], report: &mut RunReport) -> Result<()> {
        let extractor = Extractor::new(self.services.llm.clone(), self.services.schema.clone());
        let indexer = Indexer::new(self.services.graph.clone());
        // Later runs resolve case variants to spellings already in the graph.
        let known = self
            .services
            .graph
            .entities()
            .await
            .context("failed to read existing entities")?;
        let mut batch = ExtractionBatch::with_known(known.into_iter().map(|e| (e.name, e.id)));

        tracing::info!(documents = documents.len(), on_error = ?self.config.on_error, "extracting");
        for document in documents {
            let extraction = match extractor.extract(document, &mut batch).await {
                Ok(extraction) => extraction,
                Err(err) => match self.config.on_error {
                    OnError::Raise => {
                        return Err(err).with_context(|| {
                            format!("extraction aborted at document {} ({})", document.doc_id, document.source)
                        });
                    }
                    OnError::Ignore => {
                        tracing::warn!(doc_id = %document.doc_id, source = %document.source, error = %err, "skipping document");
                        report.skipped.push(SkippedDocument {
                            doc_id: document.doc_id.clone(),
                            source: document.source.clone(),
                            error: err.to_string(),
                        });
                        continue;
                    }
                },
            };

            let merged = indexer
                .merge_extraction(&extraction)
                .await
                .with_context(|| format!("failed to merge document {}", document.doc_id))?;
            report.extracted += 1;
            report.entities_merged += merged.entities;
            report.relationships_merged += merged.relationships;
        }

        tracing::info!(
            extracted = report.extracted,
            skipped = report.skipped.len(),
            entities = batch.entity_count(),
            "extraction finished"
        );
        Ok(())
    }
}
