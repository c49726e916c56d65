pub mod graph_export;
pub mod louvain;
pub mod reporter;
pub mod summarizer;

pub use graph_export::{CommunityView, GraphData, MemberView, RelationView, community_views};
pub use louvain::LouvainDetector;
pub use reporter::{CommunityReporter, ReportError, ReportFailure, ReportOutcome, build_report_prompt};
pub use summarizer::{GraphSummarizer, SummaryFailure, SummaryReport, SummaryTarget};

use index::{GraphStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where Louvain runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringAlgorithm {
    /// Neo4j Graph Data Science plugin.
    Gds,
    /// In-process over the exported edge list.
    #[default]
    Local,
}

impl std::str::FromStr for ClusteringAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gds" => Ok(ClusteringAlgorithm::Gds),
            "local" => Ok(ClusteringAlgorithm::Local),
            other => Err(format!("invalid clustering {other:?}, expected 'gds' or 'local'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusteringOutcome {
    pub entities: usize,
    pub communities: usize,
    /// Modularity of the assignment; only known for local clustering.
    pub modularity: Option<f64>,
}

/// Assigns a community id to every entity in the graph.
pub struct CommunityDetector {
    algorithm: ClusteringAlgorithm,
}

impl CommunityDetector {
    pub fn new(algorithm: ClusteringAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> ClusteringAlgorithm {
        self.algorithm
    }

    pub async fn detect(&self, graph: &dyn GraphStore) -> Result<ClusteringOutcome, StoreError> {
        tracing::info!(algorithm = ?self.algorithm, backend = graph.backend(), "clustering graph");
        match self.algorithm {
            ClusteringAlgorithm::Gds => {
                let communities = graph.cluster_native().await?;
                let entities = graph.stats().await?.entities;
                Ok(ClusteringOutcome {
                    entities,
                    communities,
                    modularity: None,
                })
            }
            ClusteringAlgorithm::Local => self.detect_local(graph).await,
        }
    }

    async fn detect_local(&self, graph: &dyn GraphStore) -> Result<ClusteringOutcome, StoreError> {
        let entities = graph.entities().await?;
        let relationships = graph.relationships().await?;
        let data = GraphData::from_store(&entities, &relationships);
        if data.is_empty() {
            tracing::info!("no entities to cluster");
            return Ok(ClusteringOutcome::default());
        }

        let detector = LouvainDetector::new(data);
        let communities = detector.detect_communities();
        let modularity = detector.modularity(&communities);

        let mut assignments: Vec<(String, i64)> = communities
            .iter()
            .map(|(name, &community)| (name.clone(), community as i64))
            .collect();
        assignments.sort();
        graph.set_communities(&assignments).await?;

        let distinct: BTreeSet<usize> = communities.values().copied().collect();
        tracing::info!(
            entities = assignments.len(),
            communities = distinct.len(),
            modularity,
            "communities assigned"
        );
        Ok(ClusteringOutcome {
            entities: assignments.len(),
            communities: distinct.len(),
            modularity: Some(modularity),
        })
    }
}
