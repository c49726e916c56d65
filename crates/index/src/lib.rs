pub mod cache;
pub mod embeddings;
pub mod entity_index;
pub mod graph;
pub mod memory;
pub mod neo4j_index;
pub mod qdrant_index;
pub mod vector_store;

pub use cache::{CacheStats, CachedEmbedder};
#[cfg(any(test, feature = "test-util"))]
pub use embeddings::HashEmbedder;
pub use embeddings::{
    Embedder, EmbeddingConfig, EmbeddingError, OllamaEmbedder, OpenAiEmbedder, build_embedder,
};
pub use entity_index::{EntityHit, EntityVectorIndex, entity_point_id};
pub use graph::{
    CommunityReport, EntityRecord, GraphStats, GraphStore, Neighborhood, RelationshipRecord,
    StoreError, SummarizedRelationship,
};
pub use memory::MemoryGraph;
pub use neo4j_index::Neo4jStore;
pub use qdrant_index::QdrantStore;
pub use vector_store::{MemoryVectorStore, ScoredPoint, VectorError, VectorPoint, VectorStore};

use extract::DocumentExtraction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    #[default]
    Neo4j,
    /// In-process graph; nothing survives the process.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: GraphBackend,
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::Neo4j,
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
        }
    }
}

pub async fn connect_graph(config: &GraphConfig) -> Result<Arc<dyn GraphStore>, StoreError> {
    match config.backend {
        GraphBackend::Neo4j => {
            let store = Neo4jStore::connect(&config.uri, &config.user, &config.password).await?;
            tracing::info!(uri = %config.uri, "connected to neo4j");
            Ok(Arc::new(store))
        }
        GraphBackend::Memory => Ok(Arc::new(MemoryGraph::new())),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "entities".to_string(),
        }
    }
}

/// `None` when the vector index is disabled.
pub fn connect_vector_store(config: &VectorConfig) -> Option<Arc<dyn VectorStore>> {
    config.enabled.then(|| {
        Arc::new(QdrantStore::new(
            config.url.clone(),
            config.collection.clone(),
            config.api_key.clone(),
        )) as Arc<dyn VectorStore>
    })
}

/// Counts from merging one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub entities: usize,
    pub relationships: usize,
}

/// Writes extraction output into the graph.
pub struct Indexer {
    graph: Arc<dyn GraphStore>,
}

impl Indexer {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Entities first, so relationship endpoints already carry their batch ids.
    pub async fn merge_extraction(
        &self,
        extraction: &DocumentExtraction,
    ) -> Result<MergeStats, StoreError> {
        for entity in &extraction.entities {
            self.graph.upsert_entity(entity).await?;
        }
        for relationship in &extraction.relationships {
            self.graph
                .upsert_relationship(relationship, &extraction.doc_id)
                .await?;
        }

        tracing::debug!(
            doc_id = %extraction.doc_id,
            entities = extraction.entities.len(),
            relationships = extraction.relationships.len(),
            "merged document"
        );
        Ok(MergeStats {
            entities: extraction.entities.len(),
            relationships: extraction.relationships.len(),
        })
    }
}
