pub mod cypher_search;
pub mod global_search;
pub mod llm;
pub mod local_search;

pub use cypher_search::{CypherSearchEngine, validate_read_only};
pub use global_search::GlobalSearchEngine;
pub use llm::QueryLlm;
pub use local_search::LocalSearchEngine;

use extract::{GraphSchema, LanguageModel, LlmError};
use index::{
    EmbeddingError, EntityHit, EntityVectorIndex, Embedder, GraphStore, IndexError, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// How a question is answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Entity nearest neighbors, expanded through the graph.
    #[default]
    Vector,
    /// Text-to-Cypher against the live graph.
    Cypher,
    /// Community reports ranked by similarity.
    Global,
}

impl std::str::FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(RetrievalMode::Vector),
            "cypher" => Ok(RetrievalMode::Cypher),
            "global" => Ok(RetrievalMode::Global),
            other => Err(format!(
                "invalid mode {other:?}, expected 'vector', 'cypher' or 'global'"
            )),
        }
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RetrievalMode::Vector => "vector",
            RetrievalMode::Cypher => "cypher",
            RetrievalMode::Global => "global",
        })
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("vector retrieval needs the entity vector index; enable [vector] in the configuration")]
    VectorIndexDisabled,
    #[error("no community reports found; run a build first")]
    NoCommunityReports,
    #[error("language model failed: {0}")]
    Llm(#[from] LlmError),
    #[error("the language model returned no Cypher statement")]
    EmptyCypher,
    #[error("generated Cypher contains a write clause ({clause}): {cypher}")]
    RejectedCypher { cypher: String, clause: String },
    #[error("generated Cypher failed to execute: {message}\n{cypher}")]
    CypherFailed { cypher: String, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// A community report used by global retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityRef {
    pub id: i64,
    pub title: String,
    pub score: f32,
}

/// What retrieval looked at on the way to an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryTrace {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hits: Vec<EntityHit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expanded_entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cypher: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub communities: Vec<CommunityRef>,
    pub context_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub mode: RetrievalMode,
    pub question: String,
    pub answer: String,
    pub trace: QueryTrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Graph expansion depth around vector hits, 1 or 2.
    pub hops: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5, hops: 2 }
    }
}

/// Answers questions in any of the retrieval modes.
pub struct Retriever {
    local: Option<LocalSearchEngine>,
    cypher: CypherSearchEngine,
    global: GlobalSearchEngine,
    config: RetrievalConfig,
}

impl Retriever {
    /// `entity_index` is `None` when no vector store is configured; vector
    /// mode then fails with [`QueryError::VectorIndexDisabled`].
    pub fn new(
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        entity_index: Option<Arc<EntityVectorIndex>>,
        schema: Arc<GraphSchema>,
        config: RetrievalConfig,
    ) -> Self {
        let llm = QueryLlm::new(llm);
        Self {
            local: entity_index
                .map(|index| LocalSearchEngine::new(graph.clone(), index, llm.clone())),
            cypher: CypherSearchEngine::new(graph.clone(), llm.clone(), schema),
            global: GlobalSearchEngine::new(graph, embedder, llm),
            config,
        }
    }

    pub fn config(&self) -> RetrievalConfig {
        self.config
    }

    pub async fn answer(&self, question: &str, mode: RetrievalMode) -> Result<Answer, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }
        tracing::info!(%mode, "answering question");

        let (answer, trace) = match mode {
            RetrievalMode::Vector => {
                let local = self.local.as_ref().ok_or(QueryError::VectorIndexDisabled)?;
                local
                    .search(question, self.config.top_k, self.config.hops.clamp(1, 2))
                    .await?
            }
            RetrievalMode::Cypher => self.cypher.search(question).await?,
            RetrievalMode::Global => self.global.search(question, self.config.top_k).await?,
        };

        tracing::debug!(%mode, context_size = trace.context_size, "answer generated");
        Ok(Answer {
            mode,
            question: question.to_string(),
            answer,
            trace,
        })
    }
}
