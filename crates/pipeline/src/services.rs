use anyhow::{Context, Result};
use extract::{GraphSchema, LanguageModel, build_language_model};
use index::{
    Embedder, EntityVectorIndex, GraphStore, build_embedder, connect_graph, connect_vector_store,
};
use query::{RetrievalConfig, Retriever};
use std::sync::Arc;

use crate::config::Settings;

/// Connected backends shared by building and querying.
#[derive(Clone)]
pub struct Services {
    pub graph: Arc<dyn GraphStore>,
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    /// Present when a vector store is configured.
    pub entity_index: Option<Arc<EntityVectorIndex>>,
    pub schema: Arc<GraphSchema>,
}

impl Services {
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let schema = match &settings.schema_path {
            Some(path) => GraphSchema::load(path)
                .with_context(|| format!("failed to load graph schema {}", path.display()))?,
            None => GraphSchema::default(),
        };

        let llm = build_language_model(&settings.llm).context("failed to set up language model")?;
        let embedder = build_embedder(&settings.embedding).context("failed to set up embedder")?;

        let graph = connect_graph(&settings.graph)
            .await
            .context("failed to connect to graph store")?;
        graph
            .init_schema()
            .await
            .context("failed to create graph constraints")?;

        let entity_index = connect_vector_store(&settings.vector).map(|store| {
            Arc::new(EntityVectorIndex::new(
                embedder.clone(),
                store,
                settings.embedding.dimension,
            ))
        });

        tracing::info!(
            graph = graph.backend(),
            llm = llm.model(),
            embedder = embedder.model(),
            vector_index = entity_index.is_some(),
            "services ready"
        );

        Ok(Self {
            graph,
            llm,
            embedder,
            entity_index,
            schema: Arc::new(schema),
        })
    }

    pub fn retriever(&self, config: RetrievalConfig) -> Retriever {
        Retriever::new(
            self.graph.clone(),
            self.llm.clone(),
            self.embedder.clone(),
            self.entity_index.clone(),
            self.schema.clone(),
            config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::GraphBackend;

    #[tokio::test]
    async fn memory_backend_needs_no_servers() {
        let mut settings = Settings::default();
        settings.graph.backend = GraphBackend::Memory;

        let services = Services::connect(&settings).await.unwrap();
        assert_eq!(services.graph.backend(), "memory");
        assert!(services.entity_index.is_none());
        assert_eq!(services.llm.model(), "llama3");
    }

    #[tokio::test]
    async fn missing_schema_file_is_reported() {
        let mut settings = Settings::default();
        settings.graph.backend = GraphBackend::Memory;
        settings.schema_path = Some("does/not/exist.json".into());

        let err = Services::connect(&settings).await.err().unwrap();
        assert!(err.to_string().contains("does/not/exist.json"));
    }
}
