use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::IndexError;
use crate::embeddings::Embedder;
use crate::graph::{EntityRecord, GraphStore};
use crate::vector_store::{VectorPoint, VectorStore};

const UPSERT_BATCH: usize = 64;

/// Deterministic point id for an entity name.
pub fn entity_point_id(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, format!("graphrag:{name}").as_bytes()).to_string()
}

fn entity_text(entity: &EntityRecord) -> String {
    match &entity.summary {
        Some(summary) if !summary.is_empty() => format!("{}: {}", entity.name, summary),
        _ => entity.name.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityHit {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub score: f32,
}

/// Entity embeddings derived from the graph.
pub struct EntityVectorIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    dimension: Option<usize>,
}

impl EntityVectorIndex {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        dimension: Option<usize>,
    ) -> Self {
        Self {
            embedder,
            store,
            dimension,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Configured vector size, or the embedder's probed one.
    async fn vector_dimension(&self) -> Result<usize, IndexError> {
        match self.dimension {
            Some(d) => Ok(d),
            None => Ok(self.embedder.dimension().await?),
        }
    }

    /// Replace the collection with one point per graph entity. Returns the
    /// number of points written.
    pub async fn rebuild(&self, graph: &dyn GraphStore) -> Result<usize, IndexError> {
        let entities = graph.entities().await?;
        let dimension = self.vector_dimension().await?;
        self.store.recreate(dimension).await?;
        let mut batch = Vec::with_capacity(UPSERT_BATCH);
        let mut written = 0;

        for entity in &entities {
            let vector = self.embedder.embed(&entity_text(entity)).await?;
            batch.push(VectorPoint {
                id: entity_point_id(&entity.name),
                vector,
                payload: json!({
                    "id": entity.id,
                    "name": entity.name,
                    "summary": entity.summary.clone().unwrap_or_default(),
                }),
            });

            if batch.len() == UPSERT_BATCH {
                written += batch.len();
                self.store.upsert(std::mem::take(&mut batch)).await?;
            }
        }
        written += batch.len();
        self.store.upsert(batch).await?;

        tracing::info!(collection = self.store.collection(), points = written, "entity index rebuilt");
        Ok(written)
    }

    pub async fn search(&self, question: &str, top_k: usize) -> Result<Vec<EntityHit>, IndexError> {
        let vector = self.embedder.embed(question).await?;
        let hits = self.store.search(&vector, top_k).await?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let name = hit.payload.get("name")?.as_str()?.to_string();
                let text = |key: &str| {
                    hit.payload
                        .get(key)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                Some(EntityHit {
                    id: text("id"),
                    summary: text("summary"),
                    name,
                    score: hit.score,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::memory::MemoryGraph;
    use crate::vector_store::MemoryVectorStore;
    use extract::{ExtractedEntity, ExtractedRelationship};

    #[test]
    fn point_ids_are_stable_uuids() {
        let a = entity_point_id("Alice");
        assert_eq!(a, entity_point_id("Alice"));
        assert_ne!(a, entity_point_id("Bob"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn rebuild_then_search_finds_entity() {
        let graph = MemoryGraph::new();
        graph
            .upsert_entity(&ExtractedEntity {
                id: "e1".into(),
                name: "Root rot".into(),
                types: vec!["DISEASE".into()],
                descriptions: vec![],
            })
            .await
            .unwrap();
        graph
            .upsert_relationship(
                &ExtractedRelationship {
                    source: "Root rot".into(),
                    target: "Phytophthora palmivora".into(),
                    relation_type: "CAUSED_BY".into(),
                    description: String::new(),
                    strength: None,
                },
                "doc",
            )
            .await
            .unwrap();
        graph
            .set_entity_summary("Root rot", "Durian disease from waterlogged soil")
            .await
            .unwrap();

        let store = Arc::new(MemoryVectorStore::new("entities"));
        let index = EntityVectorIndex::new(Arc::new(HashEmbedder::new(256)), store.clone(), None);

        assert_eq!(index.rebuild(&graph).await.unwrap(), 2);
        assert_eq!(index.rebuild(&graph).await.unwrap(), 2);
        assert_eq!(store.len().await, 2);

        let hits = index.search("waterlogged durian", 1).await.unwrap();
        assert_eq!(hits[0].name, "Root rot");
        assert_eq!(hits[0].id, "e1");
        assert_eq!(hits[0].summary, "Durian disease from waterlogged soil");
    }

    #[tokio::test]
    async fn rebuild_drops_entities_no_longer_in_graph() {
        let graph = MemoryGraph::new();
        graph
            .upsert_relationship(
                &ExtractedRelationship {
                    source: "Carol".into(),
                    target: "Dave".into(),
                    relation_type: "KNOWS".into(),
                    description: String::new(),
                    strength: None,
                },
                "doc",
            )
            .await
            .unwrap();

        let store = Arc::new(MemoryVectorStore::new("entities"));
        let index = EntityVectorIndex::new(Arc::new(HashEmbedder::new(256)), store.clone(), None);
        index.rebuild(&graph).await.unwrap();

        graph.clear().await.unwrap();
        graph
            .upsert_entity(&ExtractedEntity {
                id: "e2".into(),
                name: "Alice".into(),
                types: vec![],
                descriptions: vec![],
            })
            .await
            .unwrap();

        assert_eq!(index.rebuild(&graph).await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        let hits = index.search("Carol", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Alice");
    }
}
