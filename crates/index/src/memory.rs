use async_trait::async_trait;
use extract::{ExtractedEntity, ExtractedRelationship};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::graph::{
    CommunityReport, EntityRecord, GraphStats, GraphStore, Neighborhood, RelationshipRecord,
    StoreError, SummarizedRelationship, describe_layout,
};

type EdgeKey = (String, String, String, String);

#[derive(Debug, Default)]
struct State {
    entities: BTreeMap<String, EntityRecord>,
    relationships: BTreeMap<EdgeKey, RelationshipRecord>,
    summarized: BTreeMap<(String, String), String>,
    communities: BTreeMap<i64, CommunityReport>,
}

impl State {
    fn ensure_entity(&mut self, name: &str) -> &mut EntityRecord {
        self.entities
            .entry(name.to_string())
            .or_insert_with(|| EntityRecord {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                types: Vec::new(),
                descriptions: Vec::new(),
                summary: None,
                community: None,
            })
    }
}

/// In-process graph with the same merge rules as the Neo4j store.
///
/// Used for dry runs and tests; it has no native clustering and does not
/// execute Cypher.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<State>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entity(&self, name: &str) -> Option<EntityRecord> {
        self.state.read().await.entities.get(name).cloned()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.state.write().await = State::default();
        Ok(())
    }

    async fn upsert_entity(&self, entity: &ExtractedEntity) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .entities
            .entry(entity.name.clone())
            .or_insert_with(|| EntityRecord {
                id: entity.id.clone(),
                name: entity.name.clone(),
                types: Vec::new(),
                descriptions: Vec::new(),
                summary: None,
                community: None,
            });

        for t in &entity.types {
            if !record.types.contains(t) {
                record.types.push(t.clone());
            }
        }
        for d in &entity.descriptions {
            if !d.is_empty() && !record.descriptions.contains(d) {
                record.descriptions.push(d.clone());
            }
        }
        Ok(())
    }

    async fn upsert_relationship(
        &self,
        relationship: &ExtractedRelationship,
        source_doc: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.ensure_entity(&relationship.source);
        state.ensure_entity(&relationship.target);

        let key = (
            relationship.source.clone(),
            relationship.target.clone(),
            relationship.relation_type.clone(),
            source_doc.to_string(),
        );
        state.relationships.insert(
            key,
            RelationshipRecord {
                source: relationship.source.clone(),
                target: relationship.target.clone(),
                relation_type: relationship.relation_type.clone(),
                description: relationship.description.clone(),
                strength: relationship.strength,
                source_doc: source_doc.to_string(),
            },
        );
        Ok(())
    }

    async fn upsert_summarized_relationship(
        &self,
        source: &str,
        target: &str,
        summary: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.entities.contains_key(source) || !state.entities.contains_key(target) {
            return Ok(());
        }
        state
            .summarized
            .insert((source.to_string(), target.to_string()), summary.to_string());
        Ok(())
    }

    async fn set_entity_summary(&self, name: &str, summary: &str) -> Result<(), StoreError> {
        if let Some(entity) = self.state.write().await.entities.get_mut(name) {
            entity.summary = Some(summary.to_string());
        }
        Ok(())
    }

    async fn entities(&self) -> Result<Vec<EntityRecord>, StoreError> {
        Ok(self.state.read().await.entities.values().cloned().collect())
    }

    async fn relationships(&self) -> Result<Vec<RelationshipRecord>, StoreError> {
        Ok(self.state.read().await.relationships.values().cloned().collect())
    }

    async fn summarized_relationships(&self) -> Result<Vec<SummarizedRelationship>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .summarized
            .iter()
            .map(|((source, target), summary)| SummarizedRelationship {
                source: source.clone(),
                target: target.clone(),
                summary: summary.clone(),
            })
            .collect())
    }

    async fn cluster_native(&self) -> Result<usize, StoreError> {
        Err(StoreError::Unsupported("native clustering"))
    }

    async fn set_communities(&self, assignments: &[(String, i64)]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for entity in state.entities.values_mut() {
            entity.community = None;
        }
        for (name, community) in assignments {
            if let Some(entity) = state.entities.get_mut(name) {
                entity.community = Some(*community);
            }
        }
        Ok(())
    }

    async fn clear_communities(&self) -> Result<(), StoreError> {
        self.state.write().await.communities.clear();
        Ok(())
    }

    async fn upsert_community_report(&self, report: &CommunityReport) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .communities
            .insert(report.id, report.clone());
        Ok(())
    }

    async fn community_reports(&self) -> Result<Vec<CommunityReport>, StoreError> {
        let mut reports: Vec<CommunityReport> =
            self.state.read().await.communities.values().cloned().collect();
        reports.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        Ok(reports)
    }

    async fn neighborhood(
        &self,
        names: &[String],
        hops: usize,
    ) -> Result<Neighborhood, StoreError> {
        let state = self.state.read().await;

        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for rel in state.relationships.values() {
            adjacency.entry(rel.source.as_str()).or_default().insert(rel.target.as_str());
            adjacency.entry(rel.target.as_str()).or_default().insert(rel.source.as_str());
        }

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        for name in names {
            if let Some((key, _)) = state.entities.get_key_value(name.as_str()) {
                let key = key.as_str();
                if seen.insert(key) {
                    queue.push_back((key, 0));
                }
            }
        }
        while let Some((name, depth)) = queue.pop_front() {
            if depth == hops {
                continue;
            }
            for next in adjacency.get(name).into_iter().flatten() {
                if seen.insert(*next) {
                    queue.push_back((*next, depth + 1));
                }
            }
        }

        Ok(Neighborhood {
            entities: seen
                .iter()
                .filter_map(|n| state.entities.get(*n).cloned())
                .collect(),
            relationships: state
                .relationships
                .values()
                .filter(|r| seen.contains(r.source.as_str()) && seen.contains(r.target.as_str()))
                .cloned()
                .collect(),
            summarized: state
                .summarized
                .iter()
                .filter(|((s, t), _)| seen.contains(s.as_str()) && seen.contains(t.as_str()))
                .map(|((s, t), summary)| SummarizedRelationship {
                    source: s.clone(),
                    target: t.clone(),
                    summary: summary.clone(),
                })
                .collect(),
        })
    }

    async fn schema_description(&self) -> Result<String, StoreError> {
        let state = self.state.read().await;
        let mut entity_types: Vec<String> = Vec::new();
        for t in state.entities.values().flat_map(|e| &e.types) {
            if !entity_types.contains(t) {
                entity_types.push(t.clone());
            }
        }
        let mut relationship_types: Vec<String> = Vec::new();
        for rel in state.relationships.values() {
            if !relationship_types.contains(&rel.relation_type) {
                relationship_types.push(rel.relation_type.clone());
            }
        }
        Ok(describe_layout(&entity_types, &relationship_types))
    }

    async fn run_read_query(
        &self,
        _cypher: &str,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, StoreError> {
        Err(StoreError::Unsupported("Cypher execution"))
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        let state = self.state.read().await;
        Ok(GraphStats {
            entities: state.entities.len(),
            relationships: state.relationships.len(),
            summarized_relationships: state.summarized.len(),
            communities: state.communities.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, id: &str, types: &[&str], descriptions: &[&str]) -> ExtractedEntity {
        ExtractedEntity {
            id: id.to_string(),
            name: name.to_string(),
            types: types.iter().map(|s| s.to_string()).collect(),
            descriptions: descriptions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn rel(source: &str, target: &str, rel_type: &str, description: &str) -> ExtractedRelationship {
        ExtractedRelationship {
            source: source.to_string(),
            target: target.to_string(),
            relation_type: rel_type.to_string(),
            description: description.to_string(),
            strength: None,
        }
    }

    #[tokio::test]
    async fn entity_identity_is_first_write_wins() {
        let graph = MemoryGraph::new();
        graph
            .upsert_entity(&entity("Alice", "id-1", &["Person"], &["An engineer"]))
            .await
            .unwrap();
        graph
            .upsert_entity(&entity("Alice", "id-2", &["Person", "Author"], &["An engineer", "", "Writes books"]))
            .await
            .unwrap();

        let alice = graph.entity("Alice").await.unwrap();
        assert_eq!(alice.id, "id-1");
        assert_eq!(alice.types, vec!["Person", "Author"]);
        assert_eq!(alice.descriptions, vec!["An engineer", "Writes books"]);
    }

    #[tokio::test]
    async fn edges_merge_per_document() {
        let graph = MemoryGraph::new();
        graph.upsert_relationship(&rel("Alice", "TechCorp", "WORKS_AT", "old"), "doc-1").await.unwrap();
        graph.upsert_relationship(&rel("Alice", "TechCorp", "WORKS_AT", "new"), "doc-1").await.unwrap();
        graph.upsert_relationship(&rel("Alice", "TechCorp", "WORKS_AT", "other"), "doc-2").await.unwrap();

        let rels = graph.relationships().await.unwrap();
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].description, "new");
        assert_eq!(graph.stats().await.unwrap().entities, 2);
    }

    #[tokio::test]
    async fn summarized_edges_are_keyed_by_pair() {
        let graph = MemoryGraph::new();
        graph.upsert_relationship(&rel("A", "B", "R", "x"), "d").await.unwrap();
        graph.upsert_summarized_relationship("A", "B", "first").await.unwrap();
        graph.upsert_summarized_relationship("A", "B", "second").await.unwrap();

        let summarized = graph.summarized_relationships().await.unwrap();
        assert_eq!(summarized.len(), 1);
        assert_eq!(summarized[0].summary, "second");
        assert_eq!(graph.relationships().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn neighborhood_respects_hops() {
        let graph = MemoryGraph::new();
        graph.upsert_relationship(&rel("A", "B", "R", ""), "d").await.unwrap();
        graph.upsert_relationship(&rel("C", "B", "R", ""), "d").await.unwrap();
        graph.upsert_relationship(&rel("C", "D", "R", ""), "d").await.unwrap();

        let one = graph.neighborhood(&["A".to_string()], 1).await.unwrap();
        let names: Vec<_> = one.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(one.relationships.len(), 1);

        let two = graph.neighborhood(&["A".to_string(), "missing".to_string()], 2).await.unwrap();
        assert_eq!(two.entities.len(), 3);
        assert_eq!(two.relationships.len(), 2);
    }

    #[tokio::test]
    async fn communities_replace_previous_assignment() {
        let graph = MemoryGraph::new();
        graph.upsert_relationship(&rel("A", "B", "R", ""), "d").await.unwrap();
        graph.set_communities(&[("A".to_string(), 1), ("B".to_string(), 1)]).await.unwrap();
        graph.set_communities(&[("A".to_string(), 7)]).await.unwrap();

        assert_eq!(graph.entity("A").await.unwrap().community, Some(7));
        assert_eq!(graph.entity("B").await.unwrap().community, None);
        assert!(graph.cluster_native().await.is_err());
    }
}
