use async_trait::async_trait;
use extract::{ExtractedEntity, ExtractedRelationship};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to graph database: {0}")]
    Connection(String),
    #[error("graph query failed ({context}): {message}")]
    Query {
        context: &'static str,
        message: String,
    },
    #[error("unexpected value in graph row ({context}): {message}")]
    Decode {
        context: &'static str,
        message: String,
    },
    #[error("{0} is not supported by this graph backend")]
    Unsupported(&'static str),
}

/// An `:Entity` node as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    pub types: Vec<String>,
    /// Raw descriptions, in arrival order.
    pub descriptions: Vec<String>,
    pub summary: Option<String>,
    pub community: Option<i64>,
}

impl EntityRecord {
    /// Summary when present, otherwise the raw descriptions joined.
    pub fn best_description(&self) -> String {
        match &self.summary {
            Some(summary) => summary.clone(),
            None => self.descriptions.join(" "),
        }
    }
}

/// A raw `:RELATIONSHIP` edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub description: String,
    pub strength: Option<f64>,
    pub source_doc: String,
}

/// The single `:SUMMARIZED_RELATIONSHIP` edge of a directed pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizedRelationship {
    pub source: String,
    pub target: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    pub id: i64,
    pub title: String,
    pub summary: String,
    pub rating: f64,
    pub rating_explanation: String,
    pub members: Vec<String>,
}

impl CommunityReport {
    pub fn to_text(&self) -> String {
        format!(
            "# {}\n{}\n(rating {:.1}: {})",
            self.title, self.summary, self.rating, self.rating_explanation
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entities: usize,
    pub relationships: usize,
    pub summarized_relationships: usize,
    pub communities: usize,
}

/// Entities around a set of seeds and the edges among them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Neighborhood {
    pub entities: Vec<EntityRecord>,
    pub relationships: Vec<RelationshipRecord>,
    pub summarized: Vec<SummarizedRelationship>,
}

/// Property-graph persistence.
///
/// Merge discipline:
/// - entities are keyed by name; `id` is set on create only, `types` are
///   unioned and non-empty descriptions appended once;
/// - raw edges are keyed by (source, target, type, source document), their
///   description and strength are overwritten;
/// - summarized edges are keyed by the directed (source, target) pair.
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Create constraints and indexes if they do not exist.
    async fn init_schema(&self) -> Result<(), StoreError>;

    /// Delete every node and edge.
    async fn clear(&self) -> Result<(), StoreError>;

    async fn upsert_entity(&self, entity: &ExtractedEntity) -> Result<(), StoreError>;

    /// Endpoints missing from the graph are created first.
    async fn upsert_relationship(
        &self,
        relationship: &ExtractedRelationship,
        source_doc: &str,
    ) -> Result<(), StoreError>;

    async fn upsert_summarized_relationship(
        &self,
        source: &str,
        target: &str,
        summary: &str,
    ) -> Result<(), StoreError>;

    async fn set_entity_summary(&self, name: &str, summary: &str) -> Result<(), StoreError>;

    async fn entities(&self) -> Result<Vec<EntityRecord>, StoreError>;

    async fn relationships(&self) -> Result<Vec<RelationshipRecord>, StoreError>;

    async fn summarized_relationships(&self) -> Result<Vec<SummarizedRelationship>, StoreError>;

    /// Run the database's own Louvain and write `community` onto entities.
    /// Returns the number of communities.
    async fn cluster_native(&self) -> Result<usize, StoreError>;

    /// Replace every entity's community with the given assignment.
    async fn set_communities(&self, assignments: &[(String, i64)]) -> Result<(), StoreError>;

    /// Drop all community nodes.
    async fn clear_communities(&self) -> Result<(), StoreError>;

    async fn upsert_community_report(&self, report: &CommunityReport) -> Result<(), StoreError>;

    async fn community_reports(&self) -> Result<Vec<CommunityReport>, StoreError>;

    /// Seeds plus everything within `hops` undirected raw edges.
    async fn neighborhood(&self, names: &[String], hops: usize)
    -> Result<Neighborhood, StoreError>;

    /// Description of what is actually stored, for query generation.
    async fn schema_description(&self) -> Result<String, StoreError>;

    /// Execute a read-only Cypher statement and return its rows as JSON objects.
    async fn run_read_query(
        &self,
        cypher: &str,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, StoreError>;

    async fn stats(&self) -> Result<GraphStats, StoreError>;
}

/// Shared rendering of the stored layout for both backends.
pub(crate) fn describe_layout(entity_types: &[String], relationship_types: &[String]) -> String {
    let mut out = String::from(
        "Node labels and properties:\n\
         - Entity {id: STRING, name: STRING, types: LIST<STRING>, description: LIST<STRING>, summary: STRING, community: INTEGER}\n\
         - Community {id: INTEGER, title: STRING, summary: STRING, rating: FLOAT, rating_explanation: STRING, members: LIST<STRING>}\n\
         Relationships:\n\
         - (:Entity)-[:RELATIONSHIP {type: STRING, description: STRING, strength: FLOAT, source_doc: STRING}]->(:Entity)\n\
         - (:Entity)-[:SUMMARIZED_RELATIONSHIP {summary: STRING}]->(:Entity)\n\
         - (:Entity)-[:IN_COMMUNITY]->(:Community)\n",
    );
    if !entity_types.is_empty() {
        let _ = writeln!(out, "Values of Entity.types: {}", entity_types.join(", "));
    }
    if !relationship_types.is_empty() {
        let _ = writeln!(
            out,
            "Values of RELATIONSHIP.type: {}",
            relationship_types.join(", ")
        );
    }
    out
}
