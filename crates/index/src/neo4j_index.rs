use async_trait::async_trait;
use extract::{ExtractedEntity, ExtractedRelationship};
use neo4rs::{Graph, Query, Row};

use crate::graph::{
    CommunityReport, EntityRecord, GraphStats, GraphStore, Neighborhood, RelationshipRecord,
    StoreError, SummarizedRelationship, describe_layout,
};

const ENTITY_COLUMNS: &str = "e.id AS id, e.name AS name, coalesce(e.types, []) AS types, \
     coalesce(e.description, []) AS descriptions, coalesce(e.summary, '') AS summary, \
     coalesce(e.community, -1) AS community";

const RELATIONSHIP_COLUMNS: &str = "s.name AS source, t.name AS target, r.type AS type, \
     coalesce(r.description, '') AS description, r.strength IS NOT NULL AS has_strength, \
     coalesce(r.strength, 0.0) AS strength, coalesce(r.source_doc, '') AS source_doc";

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, StoreError> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|e| StoreError::Connection(format!("{uri}: {e}")))?;
        Ok(Self::new(graph))
    }

    async fn run(&self, context: &'static str, query: Query) -> Result<(), StoreError> {
        self.graph.run(query).await.map_err(|e| StoreError::Query {
            context,
            message: e.to_string(),
        })
    }

    async fn fetch(&self, context: &'static str, query: Query) -> Result<Vec<Row>, StoreError> {
        let query_err = |e: neo4rs::Error| StoreError::Query {
            context,
            message: e.to_string(),
        };
        let mut result = self.graph.execute(query).await.map_err(query_err)?;
        let mut rows = Vec::new();
        while let Some(row) = result.next().await.map_err(query_err)? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn count(&self, context: &'static str, cypher: &str) -> Result<usize, StoreError> {
        let rows = self.fetch(context, Query::new(cypher.to_string())).await?;
        match rows.first() {
            Some(row) => Ok(get::<i64>(row, "count", context)? as usize),
            None => Ok(0),
        }
    }
}

fn get<T>(row: &Row, key: &str, context: &'static str) -> Result<T, StoreError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    row.get::<T>(key).map_err(|e| StoreError::Decode {
        context,
        message: format!("{key}: {e}"),
    })
}

fn entity_from_row(row: &Row) -> Result<EntityRecord, StoreError> {
    const CTX: &str = "entity row";
    let summary: String = get(row, "summary", CTX)?;
    let community: i64 = get(row, "community", CTX)?;
    Ok(EntityRecord {
        id: get(row, "id", CTX)?,
        name: get(row, "name", CTX)?,
        types: get(row, "types", CTX)?,
        descriptions: get(row, "descriptions", CTX)?,
        summary: (!summary.is_empty()).then_some(summary),
        community: (community >= 0).then_some(community),
    })
}

fn relationship_from_row(row: &Row) -> Result<RelationshipRecord, StoreError> {
    const CTX: &str = "relationship row";
    let has_strength: bool = get(row, "has_strength", CTX)?;
    let strength: f64 = get(row, "strength", CTX)?;
    Ok(RelationshipRecord {
        source: get(row, "source", CTX)?,
        target: get(row, "target", CTX)?,
        relation_type: get(row, "type", CTX)?,
        description: get(row, "description", CTX)?,
        strength: has_strength.then_some(strength),
        source_doc: get(row, "source_doc", CTX)?,
    })
}

fn summarized_from_row(row: &Row) -> Result<SummarizedRelationship, StoreError> {
    const CTX: &str = "summarized relationship row";
    Ok(SummarizedRelationship {
        source: get(row, "source", CTX)?,
        target: get(row, "target", CTX)?,
        summary: get(row, "summary", CTX)?,
    })
}

#[async_trait]
impl GraphStore for Neo4jStore {
    fn backend(&self) -> &'static str {
        "neo4j"
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "entity name constraint",
                "CREATE CONSTRAINT entity_name_unique IF NOT EXISTS FOR (e:Entity) REQUIRE e.name IS UNIQUE",
            ),
            (
                "entity id index",
                "CREATE INDEX entity_id_index IF NOT EXISTS FOR (e:Entity) ON (e.id)",
            ),
            (
                "community id constraint",
                "CREATE CONSTRAINT community_id_unique IF NOT EXISTS FOR (c:Community) REQUIRE c.id IS UNIQUE",
            ),
        ];
        for (context, cypher) in statements {
            self.run(context, Query::new(cypher.to_string())).await?;
        }
        tracing::info!("neo4j constraints and indexes ready");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.run("clear graph", Query::new("MATCH (n) DETACH DELETE n".to_string()))
            .await
    }

    async fn upsert_entity(&self, entity: &ExtractedEntity) -> Result<(), StoreError> {
        let query = Query::new(
            r#"
            MERGE (e:Entity {name: $name})
            ON CREATE SET e.id = $id, e.types = [], e.description = []
            WITH e, coalesce(e.types, []) AS known_types, coalesce(e.description, []) AS known
            SET e.types = known_types + [t IN $types WHERE NOT t IN known_types],
                e.description = known + [d IN $descriptions WHERE d <> '' AND NOT d IN known]
            "#
            .to_string(),
        )
        .param("name", entity.name.clone())
        .param("id", entity.id.clone())
        .param("types", entity.types.clone())
        .param("descriptions", entity.descriptions.clone());

        self.run("upsert entity", query).await
    }

    async fn upsert_relationship(
        &self,
        relationship: &ExtractedRelationship,
        source_doc: &str,
    ) -> Result<(), StoreError> {
        let query = Query::new(
            r#"
            MERGE (s:Entity {name: $source})
            ON CREATE SET s.id = randomUUID(), s.types = [], s.description = []
            MERGE (t:Entity {name: $target})
            ON CREATE SET t.id = randomUUID(), t.types = [], t.description = []
            MERGE (s)-[r:RELATIONSHIP {type: $type, source_doc: $source_doc}]->(t)
            SET r.description = $description,
                r.strength = CASE WHEN $has_strength THEN $strength ELSE null END
            "#
            .to_string(),
        )
        .param("source", relationship.source.clone())
        .param("target", relationship.target.clone())
        .param("type", relationship.relation_type.clone())
        .param("source_doc", source_doc.to_string())
        .param("description", relationship.description.clone())
        .param("has_strength", relationship.strength.is_some())
        .param("strength", relationship.strength.unwrap_or(0.0));

        self.run("upsert relationship", query).await
    }

    async fn upsert_summarized_relationship(
        &self,
        source: &str,
        target: &str,
        summary: &str,
    ) -> Result<(), StoreError> {
        let query = Query::new(
            r#"
            MATCH (s:Entity {name: $source}), (t:Entity {name: $target})
            MERGE (s)-[r:SUMMARIZED_RELATIONSHIP]->(t)
            SET r.summary = $summary
            "#
            .to_string(),
        )
        .param("source", source.to_string())
        .param("target", target.to_string())
        .param("summary", summary.to_string());

        self.run("upsert summarized relationship", query).await
    }

    async fn set_entity_summary(&self, name: &str, summary: &str) -> Result<(), StoreError> {
        let query = Query::new("MATCH (e:Entity {name: $name}) SET e.summary = $summary".to_string())
            .param("name", name.to_string())
            .param("summary", summary.to_string());
        self.run("set entity summary", query).await
    }

    async fn entities(&self) -> Result<Vec<EntityRecord>, StoreError> {
        let cypher = format!("MATCH (e:Entity) RETURN {ENTITY_COLUMNS} ORDER BY e.name");
        self.fetch("list entities", Query::new(cypher))
            .await?
            .iter()
            .map(entity_from_row)
            .collect()
    }

    async fn relationships(&self) -> Result<Vec<RelationshipRecord>, StoreError> {
        let cypher = format!(
            "MATCH (s:Entity)-[r:RELATIONSHIP]->(t:Entity) RETURN {RELATIONSHIP_COLUMNS} \
             ORDER BY source, target, type, source_doc"
        );
        self.fetch("list relationships", Query::new(cypher))
            .await?
            .iter()
            .map(relationship_from_row)
            .collect()
    }

    async fn summarized_relationships(&self) -> Result<Vec<SummarizedRelationship>, StoreError> {
        let cypher = "MATCH (s:Entity)-[r:SUMMARIZED_RELATIONSHIP]->(t:Entity) \
                      RETURN s.name AS source, t.name AS target, coalesce(r.summary, '') AS summary \
                      ORDER BY source, target";
        self.fetch("list summarized relationships", Query::new(cypher.to_string()))
            .await?
            .iter()
            .map(summarized_from_row)
            .collect()
    }

    async fn cluster_native(&self) -> Result<usize, StoreError> {
        self.run(
            "drop projection",
            Query::new("CALL gds.graph.drop('entity', false) YIELD graphName RETURN graphName".to_string()),
        )
        .await?;

        self.run(
            "project graph",
            Query::new(
                "CALL gds.graph.project('entity', 'Entity', {RELATIONSHIP: {orientation: 'UNDIRECTED'}}) \
                 YIELD graphName RETURN graphName"
                    .to_string(),
            ),
        )
        .await?;

        let rows = self
            .fetch(
                "louvain",
                Query::new(
                    "CALL gds.louvain.write('entity', {writeProperty: 'community'}) \
                     YIELD communityCount RETURN communityCount AS count"
                        .to_string(),
                ),
            )
            .await?;
        let communities = match rows.first() {
            Some(row) => get::<i64>(row, "count", "louvain")? as usize,
            None => 0,
        };

        self.run(
            "drop projection",
            Query::new("CALL gds.graph.drop('entity', false) YIELD graphName RETURN graphName".to_string()),
        )
        .await?;

        tracing::info!(communities, "gds louvain finished");
        Ok(communities)
    }

    async fn set_communities(&self, assignments: &[(String, i64)]) -> Result<(), StoreError> {
        self.run(
            "reset communities",
            Query::new("MATCH (e:Entity) REMOVE e.community".to_string()),
        )
        .await?;

        let (names, ids): (Vec<String>, Vec<i64>) = assignments.iter().cloned().unzip();
        let query = Query::new(
            r#"
            UNWIND range(0, size($names) - 1) AS i
            MATCH (e:Entity {name: $names[i]})
            SET e.community = $ids[i]
            "#
            .to_string(),
        )
        .param("names", names)
        .param("ids", ids);

        self.run("write communities", query).await
    }

    async fn clear_communities(&self) -> Result<(), StoreError> {
        self.run(
            "delete communities",
            Query::new("MATCH (c:Community) DETACH DELETE c".to_string()),
        )
        .await
    }

    async fn upsert_community_report(&self, report: &CommunityReport) -> Result<(), StoreError> {
        let query = Query::new(
            r#"
            MERGE (c:Community {id: $id})
            SET c.title = $title,
                c.summary = $summary,
                c.rating = $rating,
                c.rating_explanation = $rating_explanation,
                c.members = $members
            WITH c
            MATCH (e:Entity) WHERE e.name IN $members
            MERGE (e)-[:IN_COMMUNITY]->(c)
            "#
            .to_string(),
        )
        .param("id", report.id)
        .param("title", report.title.clone())
        .param("summary", report.summary.clone())
        .param("rating", report.rating)
        .param("rating_explanation", report.rating_explanation.clone())
        .param("members", report.members.clone());

        self.run("upsert community report", query).await
    }

    async fn community_reports(&self) -> Result<Vec<CommunityReport>, StoreError> {
        const CTX: &str = "community row";
        let cypher = "MATCH (c:Community) \
                      RETURN c.id AS id, c.title AS title, c.summary AS summary, c.rating AS rating, \
                      coalesce(c.rating_explanation, '') AS rating_explanation, coalesce(c.members, []) AS members \
                      ORDER BY rating DESC";
        self.fetch("list communities", Query::new(cypher.to_string()))
            .await?
            .iter()
            .map(|row| {
                Ok(CommunityReport {
                    id: get(row, "id", CTX)?,
                    title: get(row, "title", CTX)?,
                    summary: get(row, "summary", CTX)?,
                    rating: get(row, "rating", CTX)?,
                    rating_explanation: get(row, "rating_explanation", CTX)?,
                    members: get(row, "members", CTX)?,
                })
            })
            .collect()
    }

    async fn neighborhood(
        &self,
        names: &[String],
        hops: usize,
    ) -> Result<Neighborhood, StoreError> {
        // variable-length bounds cannot be parameters
        let hops = hops.clamp(1, 2);
        let cypher = format!(
            "MATCH (seed:Entity) WHERE seed.name IN $names \
             OPTIONAL MATCH (seed)-[:RELATIONSHIP*1..{hops}]-(n:Entity) \
             WITH collect(DISTINCT seed) + collect(DISTINCT n) AS nodes \
             UNWIND nodes AS e \
             WITH DISTINCT e \
             RETURN {ENTITY_COLUMNS} ORDER BY name"
        );
        let entities: Vec<EntityRecord> = self
            .fetch("neighborhood entities", Query::new(cypher).param("names", names.to_vec()))
            .await?
            .iter()
            .map(entity_from_row)
            .collect::<Result<_, _>>()?;

        let members: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();

        let cypher = format!(
            "MATCH (s:Entity)-[r:RELATIONSHIP]->(t:Entity) \
             WHERE s.name IN $members AND t.name IN $members \
             RETURN {RELATIONSHIP_COLUMNS} ORDER BY source, target"
        );
        let relationships = self
            .fetch(
                "neighborhood relationships",
                Query::new(cypher).param("members", members.clone()),
            )
            .await?
            .iter()
            .map(relationship_from_row)
            .collect::<Result<_, _>>()?;

        let cypher = "MATCH (s:Entity)-[r:SUMMARIZED_RELATIONSHIP]->(t:Entity) \
                      WHERE s.name IN $members AND t.name IN $members \
                      RETURN s.name AS source, t.name AS target, coalesce(r.summary, '') AS summary \
                      ORDER BY source, target";
        let summarized = self
            .fetch(
                "neighborhood summaries",
                Query::new(cypher.to_string()).param("members", members),
            )
            .await?
            .iter()
            .map(summarized_from_row)
            .collect::<Result<_, _>>()?;

        Ok(Neighborhood {
            entities,
            relationships,
            summarized,
        })
    }

    async fn schema_description(&self) -> Result<String, StoreError> {
        let rows = self
            .fetch(
                "entity types",
                Query::new(
                    "MATCH (e:Entity) UNWIND coalesce(e.types, []) AS t \
                     RETURN collect(DISTINCT t) AS values"
                        .to_string(),
                ),
            )
            .await?;
        let entity_types: Vec<String> = match rows.first() {
            Some(row) => get(row, "values", "entity types")?,
            None => Vec::new(),
        };

        let rows = self
            .fetch(
                "relationship types",
                Query::new(
                    "MATCH ()-[r:RELATIONSHIP]->() RETURN collect(DISTINCT r.type) AS values"
                        .to_string(),
                ),
            )
            .await?;
        let relationship_types: Vec<String> = match rows.first() {
            Some(row) => get(row, "values", "relationship types")?,
            None => Vec::new(),
        };

        Ok(describe_layout(&entity_types, &relationship_types))
    }

    async fn run_read_query(
        &self,
        cypher: &str,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, StoreError> {
        self.fetch("generated query", Query::new(cypher.to_string()))
            .await?
            .iter()
            .map(|row| {
                row.to::<serde_json::Map<String, serde_json::Value>>()
                    .map_err(|e| StoreError::Decode {
                        context: "generated query",
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        Ok(GraphStats {
            entities: self
                .count("count entities", "MATCH (e:Entity) RETURN count(e) AS count")
                .await?,
            relationships: self
                .count(
                    "count relationships",
                    "MATCH ()-[r:RELATIONSHIP]->() RETURN count(r) AS count",
                )
                .await?,
            summarized_relationships: self
                .count(
                    "count summarized relationships",
                    "MATCH ()-[r:SUMMARIZED_RELATIONSHIP]->() RETURN count(r) AS count",
                )
                .await?,
            communities: self
                .count("count communities", "MATCH (c:Community) RETURN count(c) AS count")
                .await?,
        })
    }
}
