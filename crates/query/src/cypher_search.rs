use extract::{ChatRequest, GraphSchema, strip_code_fence};
use index::GraphStore;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

use crate::llm::QueryLlm;
use crate::{QueryError, QueryTrace};

const MAX_ROWS_IN_PROMPT: usize = 50;

const CYPHER_SYSTEM_PROMPT: &str = "Task: generate a Cypher statement to query a Neo4j graph \
database.\nInstructions:\n- Use only the node labels, relationship types and properties in \
the schema provided.\n- The statement must be read-only: MATCH, OPTIONAL MATCH, WHERE, WITH, \
RETURN, ORDER BY, LIMIT. Never CREATE, MERGE, SET, DELETE, REMOVE or DROP.\n- Entity names \
are stored in the `name` property and entity labels in the `types` list.\n- Return only the \
Cypher statement, without explanations or apologies.";

static WRITE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP|FOREACH|LOAD\s+CSV|CALL\s+apoc\.(?:create|merge|refactor|periodic|load|do)|CALL\s+db\.(?:create|drop)|CALL\s+gds\.[\w.]*\.(?:write|mutate))\b",
    )
    .expect("valid regex")
});

/// Reject statements that could modify the graph.
///
/// Returns the offending clause on rejection.
pub fn validate_read_only(cypher: &str) -> Result<(), String> {
    match WRITE_CLAUSE.find(cypher) {
        Some(m) => Err(m.as_str().to_uppercase()),
        None => Ok(()),
    }
}

/// Text-to-Cypher retrieval.
pub struct CypherSearchEngine {
    graph: Arc<dyn GraphStore>,
    llm: QueryLlm,
    schema: Arc<GraphSchema>,
}

impl CypherSearchEngine {
    pub fn new(graph: Arc<dyn GraphStore>, llm: QueryLlm, schema: Arc<GraphSchema>) -> Self {
        Self { graph, llm, schema }
    }

    pub async fn search(&self, question: &str) -> Result<(String, QueryTrace), QueryError> {
        let cypher = self.generate_cypher(question).await?;
        tracing::debug!(%cypher, "generated cypher");

        let rows = self
            .graph
            .run_read_query(&cypher)
            .await
            .map_err(|e| QueryError::CypherFailed {
                cypher: cypher.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(rows = rows.len(), "cypher executed");

        let rendered = render_rows(&rows);
        let answer = self.llm.phrase_rows(question, &cypher, &rendered).await?;

        Ok((
            answer,
            QueryTrace {
                cypher: Some(cypher),
                rows,
                context_size: rendered.len(),
                ..Default::default()
            },
        ))
    }

    async fn generate_cypher(&self, question: &str) -> Result<String, QueryError> {
        let live = self.graph.schema_description().await?;
        let prompt = format!(
            "Stored graph:\n{live}\nDomain schema:\n{}\nQuestion: {question}\n\nCypher:",
            self.schema.describe()
        );
        let raw = self
            .llm
            .generate(&ChatRequest::text(CYPHER_SYSTEM_PROMPT, prompt))
            .await?;

        let cypher = strip_code_fence(&raw).trim_end_matches(';').trim().to_string();
        if cypher.is_empty() {
            return Err(QueryError::EmptyCypher);
        }
        if let Err(clause) = validate_read_only(&cypher) {
            tracing::warn!(%cypher, %clause, "rejected generated cypher");
            return Err(QueryError::RejectedCypher { cypher, clause });
        }
        Ok(cypher)
    }
}

fn render_rows(rows: &[Map<String, Value>]) -> String {
    if rows.is_empty() {
        return "(no rows)".to_string();
    }
    let mut rendered: Vec<String> = rows
        .iter()
        .take(MAX_ROWS_IN_PROMPT)
        .map(|row| Value::Object(row.clone()).to_string())
        .collect();
    if rows.len() > MAX_ROWS_IN_PROMPT {
        rendered.push(format!("... {} more rows", rows.len() - MAX_ROWS_IN_PROMPT));
    }
    rendered.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::LlmError;
    use extract::mock::ScriptedModel;
    use index::MemoryGraph;
    use serde_json::json;

    fn engine(model: Arc<ScriptedModel>) -> CypherSearchEngine {
        CypherSearchEngine::new(
            Arc::new(MemoryGraph::new()),
            QueryLlm::new(model),
            Arc::new(GraphSchema::default()),
        )
    }

    #[test]
    fn read_only_statements_pass() {
        for cypher in [
            "MATCH (e:Entity {name: 'Alice'})-[r:RELATIONSHIP]->(t) RETURN t.name, r.type",
            "MATCH (e:Entity) WHERE e.name CONTAINS 'Sunset' RETURN e.name AS offset LIMIT 5",
            "MATCH (c:Community) RETURN c.title ORDER BY c.rating DESC",
        ] {
            assert_eq!(validate_read_only(cypher), Ok(()), "{cypher}");
        }
    }

    #[test]
    fn write_clauses_are_rejected() {
        for (cypher, clause) in [
            ("MATCH (n) DETACH DELETE n", "DETACH"),
            ("merge (a:Entity {name: 'x'}) RETURN a", "MERGE"),
            ("MATCH (e:Entity) SET e.name = 'y'", "SET"),
            ("LOAD CSV FROM 'file:///x.csv' AS row RETURN row", "LOAD CSV"),
            ("CALL apoc.create.node(['X'], {}) YIELD node RETURN node", "CALL APOC.CREATE"),
            ("CALL gds.louvain.write('g', {}) YIELD communityCount", "CALL GDS.LOUVAIN.WRITE"),
        ] {
            assert_eq!(validate_read_only(cypher), Err(clause.to_string()), "{cypher}");
        }
    }

    #[tokio::test]
    async fn prompt_carries_both_schemas_and_fences_are_stripped() {
        let model = Arc::new(ScriptedModel::replying("```cypher\nMATCH (n:Entity) RETURN n.name;\n```"));
        let engine = engine(model.clone());

        let cypher = engine.generate_cypher("List all entities").await.unwrap();

        assert_eq!(cypher, "MATCH (n:Entity) RETURN n.name");
        let request = &model.calls()[0];
        assert!(!request.json);
        assert!(request.user.contains("SUMMARIZED_RELATIONSHIP"));
        assert!(request.user.contains(&GraphSchema::default().describe()));
        assert!(request.user.ends_with("Question: List all entities\n\nCypher:"));
    }

    #[tokio::test]
    async fn rejected_statement_is_never_executed() {
        let model = Arc::new(ScriptedModel::replying("MATCH (n) DETACH DELETE n"));
        let err = engine(model.clone()).search("Delete everything").await.unwrap_err();

        assert!(matches!(err, QueryError::RejectedCypher { ref clause, .. } if clause == "DETACH"));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_and_failed_generation_are_errors() {
        let err = engine(Arc::new(ScriptedModel::replying("```\n```")))
            .search("anything")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::EmptyCypher));

        let err = engine(Arc::new(ScriptedModel::new(|_| {
            Err(LlmError::Status { provider: "ollama", status: 404, body: "model not found".into() })
        })))
        .search("anything")
        .await
        .unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn execution_failure_is_reported_with_the_statement() {
        let model = Arc::new(ScriptedModel::replying("MATCH (n) RETURN n"));
        let err = engine(model.clone()).search("anything").await.unwrap_err();

        match err {
            QueryError::CypherFailed { cypher, message } => {
                assert_eq!(cypher, "MATCH (n) RETURN n");
                assert!(message.contains("not supported"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // no answer call after a failed execution
        assert_eq!(model.call_count(), 1);
    }

    #[test]
    fn rows_render_as_json_lines() {
        let rows: Vec<Map<String, Value>> = (0..52)
            .map(|i| json!({"name": format!("E{i}")}).as_object().cloned().unwrap())
            .collect();
        let rendered = render_rows(&rows);
        assert!(rendered.starts_with("{\"name\":\"E0\"}\n"));
        assert!(rendered.ends_with("... 2 more rows"));
        assert_eq!(render_rows(&[]), "(no rows)");
    }
}
