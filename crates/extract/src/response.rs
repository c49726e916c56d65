use serde::Deserialize;
use thiserror::Error;

/// The model's reply did not match any accepted extraction shape.
#[derive(Debug, Error)]
#[error("extraction response does not match the expected schema: {0}")]
pub struct ParseError(#[from] serde_json::Error);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEntity {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRelationship {
    pub source: Option<String>,
    pub target: Option<String>,
    #[serde(rename = "type")]
    pub relation_type: Option<String>,
    pub description: Option<String>,
    pub strength: Option<f64>,
}

/// Bare triple form: `{"node", "target_node", "relationship"}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTriple {
    pub node: Option<String>,
    pub target_node: Option<String>,
    pub relationship: Option<String>,
}

/// Accepted reply shapes. Fields may be null or missing inside an item
/// (degenerate items are filtered later) but their types are checked.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExtractionResponse {
    Relationships {
        #[serde(default)]
        entities: Vec<RawEntity>,
        relationships: Vec<RawRelationship>,
    },
    Triples {
        graph: Vec<RawTriple>,
    },
}

impl ExtractionResponse {
    /// Relationships with all three endpoints present and non-blank.
    pub fn relationships(&self) -> Vec<RawRelationship> {
        let items: Vec<RawRelationship> = match self {
            ExtractionResponse::Relationships { relationships, .. } => relationships.clone(),
            ExtractionResponse::Triples { graph } => graph
                .iter()
                .map(|t| RawRelationship {
                    source: t.node.clone(),
                    target: t.target_node.clone(),
                    relation_type: t.relationship.clone(),
                    description: None,
                    strength: None,
                })
                .collect(),
        };

        items
            .into_iter()
            .filter(|r| {
                [&r.source, &r.target, &r.relation_type]
                    .iter()
                    .all(|field| field.as_deref().is_some_and(|s| !s.trim().is_empty()))
            })
            .collect()
    }

    pub fn entities(&self) -> &[RawEntity] {
        match self {
            ExtractionResponse::Relationships { entities, .. } => entities,
            ExtractionResponse::Triples { .. } => &[],
        }
    }
}

/// Parse a model reply, tolerating a surrounding markdown code fence.
pub fn parse_extraction(raw: &str) -> Result<ExtractionResponse, ParseError> {
    Ok(serde_json::from_str(strip_code_fence(raw))?)
}

pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (```json, ```cypher, ...)
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relationship_shape() {
        let raw = r#"{
            "entities": [{"name": "Alice", "type": "Person", "description": "Engineer"}],
            "relationships": [
                {"source": "Alice", "target": "TechCorp", "type": "WORKS_AT", "strength": 0.9},
                {"source": "Alice", "target": " ", "type": "KNOWS"},
                {"source": "Bob", "type": "KNOWS"}
            ]
        }"#;
        let response = parse_extraction(raw).unwrap();

        assert_eq!(response.entities().len(), 1);
        let rels = response.relationships();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relation_type.as_deref(), Some("WORKS_AT"));
        assert_eq!(rels[0].strength, Some(0.9));
    }

    #[test]
    fn parses_triple_shape_inside_fence() {
        let raw = "```json\n{\"graph\": [{\"node\": \"Alice\", \"target_node\": \"TechCorp\", \"relationship\": \"WORKS_AT\"}, {\"node\": \"x\"}]}\n```";
        let response = parse_extraction(raw).unwrap();

        let rels = response.relationships();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].source.as_deref(), Some("Alice"));
        assert!(response.entities().is_empty());
    }

    #[test]
    fn missing_relationships_is_a_parse_error() {
        assert!(parse_extraction(r#"{"entities": []}"#).is_err());
    }

    #[test]
    fn wrong_value_type_is_a_parse_error() {
        let raw = r#"{"relationships": [{"source": "A", "target": "B", "type": "R", "strength": "high"}]}"#;
        assert!(parse_extraction(raw).is_err());
    }

    #[test]
    fn prose_is_a_parse_error() {
        let err = parse_extraction("Sure! Here are the entities: Alice, TechCorp").unwrap_err();
        assert!(err.to_string().contains("expected schema"));
    }

    #[test]
    fn fence_without_language_is_stripped() {
        assert_eq!(strip_code_fence("```\nMATCH (n) RETURN n\n```"), "MATCH (n) RETURN n");
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }
}
