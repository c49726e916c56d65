pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod response;
pub mod schema;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use llm::{
    ChatRequest, LanguageModel, LlmConfig, LlmError, OllamaClient, OpenAiClient, Provider,
    build_language_model,
};
pub use normalizer::EntityNormalizer;
pub use response::{ExtractionResponse, ParseError, parse_extraction, strip_code_fence};
pub use schema::{AllowedRelationship, GraphSchema, NodeType, PropertySpec, RelationType, SchemaError};
pub use types::{DocumentExtraction, ExtractedEntity, ExtractedRelationship};

use ingest::Document;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// What to do when a single document cannot be extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Log, skip the document and keep going.
    #[default]
    Ignore,
    /// Abort the batch.
    Raise,
}

impl std::str::FromStr for OnError {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(OnError::Ignore),
            "raise" => Ok(OnError::Raise),
            other => Err(format!("invalid on_error {other:?}, expected 'ignore' or 'raise'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document {doc_id} has no text")]
    EmptyInput { doc_id: String },
    #[error("language model failed for document {doc_id}: {source}")]
    Llm {
        doc_id: String,
        #[source]
        source: LlmError,
    },
    #[error("could not parse extraction for document {doc_id}: {source}")]
    Parse {
        doc_id: String,
        #[source]
        source: ParseError,
    },
}

impl ExtractError {
    pub fn doc_id(&self) -> &str {
        match self {
            ExtractError::EmptyInput { doc_id }
            | ExtractError::Llm { doc_id, .. }
            | ExtractError::Parse { doc_id, .. } => doc_id,
        }
    }
}

/// Name canonicalization and identifier assignment shared by every document
/// of one run.
#[derive(Debug, Default)]
pub struct ExtractionBatch {
    normalizer: EntityNormalizer,
    ids: HashMap<String, String>,
}

impl ExtractionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical name and its batch identifier; a fresh UUID for unseen names.
    pub fn resolve(&mut self, name: &str) -> Option<(String, String)> {
        let canonical = self.normalizer.normalize(name)?;
        let id = self
            .ids
            .entry(canonical.clone())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        Some((canonical, id))
    }

    /// Start from names already in the graph, keeping their spelling and id.
    pub fn with_known<I>(known: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut batch = Self::new();
        for (name, id) in known {
            if let Some(canonical) = batch.normalizer.register(&name) {
                batch.ids.entry(canonical).or_insert(id);
            }
        }
        batch
    }

    pub fn id_of(&self, canonical: &str) -> Option<&str> {
        self.ids.get(canonical).map(String::as_str)
    }

    pub fn entity_count(&self) -> usize {
        self.ids.len()
    }
}

pub struct Extractor {
    llm: Arc<dyn LanguageModel>,
    schema: Arc<GraphSchema>,
    system_prompt: String,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LanguageModel>, schema: Arc<GraphSchema>) -> Self {
        let system_prompt = prompt::build_extraction_system_prompt(&schema);
        Self {
            llm,
            schema,
            system_prompt,
        }
    }

    pub fn schema(&self) -> &GraphSchema {
        &self.schema
    }

    /// Extract entities and relationships from one document.
    pub async fn extract(
        &self,
        document: &Document,
        batch: &mut ExtractionBatch,
    ) -> Result<DocumentExtraction, ExtractError> {
        if document.text.trim().is_empty() {
            return Err(ExtractError::EmptyInput {
                doc_id: document.doc_id.clone(),
            });
        }

        let request = ChatRequest::json(
            self.system_prompt.clone(),
            prompt::build_extraction_prompt(&document.text),
        );
        let raw = self
            .llm
            .complete(&request)
            .await
            .map_err(|source| ExtractError::Llm {
                doc_id: document.doc_id.clone(),
                source,
            })?;

        let response = parse_extraction(&raw).map_err(|source| ExtractError::Parse {
            doc_id: document.doc_id.clone(),
            source,
        })?;

        let extraction = self.assemble(document, &response, batch);
        tracing::debug!(
            doc_id = %document.doc_id,
            entities = extraction.entities.len(),
            relationships = extraction.relationships.len(),
            "extracted document"
        );
        Ok(extraction)
    }

    fn assemble(
        &self,
        document: &Document,
        response: &ExtractionResponse,
        batch: &mut ExtractionBatch,
    ) -> DocumentExtraction {
        let mut entities: Vec<ExtractedEntity> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        let mut touch = |name: &str, batch: &mut ExtractionBatch| -> Option<(String, usize)> {
            let (canonical, id) = batch.resolve(name)?;
            let idx = *positions.entry(canonical.clone()).or_insert_with(|| {
                entities.push(ExtractedEntity {
                    id,
                    name: canonical.clone(),
                    types: Vec::new(),
                    descriptions: Vec::new(),
                });
                entities.len() - 1
            });
            Some((canonical, idx))
        };

        let mut typed: Vec<(usize, Option<String>, Option<String>)> = Vec::new();
        for raw in response.entities() {
            let Some(name) = raw.name.as_deref() else {
                continue;
            };
            if let Some((_, idx)) = touch(name, &mut *batch) {
                typed.push((idx, raw.entity_type.clone(), raw.description.clone()));
            }
        }

        let mut relationships = Vec::new();
        for raw in response.relationships() {
            // relationships() guarantees all three are present
            let (Some(source), Some(target), Some(rel_type)) =
                (&raw.source, &raw.target, &raw.relation_type)
            else {
                continue;
            };
            let (Some((source, _)), Some((target, _))) =
                (touch(source.as_str(), &mut *batch), touch(target.as_str(), &mut *batch))
            else {
                continue;
            };

            let relation_type = rel_type.trim().to_string();
            if !self.schema.is_known_relationship(&relation_type) {
                tracing::debug!(relation_type = %relation_type, "relationship type outside schema");
            }

            relationships.push(ExtractedRelationship {
                source,
                target,
                relation_type,
                description: raw.description.as_deref().unwrap_or("").trim().to_string(),
                strength: raw.strength,
            });
        }

        for (idx, entity_type, description) in typed {
            let entity = &mut entities[idx];
            if let Some(t) = entity_type.map(|t| t.trim().to_string()) {
                if !t.is_empty() && !entity.types.contains(&t) {
                    entity.types.push(t);
                }
            }
            if let Some(d) = description.map(|d| d.trim().to_string()) {
                if !d.is_empty() && !entity.descriptions.contains(&d) {
                    entity.descriptions.push(d);
                }
            }
        }

        DocumentExtraction {
            doc_id: document.doc_id.clone(),
            source: document.source.clone(),
            entities,
            relationships,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedModel;

    fn extractor(model: ScriptedModel) -> (Extractor, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let extractor = Extractor::new(model.clone(), Arc::new(GraphSchema::default()));
        (extractor, model)
    }

    fn doc(text: &str) -> Document {
        Document::new("test", 0, text.to_string())
    }

    #[tokio::test]
    async fn extracts_single_triple() {
        let (extractor, model) = extractor(ScriptedModel::replying(
            r#"{"relationships": [{"source": "Alice", "target": "TechCorp", "type": "WORKS_AT"}]}"#,
        ));
        let mut batch = ExtractionBatch::new();

        let out = extractor.extract(&doc("Alice works at TechCorp."), &mut batch).await.unwrap();

        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.relationships.len(), 1);
        assert_eq!(out.relationships[0].relation_type, "WORKS_AT");
        assert!(model.calls()[0].json);
        assert!(model.calls()[0].system.contains("### NODE TYPES:"));
    }

    #[tokio::test]
    async fn names_are_canonicalized_and_ids_stable_in_batch() {
        let (extractor, _) = extractor(ScriptedModel::new(|req: &ChatRequest| {
            if req.user.contains("first") {
                Ok(r#"{"entities": [{"name": "Alice", "type": "Person", "description": "An engineer"}],
                       "relationships": [{"source": "Alice", "target": "TechCorp.", "type": "WORKS_AT"}]}"#
                    .to_string())
            } else {
                Ok(r#"{"entities": [{"name": "alice", "type": "Person", "description": "Lives in Seattle"}],
                       "relationships": []}"#
                    .to_string())
            }
        }));
        let mut batch = ExtractionBatch::new();

        let first = extractor.extract(&doc("first"), &mut batch).await.unwrap();
        let second = extractor.extract(&doc("second"), &mut batch).await.unwrap();

        assert_eq!(first.relationships[0].target, "TechCorp");
        assert_eq!(second.entities[0].name, "Alice");
        assert_eq!(first.entities[0].id, second.entities[0].id);
        assert_eq!(second.entities[0].descriptions, vec!["Lives in Seattle"]);
        assert_eq!(batch.entity_count(), 2);
    }

    #[tokio::test]
    async fn known_graph_names_keep_their_spelling_and_id() {
        let (extractor, _) = extractor(ScriptedModel::replying(
            r#"{"relationships": [{"source": "ALICE", "target": "techcorp", "type": "WORKS_AT"}]}"#,
        ));
        let mut batch = ExtractionBatch::with_known([
            ("Alice".to_string(), "existing-alice".to_string()),
            ("TechCorp".to_string(), "existing-techcorp".to_string()),
        ]);

        let out = extractor.extract(&doc("text"), &mut batch).await.unwrap();

        assert_eq!(out.relationships[0].source, "Alice");
        assert_eq!(out.relationships[0].target, "TechCorp");
        assert_eq!(batch.id_of("Alice"), Some("existing-alice"));
        assert_eq!(batch.entity_count(), 2);
    }

    #[tokio::test]
    async fn entity_types_and_descriptions_attach_to_relationship_endpoints() {
        let (extractor, _) = extractor(ScriptedModel::replying(
            r#"{"entities": [{"name": "TechCorp", "type": "Organization", "description": ""}],
                "relationships": [{"source": "Alice", "target": "TechCorp", "type": "WORKS_AT", "description": " since 2020 "}]}"#,
        ));
        let mut batch = ExtractionBatch::new();

        let out = extractor.extract(&doc("text"), &mut batch).await.unwrap();
        let techcorp = out.entities.iter().find(|e| e.name == "TechCorp").unwrap();

        assert_eq!(techcorp.types, vec!["Organization"]);
        assert!(techcorp.descriptions.is_empty());
        assert_eq!(out.relationships[0].description, "since 2020");
    }

    #[tokio::test]
    async fn unknown_relationship_types_pass_through() {
        let (extractor, _) = extractor(ScriptedModel::replying(
            r#"{"relationships": [{"source": "Alice", "target": "Bob", "type": "MENTORS"}]}"#,
        ));
        let out = extractor
            .extract(&doc("Alice mentors Bob"), &mut ExtractionBatch::new())
            .await
            .unwrap();
        assert_eq!(out.relationships[0].relation_type, "MENTORS");
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_a_call() {
        let (extractor, model) = extractor(ScriptedModel::replying("{}"));
        let err = extractor
            .extract(&doc("   "), &mut ExtractionBatch::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::EmptyInput { .. }));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_reply_is_a_parse_error() {
        let (extractor, _) = extractor(ScriptedModel::replying("I could not find anything."));
        let document = doc("Alice");
        let err = extractor
            .extract(&document, &mut ExtractionBatch::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::Parse { .. }));
        assert_eq!(err.doc_id(), document.doc_id);
    }

    #[tokio::test]
    async fn upstream_failure_is_an_llm_error() {
        let (extractor, _) = extractor(ScriptedModel::failing("connection refused"));
        let err = extractor
            .extract(&doc("Alice"), &mut ExtractionBatch::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Llm { .. }));
    }

    #[test]
    fn on_error_parses() {
        assert_eq!("RAISE".parse::<OnError>().unwrap(), OnError::Raise);
        assert_eq!(OnError::default(), OnError::Ignore);
        assert!("panic".parse::<OnError>().is_err());
    }
}
