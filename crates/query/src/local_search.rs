use index::{EntityVectorIndex, GraphStore, Neighborhood};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::llm::QueryLlm;
use crate::{QueryError, QueryTrace};

const MAX_CONTEXT_ENTITIES: usize = 20;
const MAX_CONTEXT_RELATIONSHIPS: usize = 30;

/// Vector retrieval: nearest entities, expanded through the graph.
pub struct LocalSearchEngine {
    graph: Arc<dyn GraphStore>,
    index: Arc<EntityVectorIndex>,
    llm: QueryLlm,
}

impl LocalSearchEngine {
    pub fn new(graph: Arc<dyn GraphStore>, index: Arc<EntityVectorIndex>, llm: QueryLlm) -> Self {
        Self { graph, index, llm }
    }

    pub async fn search(
        &self,
        question: &str,
        top_k: usize,
        hops: usize,
    ) -> Result<(String, QueryTrace), QueryError> {
        let mut hits = self.index.search(question, top_k.max(1)).await?;
        let candidates: Vec<String> = hits.iter().map(|h| h.name.clone()).collect();

        let neighborhood = if candidates.is_empty() {
            Neighborhood::default()
        } else {
            self.graph.neighborhood(&candidates, hops).await?
        };

        // The index can lag behind the graph; only seeds that exist count.
        let known: HashSet<&str> = neighborhood.entities.iter().map(|e| e.name.as_str()).collect();
        let before = hits.len();
        hits.retain(|h| known.contains(h.name.as_str()));
        if hits.len() < before {
            tracing::warn!(dropped = before - hits.len(), "vector hits missing from graph");
        }
        let seeds: Vec<String> = hits.iter().map(|h| h.name.clone()).collect();

        tracing::debug!(
            hits = hits.len(),
            expanded = neighborhood.entities.len(),
            hops,
            "expanded vector hits"
        );

        let context = build_context(&seeds, &neighborhood);
        let answer = self.llm.answer(question, &context).await?;

        Ok((
            answer,
            QueryTrace {
                expanded_entities: neighborhood.entities.iter().map(|e| e.name.clone()).collect(),
                hits,
                context_size: context.len(),
                ..Default::default()
            },
        ))
    }
}

/// Seed entities first, then their neighbors. Each directed pair appears once,
/// preferring its summarized edge.
fn build_context(seeds: &[String], neighborhood: &Neighborhood) -> String {
    if neighborhood.entities.is_empty() {
        return "No matching entities were found in the knowledge graph.".to_string();
    }

    let seed_set: HashSet<&str> = seeds.iter().map(String::as_str).collect();
    let mut entities: Vec<_> = neighborhood.entities.iter().collect();
    entities.sort_by_key(|e| !seed_set.contains(e.name.as_str()));

    let mut context = String::from("ENTITIES:\n");
    for entity in entities.iter().take(MAX_CONTEXT_ENTITIES) {
        let types = if entity.types.is_empty() {
            String::new()
        } else {
            format!(" ({})", entity.types.join(", "))
        };
        let _ = writeln!(context, "- {}{}: {}", entity.name, types, entity.best_description());
    }

    let mut pairs: BTreeMap<(&str, &str), (Vec<&str>, String)> = BTreeMap::new();
    for rel in &neighborhood.relationships {
        let entry = pairs
            .entry((rel.source.as_str(), rel.target.as_str()))
            .or_default();
        if !entry.0.contains(&rel.relation_type.as_str()) {
            entry.0.push(rel.relation_type.as_str());
        }
        if entry.1.is_empty() {
            entry.1 = rel.description.clone();
        }
    }
    for summarized in &neighborhood.summarized {
        if let Some(entry) = pairs.get_mut(&(summarized.source.as_str(), summarized.target.as_str())) {
            entry.1 = summarized.summary.clone();
        }
    }

    if !pairs.is_empty() {
        context.push_str("\nRELATIONSHIPS:\n");
        for ((source, target), (types, description)) in pairs.iter().take(MAX_CONTEXT_RELATIONSHIPS) {
            let _ = write!(context, "- {source} -[{}]-> {target}", types.join(", "));
            if !description.is_empty() {
                let _ = write!(context, ": {description}");
            }
            context.push('\n');
        }
    }
    context
}
