use index::{EntityRecord, RelationshipRecord, SummarizedRelationship};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Undirected weighted view of the entity graph, indexed for clustering.
#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub entities: Vec<String>,
    pub edges: Vec<(usize, usize)>, // (source_idx, target_idx)
    pub entity_to_idx: HashMap<String, usize>,
}

impl GraphData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entity becomes a node, every raw edge a unit of weight.
    pub fn from_store(entities: &[EntityRecord], relationships: &[RelationshipRecord]) -> Self {
        let mut graph = Self::new();
        for entity in entities {
            graph.add_entity(entity.name.clone());
        }
        for rel in relationships {
            let source = graph.add_entity(rel.source.clone());
            let target = graph.add_entity(rel.target.clone());
            graph.add_edge(source, target);
        }
        graph
    }

    pub fn add_entity(&mut self, name: String) -> usize {
        if let Some(&idx) = self.entity_to_idx.get(&name) {
            return idx;
        }

        let idx = self.entities.len();
        self.entities.push(name.clone());
        self.entity_to_idx.insert(name, idx);
        idx
    }

    pub fn add_edge(&mut self, source: usize, target: usize) {
        self.edges.push((source, target));
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberView {
    pub name: String,
    pub types: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationView {
    pub source: String,
    pub target: String,
    pub relation_types: Vec<String>,
    pub description: String,
}

/// Members of one cluster and the relationships inside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityView {
    pub id: i64,
    pub members: Vec<MemberView>,
    pub relationships: Vec<RelationView>,
}

impl CommunityView {
    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }
}

/// Group entities by their `community` property. Internal relationships use
/// the pair summary when one exists and the raw descriptions otherwise.
pub fn community_views(
    entities: &[EntityRecord],
    relationships: &[RelationshipRecord],
    summarized: &[SummarizedRelationship],
) -> Vec<CommunityView> {
    let mut membership: HashMap<&str, i64> = HashMap::new();
    let mut groups: BTreeMap<i64, Vec<MemberView>> = BTreeMap::new();
    for entity in entities {
        let Some(community) = entity.community else {
            continue;
        };
        membership.insert(entity.name.as_str(), community);
        groups.entry(community).or_default().push(MemberView {
            name: entity.name.clone(),
            types: entity.types.clone(),
            summary: entity.best_description(),
        });
    }

    let summaries: HashMap<(&str, &str), &str> = summarized
        .iter()
        .map(|s| ((s.source.as_str(), s.target.as_str()), s.summary.as_str()))
        .collect();

    // (community, source, target) -> (types, raw descriptions)
    let mut pairs: BTreeMap<(i64, &str, &str), (Vec<String>, Vec<&str>)> = BTreeMap::new();
    for rel in relationships {
        let (Some(&a), Some(&b)) = (
            membership.get(rel.source.as_str()),
            membership.get(rel.target.as_str()),
        ) else {
            continue;
        };
        if a != b {
            continue;
        }
        let entry = pairs
            .entry((a, rel.source.as_str(), rel.target.as_str()))
            .or_default();
        if !entry.0.contains(&rel.relation_type) {
            entry.0.push(rel.relation_type.clone());
        }
        if !rel.description.is_empty() && !entry.1.contains(&rel.description.as_str()) {
            entry.1.push(rel.description.as_str());
        }
    }

    let mut internal: BTreeMap<i64, Vec<RelationView>> = BTreeMap::new();
    for ((community, source, target), (relation_types, descriptions)) in pairs {
        let description = match summaries.get(&(source, target)) {
            Some(summary) => summary.to_string(),
            None => descriptions.join(" "),
        };
        internal.entry(community).or_default().push(RelationView {
            source: source.to_string(),
            target: target.to_string(),
            relation_types,
            description,
        });
    }

    groups
        .into_iter()
        .map(|(id, members)| CommunityView {
            id,
            members,
            relationships: internal.remove(&id).unwrap_or_default(),
        })
        .collect()
}
