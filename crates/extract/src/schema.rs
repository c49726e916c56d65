use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON schema: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML schema: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("allowed relationship {0} references an undeclared type")]
    UnknownLabel(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    #[serde(rename = "type", default = "default_property_type")]
    pub value_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

fn default_property_type() -> String {
    "STRING".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    pub label: String,
    pub description: String,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationType {
    pub label: String,
    pub description: String,
}

/// (source node label, relationship label, target node label)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedRelationship(pub String, pub String, pub String);

/// Closed set of node types, relationship types and their valid pairings.
///
/// Loaded once at startup and shared read-only; it constrains the extraction
/// prompt and is rendered into the text-to-Cypher prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSchema {
    pub node_types: Vec<NodeType>,
    #[serde(default)]
    pub relation_types: Vec<RelationType>,
    #[serde(default)]
    pub allowed_relationships: Vec<AllowedRelationship>,
}

impl GraphSchema {
    /// Load from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, SchemaError> {
        let schema: Self = serde_json::from_str(content)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        let schema: Self = toml::from_str(content)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Every allowed triple must reference declared node and relationship types.
    /// An empty `relation_types` list leaves relationship labels unchecked.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for triple in &self.allowed_relationships {
            let AllowedRelationship(source, rel, target) = triple;
            let rel_known = self.relation_types.is_empty() || self.is_known_relationship(rel);
            if !self.is_known_node_type(source) || !self.is_known_node_type(target) || !rel_known {
                return Err(SchemaError::UnknownLabel(format!(
                    "{source} --[{rel}]--> {target}"
                )));
            }
        }
        Ok(())
    }

    pub fn node_labels(&self) -> Vec<&str> {
        self.node_types.iter().map(|n| n.label.as_str()).collect()
    }

    /// Relationship labels, declared or implied by the allowed triples.
    pub fn relationship_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.relation_types.iter().map(|r| r.label.as_str()).collect();
        for AllowedRelationship(_, rel, _) in &self.allowed_relationships {
            if !labels.contains(&rel.as_str()) {
                labels.push(rel);
            }
        }
        labels
    }

    pub fn is_known_node_type(&self, label: &str) -> bool {
        self.node_types.iter().any(|n| n.label.eq_ignore_ascii_case(label))
    }

    pub fn is_known_relationship(&self, label: &str) -> bool {
        self.relationship_labels()
            .iter()
            .any(|r| r.eq_ignore_ascii_case(label))
    }

    pub fn allows(&self, source: &str, relationship: &str, target: &str) -> bool {
        self.allowed_relationships.iter().any(|AllowedRelationship(s, r, t)| {
            s.eq_ignore_ascii_case(source)
                && r.eq_ignore_ascii_case(relationship)
                && t.eq_ignore_ascii_case(target)
        })
    }

    /// Natural-language description used in extraction and Cypher prompts.
    pub fn describe(&self) -> String {
        let mut prompt = String::from("### NODE TYPES:\n");
        for node in &self.node_types {
            let _ = write!(prompt, "\n**{}**: {}", node.label, node.description);
            if !node.properties.is_empty() {
                prompt.push_str("\n  Properties:");
                for prop in &node.properties {
                    let required = if prop.required { " (REQUIRED)" } else { "" };
                    let _ = write!(
                        prompt,
                        "\n    - {}: {}{} - {}",
                        prop.name, prop.value_type, required, prop.description
                    );
                }
            }
        }

        if !self.relation_types.is_empty() {
            prompt.push_str("\n\n### RELATIONSHIP TYPES:\n");
            for rel in &self.relation_types {
                let _ = write!(prompt, "\n**{}**: {}", rel.label, rel.description);
            }
        }

        if !self.allowed_relationships.is_empty() {
            prompt.push_str("\n\n### ALLOWED RELATIONSHIPS:\n");
            for AllowedRelationship(source, rel, target) in &self.allowed_relationships {
                let _ = write!(prompt, "\n- {source} --[{rel}]--> {target}");
            }
        }

        prompt.push('\n');
        prompt
    }
}

impl Default for GraphSchema {
    /// Generic people/organization/location schema.
    fn default() -> Self {
        let node = |label: &str, description: &str| NodeType {
            label: label.to_string(),
            description: description.to_string(),
            properties: Vec::new(),
        };
        let rel = |label: &str, description: &str| RelationType {
            label: label.to_string(),
            description: description.to_string(),
        };
        let allowed = |s: &str, r: &str, t: &str| {
            AllowedRelationship(s.to_string(), r.to_string(), t.to_string())
        };

        Self {
            node_types: vec![
                node("Person", "An individual human being."),
                node("Organization", "A company, institution, team or other group."),
                node("Location", "A geographic place such as a city, office or region."),
            ],
            relation_types: vec![
                rel("WORKS_AT", "A person is employed by or works for an organization."),
                rel("LOCATED_IN", "An organization or person is based in a location."),
                rel("KNOWS", "Two people know or collaborate with each other."),
                rel("PART_OF", "An organization is part of another organization."),
            ],
            allowed_relationships: vec![
                allowed("Person", "WORKS_AT", "Organization"),
                allowed("Person", "LOCATED_IN", "Location"),
                allowed("Organization", "LOCATED_IN", "Location"),
                allowed("Person", "KNOWS", "Person"),
                allowed("Organization", "PART_OF", "Organization"),
            ],
        }
    }
}
