use crate::schema::GraphSchema;

pub fn build_extraction_system_prompt(schema: &GraphSchema) -> String {
    format!(
        r#"You are a top-tier algorithm designed for extracting information in structured formats to build a knowledge graph.

Extract entities and the relationships between them from the user's text, using ONLY the types below.

{schema}
INSTRUCTIONS:
1. Identify the entities in the text that match one of the node types
2. Extract relationships between those entities, respecting the allowed relationships
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

OUTPUT SCHEMA:
{{
  "entities": [
    {{"name": "EntityName", "type": "NODE_TYPE", "description": "brief description from the text"}}
  ],
  "relationships": [
    {{"source": "EntityName", "target": "OtherEntity", "type": "RELATIONSHIP_TYPE", "description": "why they are related", "strength": 0.8}}
  ]
}}

RULES:
- Refer to entities by their name as written in the text, never by an invented id
- Use the same name every time the same entity is mentioned
- strength is a number between 0 and 1
- Do not add information that is not in the text
- Output ONLY the JSON object, no markdown, no explanations"#,
        schema = schema.describe()
    )
}

pub fn build_extraction_prompt(text: &str) -> String {
    format!("TEXT:\n{text}\n\nJSON OUTPUT:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_embeds_schema() {
        let prompt = build_extraction_system_prompt(&GraphSchema::default());
        assert!(prompt.contains("**Person**"));
        assert!(prompt.contains("- Person --[WORKS_AT]--> Organization"));
        assert!(prompt.contains("\"relationships\""));
    }

    #[test]
    fn user_prompt_wraps_text() {
        let prompt = build_extraction_prompt("Alice works at TechCorp.");
        assert!(prompt.starts_with("TEXT:\nAlice works at TechCorp."));
    }
}
