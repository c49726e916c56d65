use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static EDGE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^["'`]+|["'`.,!?;:]+$"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Canonicalizes entity names within one extraction batch.
///
/// The first spelling seen (or registered) for a name wins; later
/// case-insensitive variants resolve to it.
#[derive(Debug, Default)]
pub struct EntityNormalizer {
    /// Lowercased key -> canonical spelling
    aliases: HashMap<String, String>,
}

impl EntityNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trim, strip surrounding quotes and trailing punctuation, collapse whitespace.
    pub fn clean(name: &str) -> String {
        let collapsed = WHITESPACE.replace_all(name.trim(), " ");
        EDGE_PUNCTUATION.replace_all(&collapsed, "").trim().to_string()
    }

    /// Canonical spelling for `name`, or `None` when nothing is left after cleaning.
    pub fn normalize(&mut self, name: &str) -> Option<String> {
        let cleaned = Self::clean(name);
        if cleaned.is_empty() {
            return None;
        }

        let canonical = self
            .aliases
            .entry(cleaned.to_lowercase())
            .or_insert(cleaned);
        Some(canonical.clone())
    }

    /// Record an already established spelling so later variants resolve to it.
    /// An earlier registration for the same key is kept.
    pub fn register(&mut self, canonical: &str) -> Option<String> {
        let cleaned = Self::clean(canonical);
        if cleaned.is_empty() {
            return None;
        }
        let kept = self
            .aliases
            .entry(cleaned.to_lowercase())
            .or_insert_with(|| canonical.to_string());
        Some(kept.clone())
    }

    pub fn aliases(&self) -> &HashMap<String, String> {
        &self.aliases
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let mut normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.normalize("GraphRAG").as_deref(), Some("GraphRAG"));
        assert_eq!(normalizer.normalize("GraphRAG!").as_deref(), Some("GraphRAG"));
        assert_eq!(normalizer.normalize("  \"GraphRAG\"  ").as_deref(), Some("GraphRAG"));
        assert_eq!(normalizer.len(), 1);
    }

    #[test]
    fn first_spelling_wins() {
        let mut normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.normalize("Root  Rot").as_deref(), Some("Root Rot"));
        assert_eq!(normalizer.normalize("root rot").as_deref(), Some("Root Rot"));
        assert_eq!(normalizer.normalize("ROOT ROT.").as_deref(), Some("Root Rot"));
    }

    #[test]
    fn registered_spelling_wins() {
        let mut normalizer = EntityNormalizer::new();
        normalizer.register("TechCorp");

        assert_eq!(normalizer.normalize("TECHCORP").as_deref(), Some("TechCorp"));
        assert_eq!(normalizer.register("techcorp").as_deref(), Some("TechCorp"));
    }

    #[test]
    fn distinct_names_stay_distinct() {
        let mut normalizer = EntityNormalizer::new();

        let a = normalizer.normalize("OpenAI").unwrap();
        let b = normalizer.normalize("OpenAI Inc").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut normalizer = EntityNormalizer::new();
        assert_eq!(normalizer.normalize(" ... "), None);
        assert!(normalizer.is_empty());
    }

    #[test]
    fn inner_punctuation_is_kept() {
        assert_eq!(EntityNormalizer::clean("St. John's wort."), "St. John's wort");
    }
}
