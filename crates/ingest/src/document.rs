use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One unit of extraction input: a whole file, a chunk of one, or a table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub source: String,
    pub text: String,
}

impl Document {
    /// `position` is the row or chunk ordinal inside `source`.
    pub fn new(source: &str, position: usize, text: String) -> Self {
        let doc_id = Self::generate_doc_id(source, position, &text);
        Self {
            doc_id,
            source: source.to_string(),
            text,
        }
    }

    fn generate_doc_id(source: &str, position: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(position.to_string().as_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // 32 hex chars
    }

    /// Estimate token count (rough: 1.3 tokens per word)
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

pub(crate) fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f64 * 1.3) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_is_stable() {
        let a = Document::new("data.csv", 3, "Alice works at TechCorp".to_string());
        let b = Document::new("data.csv", 3, "Alice works at TechCorp".to_string());
        assert_eq!(a.doc_id, b.doc_id);
        assert_eq!(a.doc_id.len(), 32);
    }

    #[test]
    fn doc_id_depends_on_position() {
        let a = Document::new("data.csv", 0, "same".to_string());
        let b = Document::new("data.csv", 1, "same".to_string());
        assert_ne!(a.doc_id, b.doc_id);
    }

    #[test]
    fn estimates_tokens_from_words() {
        let doc = Document::new("x.txt", 0, "one two three four five six seven eight nine ten".to_string());
        assert_eq!(doc.estimated_tokens(), 13);
    }
}
