use serde::{Deserialize, Serialize};

use crate::document::{estimate_tokens, Document};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub target_tokens_min: usize,
    pub target_tokens_max: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens_min: 700,
            target_tokens_max: 900,
            overlap_tokens: 100,
        }
    }
}

/// Splits long prose into documents small enough for a single extraction call.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk_text(&self, source: &str, text: &str) -> Vec<Document> {
        let mut pieces: Vec<String> = Vec::new();

        for section in self.split_by_headings(text) {
            if estimate_tokens(&section) <= self.config.target_tokens_max {
                push_piece(&mut pieces, section, self.config.target_tokens_min);
                continue;
            }

            // Section too long: pack paragraphs, carrying a word overlap forward
            let mut buffer = String::new();
            let mut fresh = false;
            for para in self.split_by_paragraphs(&section) {
                let over = estimate_tokens(&buffer) + estimate_tokens(&para)
                    > self.config.target_tokens_max;
                if over && fresh {
                    let overlap = self.get_overlap(&buffer, self.config.overlap_tokens);
                    pieces.push(std::mem::take(&mut buffer));
                    buffer = overlap;
                    fresh = false;
                }
                if !buffer.is_empty() {
                    buffer.push_str("\n\n");
                }
                buffer.push_str(&para);
                fresh = true;
            }
            if fresh {
                pieces.push(buffer);
            }
        }

        pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .enumerate()
            .map(|(position, piece)| Document::new(source, position, piece.trim().to_string()))
            .collect()
    }

    fn split_by_headings(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current_section = String::new();

        for line in text.lines() {
            if line.trim_start().starts_with('#') && !current_section.trim().is_empty() {
                sections.push(std::mem::take(&mut current_section));
            }
            current_section.push_str(line);
            current_section.push('\n');
        }

        if !current_section.trim().is_empty() {
            sections.push(current_section);
        }

        sections
    }

    fn split_by_paragraphs(&self, text: &str) -> Vec<String> {
        text.split("\n\n")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn get_overlap(&self, text: &str, target_tokens: usize) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        let target_words = (target_tokens as f64 / 1.3) as usize;

        if target_words == 0 {
            return String::new();
        }
        if words.len() <= target_words {
            return text.to_string();
        }

        words[words.len() - target_words..].join(" ")
    }
}

/// Small sections are merged into the previous piece until it reaches the
/// minimum size.
fn push_piece(pieces: &mut Vec<String>, section: String, min_tokens: usize) {
    if let Some(last) = pieces.last_mut() {
        if estimate_tokens(last) + estimate_tokens(&section) < min_tokens {
            last.push('\n');
            last.push_str(&section);
            return;
        }
    }
    pieces.push(section);
}
