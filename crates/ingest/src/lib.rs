pub mod chunker;
pub mod document;
pub mod reader;
pub mod tabular;

pub use chunker::{Chunker, ChunkerConfig};
pub use document::Document;
pub use reader::{FileReader, LoaderOptions};
pub use tabular::render_row;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("unsupported file format: {0}")]
    Unsupported(String),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to walk directory: {0}")]
    Walk(String),
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read workbook {path:?}: {message}")]
    Workbook { path: PathBuf, message: String },
    #[error("workbook {path:?} has no sheet named {sheet:?}")]
    MissingSheet { path: PathBuf, sheet: String },
    #[error("invalid JSON in {file} line {line}: {error}")]
    Json {
        file: String,
        line: usize,
        #[source]
        error: serde_json::Error,
    },
}

/// Load documents from every path, in the given order.
pub async fn load_paths(
    paths: &[PathBuf],
    options: &LoaderOptions,
) -> Result<Vec<Document>, IngestError> {
    let reader = FileReader::new(options.clone());
    let mut documents = Vec::new();

    for path in paths {
        let loaded = reader.read_path(path).await?;
        tracing::info!(path = %path.display(), documents = loaded.len(), "ingested");
        documents.extend(loaded);
    }

    Ok(documents)
}

/// Wrap raw strings (e.g. request bodies) as documents.
pub fn documents_from_texts(source: &str, texts: &[String]) -> Vec<Document> {
    texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .enumerate()
        .map(|(i, t)| Document::new(source, i, t.trim().to_string()))
        .collect()
}
