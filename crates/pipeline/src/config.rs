use anyhow::{Context, Result, bail};
use communities::ClusteringAlgorithm;
use extract::{LlmConfig, OnError};
use index::{EmbeddingConfig, GraphConfig, VectorConfig};
use ingest::LoaderOptions;
use query::RetrievalConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "graphrag.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent summarization and report calls.
    pub workers: usize,
    pub on_error: OnError,
    pub clustering: ClusteringAlgorithm,
    /// Delete the whole graph before building.
    pub clear_graph: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            on_error: OnError::Ignore,
            clustering: ClusteringAlgorithm::Local,
            clear_graph: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

/// Everything a run needs, built once and passed by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub graph: GraphConfig,
    pub vector: VectorConfig,
    pub pipeline: PipelineConfig,
    pub retrieval: RetrievalConfig,
    /// JSON or TOML graph schema; the built-in schema when unset.
    pub schema_path: Option<PathBuf>,
    pub ingest: LoaderOptions,
    pub server: ServerConfig,
    pub log: LogConfig,
}

impl Settings {
    /// Read `path` (or `graphrag.toml` when present), then apply environment
    /// overrides, including those from a `.env` file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Environment variables win over the file.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_PROVIDER") {
            self.llm.provider = v.parse().map_err(anyhow::Error::msg).context("LLM_PROVIDER")?;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }

        if let Some(v) = get("EMBEDDING_PROVIDER") {
            self.embedding.provider = v
                .parse()
                .map_err(anyhow::Error::msg)
                .context("EMBEDDING_PROVIDER")?;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        if let Some(v) = get("EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }

        if let Some(v) = get("NEO4J_URI") {
            self.graph.uri = v;
        }
        if let Some(v) = get("NEO4J_USERNAME") {
            self.graph.user = v;
        }
        if let Some(v) = get("NEO4J_PASSWORD") {
            self.graph.password = v;
        }

        if let Some(v) = get("QDRANT_URL") {
            self.vector.url = v;
            self.vector.enabled = true;
        }
        if let Some(v) = get("QDRANT_API_KEY") {
            self.vector.api_key = Some(v);
        }

        if let Some(v) = get("GRAPHRAG_WORKERS") {
            self.pipeline.workers = v
                .trim()
                .parse()
                .with_context(|| format!("GRAPHRAG_WORKERS must be a number, got {v:?}"))?;
        }
        if let Some(v) = get("GRAPHRAG_ON_ERROR") {
            self.pipeline.on_error = v
                .parse()
                .map_err(anyhow::Error::msg)
                .context("GRAPHRAG_ON_ERROR")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }
        if !(1..=2).contains(&self.retrieval.hops) {
            bail!("retrieval.hops must be 1 or 2, got {}", self.retrieval.hops);
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::Provider;
    use index::GraphBackend;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.pipeline.workers, 4);
        assert_eq!(settings.pipeline.clustering, ClusteringAlgorithm::Local);
        assert_eq!(settings.retrieval.hops, 2);
        assert!(!settings.vector.enabled);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            schema_path = "schemas/crop_disease.json"

            [llm]
            provider = "openai"
            model = "gpt-4o-mini"

            [graph]
            backend = "memory"

            [pipeline]
            on_error = "raise"
            clustering = "gds"

            [ingest]
            ignored_columns = ["No", "Reference"]
            sheet = "Diseases"

            [log]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(settings.llm.provider, Provider::OpenAi);
        assert_eq!(settings.llm.timeout_secs, 120);
        assert_eq!(settings.graph.backend, GraphBackend::Memory);
        assert_eq!(settings.graph.uri, "bolt://localhost:7687");
        assert_eq!(settings.pipeline.on_error, OnError::Raise);
        assert_eq!(settings.pipeline.clustering, ClusteringAlgorithm::Gds);
        assert_eq!(settings.pipeline.workers, 4);
        assert_eq!(settings.ingest.ignored_columns, vec!["No", "Reference"]);
        assert_eq!(settings.ingest.sheet.as_deref(), Some("Diseases"));
        assert_eq!(settings.log.format, LogFormat::Json);
        assert_eq!(
            settings.schema_path.as_deref(),
            Some(Path::new("schemas/crop_disease.json"))
        );
    }

    #[test]
    fn environment_overrides_file() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(env(&[
                ("LLM_MODEL", "mistral"),
                ("EMBEDDING_PROVIDER", "openai"),
                ("NEO4J_URI", "bolt://graph:7687"),
                ("QDRANT_URL", "http://qdrant:6333"),
                ("GRAPHRAG_WORKERS", " 8 "),
                ("GRAPHRAG_ON_ERROR", "raise"),
                ("LLM_API_KEY", ""),
            ]))
            .unwrap();

        assert_eq!(settings.llm.model, "mistral");
        assert_eq!(settings.llm.api_key, None);
        assert_eq!(settings.embedding.provider, Provider::OpenAi);
        assert_eq!(settings.graph.uri, "bolt://graph:7687");
        assert!(settings.vector.enabled);
        assert_eq!(settings.vector.url, "http://qdrant:6333");
        assert_eq!(settings.pipeline.workers, 8);
        assert_eq!(settings.pipeline.on_error, OnError::Raise);
    }

    #[test]
    fn bad_override_is_an_error() {
        let err = Settings::default()
            .apply_overrides(env(&[("GRAPHRAG_WORKERS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("GRAPHRAG_WORKERS"));

        let err = Settings::default()
            .apply_overrides(env(&[("GRAPHRAG_ON_ERROR", "retry")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("retry"));
    }

    #[test]
    fn validation_bounds() {
        let mut settings = Settings::default();
        settings.retrieval.hops = 3;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.pipeline.workers = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retrieval.top_k = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn file_errors_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphrag.toml");
        std::fs::write(&path, "[pipeline]\nworkers = \"four\"\n").unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("graphrag.toml"));
    }
}
