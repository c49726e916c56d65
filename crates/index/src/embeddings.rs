use async_trait::async_trait;
use extract::Provider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheStats;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to send embedding request to {provider}: {message}")]
    Request {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} embedding request failed: {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to parse {provider} embedding response: {message}")]
    Response {
        provider: &'static str,
        message: String,
    },
    #[error("{0} embeddings require an API key")]
    MissingApiKey(&'static str),
    #[error("embedding service returned an empty vector")]
    Empty,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Output size, probed with a throwaway request.
    async fn dimension(&self) -> Result<usize, EmbeddingError> {
        let probe = self.embed("test").await?;
        if probe.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        Ok(probe.len())
    }

    /// Hit and miss counts when this embedder caches its results.
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Vector size; probed from the model when unset.
    pub dimension: Option<usize>,
    pub timeout_secs: u64,
    /// Cached vectors kept in memory.
    pub cache_entries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "nomic-embed-text".to_string(),
            base_url: None,
            api_key: None,
            dimension: None,
            timeout_secs: 60,
            cache_entries: 10_000,
        }
    }
}

pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| EmbeddingError::Request {
            provider: "embedding",
            message: format!("failed to build HTTP client: {e}"),
        })?;

    let inner: Arc<dyn Embedder> = match config.provider {
        Provider::Ollama => Arc::new(OllamaEmbedder::with_client(
            client,
            config
                .base_url
                .clone()
                .unwrap_or_else(|| extract::llm::OLLAMA_URL.to_string()),
            config.model.clone(),
        )),
        Provider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .ok_or(EmbeddingError::MissingApiKey("openai"))?;
            Arc::new(OpenAiEmbedder::with_client(
                client,
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| extract::llm::OPENAI_URL.to_string()),
                config.model.clone(),
                api_key,
            ))
        }
    };

    Ok(Arc::new(crate::cache::CachedEmbedder::new(
        inner,
        config.cache_entries,
    )))
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, EmbeddingError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::Status {
            provider,
            status: status.as_u16(),
            body,
        });
    }
    response.json().await.map_err(|e| EmbeddingError::Response {
        provider,
        message: e.to_string(),
    })
}

#[derive(Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, model)
    }

    pub fn with_client(client: reqwest::Client, base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    /// Generate embedding for text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Request {
                provider: "ollama",
                message: e.to_string(),
            })?;

        let parsed: OllamaEmbeddingResponse = read_json("ollama", response).await?;
        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        Ok(parsed.embedding)
    }
}

#[derive(Clone)]
pub struct OpenAiEmbedder {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, model, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        model: String,
        api_key: String,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            client,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&OpenAiEmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Request {
                provider: "openai",
                message: e.to_string(),
            })?;

        let parsed: OpenAiEmbeddingResponse = read_json("openai", response).await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(EmbeddingError::Empty)
    }
}

/// Deterministic bag-of-words embedder for tests: each lowercased word is
/// hashed into one of `dimension` buckets and the result is L2-normalized.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

#[cfg(any(test, feature = "test-util"))]
impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Embedder for HashEmbedder {
    fn model(&self) -> &str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector(text))
    }
}
