use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("failed to reach vector store: {0}")]
    Request(String),
    #[error("vector store request failed ({context}): {status}: {body}")]
    Status {
        context: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to parse vector store response: {0}")]
    Response(String),
    #[error("vector has dimension {actual}, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("collection {0} has not been created")]
    MissingCollection(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    /// UUID string.
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A named collection of vectors with cosine nearest-neighbor search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    /// Create the collection when missing. Returns true if it was created.
    async fn ensure_collection(&self, dimension: usize) -> Result<bool, VectorError>;

    /// Drop every point and (re)create the collection with `dimension`.
    async fn recreate(&self, dimension: usize) -> Result<(), VectorError>;

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), VectorError>;

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, VectorError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Debug, Default)]
struct Collection {
    dimension: Option<usize>,
    points: BTreeMap<String, VectorPoint>,
}

/// Brute-force store for dry runs and tests.
#[derive(Debug)]
pub struct MemoryVectorStore {
    name: String,
    inner: RwLock<Collection>,
}

impl MemoryVectorStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Collection::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.points.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<bool, VectorError> {
        let mut inner = self.inner.write().await;
        if inner.dimension.is_some() {
            return Ok(false);
        }
        inner.dimension = Some(dimension);
        Ok(true)
    }

    async fn recreate(&self, dimension: usize) -> Result<(), VectorError> {
        let mut inner = self.inner.write().await;
        inner.points.clear();
        inner.dimension = Some(dimension);
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), VectorError> {
        let mut inner = self.inner.write().await;
        let expected = inner
            .dimension
            .ok_or_else(|| VectorError::MissingCollection(self.name.clone()))?;
        for point in points {
            if point.vector.len() != expected {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    actual: point.vector.len(),
                });
            }
            inner.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, VectorError> {
        let inner = self.inner.read().await;
        let mut scored: Vec<ScoredPoint> = inner
            .points
            .values()
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(limit);
        Ok(scored)
    }
}
