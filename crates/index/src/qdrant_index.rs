use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::vector_store::{ScoredPoint, VectorError, VectorPoint, VectorStore};

/// Qdrant collection accessed through its REST API.
pub struct QdrantStore {
    base_url: String,
    collection_name: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<VectorPoint>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct CollectionInfo {
    result: CollectionResult,
}

#[derive(Deserialize)]
struct CollectionResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    /// UUID string or unsigned integer
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl QdrantStore {
    pub fn new(base_url: String, collection_name: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collection_name,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(
        &self,
        context: &'static str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, VectorError> {
        let response = builder
            .send()
            .await
            .map_err(|e| VectorError::Request(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorError::Status {
                context,
                status,
                body,
            });
        }
        Ok(response)
    }

    pub async fn collection_exists(&self) -> Result<bool, VectorError> {
        let response = self
            .send(
                "list collections",
                self.request(reqwest::Method::GET, "/collections"),
            )
            .await?;
        let info: CollectionInfo = response
            .json()
            .await
            .map_err(|e| VectorError::Response(e.to_string()))?;
        Ok(info
            .result
            .collections
            .iter()
            .any(|c| c.name == self.collection_name))
    }

    async fn create_collection(&self, dimension: usize) -> Result<(), VectorError> {
        let path = format!("/collections/{}", self.collection_name);
        self.send(
            "create collection",
            self.request(reqwest::Method::PUT, &path)
                .json(&CreateCollection {
                    vectors: VectorParams {
                        size: dimension,
                        distance: "Cosine",
                    },
                }),
        )
        .await?;

        tracing::info!(collection = %self.collection_name, dimension, "created qdrant collection");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn collection(&self) -> &str {
        &self.collection_name
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<bool, VectorError> {
        if self.collection_exists().await? {
            tracing::debug!(collection = %self.collection_name, "collection already exists");
            return Ok(false);
        }

        self.create_collection(dimension).await?;
        Ok(true)
    }

    async fn recreate(&self, dimension: usize) -> Result<(), VectorError> {
        if self.collection_exists().await? {
            let path = format!("/collections/{}", self.collection_name);
            self.send(
                "delete collection",
                self.request(reqwest::Method::DELETE, &path),
            )
            .await?;
            tracing::info!(collection = %self.collection_name, "deleted qdrant collection");
        }
        self.create_collection(dimension).await
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), VectorError> {
        if points.is_empty() {
            return Ok(());
        }
        let path = format!("/collections/{}/points?wait=true", self.collection_name);
        self.send(
            "upsert points",
            self.request(reqwest::Method::PUT, &path)
                .json(&UpsertPoints { points }),
        )
        .await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, VectorError> {
        let path = format!("/collections/{}/points/search", self.collection_name);
        let response = self
            .send(
                "search points",
                self.request(reqwest::Method::POST, &path)
                    .json(&SearchRequest {
                        vector,
                        limit,
                        with_payload: true,
                    }),
            )
            .await?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Response(e.to_string()))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: match hit.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
                score: hit.score,
                payload: hit.payload.unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn creates_missing_collection_with_cosine_distance() {
        let server = MockServer::start_async().await;
        let list = server.mock(|when, then| {
            when.method(GET).path("/collections");
            then.status(200).json_body(json!({
                "result": { "collections": [{ "name": "other" }] },
                "status": "ok"
            }));
        });
        let create = server.mock(|when, then| {
            when.method(PUT)
                .path("/collections/entities")
                .header("api-key", "secret")
                .json_body(json!({ "vectors": { "size": 768, "distance": "Cosine" } }));
            then.status(200).json_body(json!({ "result": true, "status": "ok" }));
        });

        let store = QdrantStore::new(
            server.base_url(),
            "entities".to_string(),
            Some("secret".to_string()),
        );
        assert!(store.ensure_collection(768).await.unwrap());
        list.assert_calls(1);
        create.assert_calls(1);
    }

    #[tokio::test]
    async fn existing_collection_is_left_alone() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/collections");
            then.status(200).json_body(json!({
                "result": { "collections": [{ "name": "entities" }] }
            }));
        });

        let store = QdrantStore::new(server.base_url(), "entities".to_string(), None);
        assert!(!store.ensure_collection(768).await.unwrap());
    }

    #[tokio::test]
    async fn recreate_deletes_then_creates() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/collections");
            then.status(200).json_body(json!({
                "result": { "collections": [{ "name": "entities" }] }
            }));
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE).path("/collections/entities");
            then.status(200).json_body(json!({ "result": true, "status": "ok" }));
        });
        let create = server.mock(|when, then| {
            when.method(PUT)
                .path("/collections/entities")
                .json_body(json!({ "vectors": { "size": 64, "distance": "Cosine" } }));
            then.status(200).json_body(json!({ "result": true, "status": "ok" }));
        });

        let store = QdrantStore::new(server.base_url(), "entities".to_string(), None);
        store.recreate(64).await.unwrap();
        delete.assert_calls(1);
        create.assert_calls(1);
    }

    #[tokio::test]
    async fn recreate_skips_delete_for_missing_collection() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/collections");
            then.status(200).json_body(json!({ "result": { "collections": [] } }));
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE).path("/collections/entities");
            then.status(200).json_body(json!({ "result": true }));
        });
        let create = server.mock(|when, then| {
            when.method(PUT).path("/collections/entities");
            then.status(200).json_body(json!({ "result": true }));
        });

        let store = QdrantStore::new(server.base_url(), "entities".to_string(), None);
        store.recreate(64).await.unwrap();
        delete.assert_calls(0);
        create.assert_calls(1);
    }

    #[tokio::test]
    async fn upsert_waits_and_search_parses_hits() {
        let server = MockServer::start_async().await;
        let upsert = server.mock(|when, then| {
            when.method(PUT)
                .path("/collections/entities/points")
                .query_param("wait", "true")
                .is_true(|req| {
                    String::from_utf8_lossy(req.body().as_ref()).contains("\"name\":\"Alice\"")
                });
            then.status(200).json_body(json!({ "result": { "status": "completed" } }));
        });
        let search = server.mock(|when, then| {
            when.method(POST)
                .path("/collections/entities/points/search")
                .is_true(|req| {
                    let body: serde_json::Value =
                        serde_json::from_slice(req.body().as_ref()).unwrap_or_default();
                    body["limit"] == 3 && body["with_payload"] == true
                });
            then.status(200).json_body(json!({
                "result": [
                    { "id": "5b7c...", "version": 1, "score": 0.92, "payload": { "name": "Alice" } },
                    { "id": 42, "score": 0.5 }
                ]
            }));
        });

        let store = QdrantStore::new(server.base_url(), "entities".to_string(), None);
        store
            .upsert(vec![VectorPoint {
                id: "5b7c...".to_string(),
                vector: vec![0.1, 0.2],
                payload: json!({ "name": "Alice" }),
            }])
            .await
            .unwrap();
        let hits = store.search(&[0.1, 0.2], 3).await.unwrap();

        upsert.assert_calls(1);
        search.assert_calls(1);
        assert_eq!(hits[0].payload["name"], "Alice");
        assert_eq!(hits[1].id, "42");
        assert!(hits[1].payload.is_null());
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/collections");
            then.status(503).body("unavailable");
        });

        let store = QdrantStore::new(server.base_url(), "entities".to_string(), None);
        let err = store.ensure_collection(8).await.unwrap_err();
        assert!(matches!(err, VectorError::Status { status: 503, .. }));
        assert!(err.to_string().contains("unavailable"));
    }
}
