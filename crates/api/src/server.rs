use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use index::{Embedder, GraphStore};
use ingest::IngestError;
use pipeline::{Pipeline, RunReport, Services, Settings};
use query::{Answer, QueryError, RetrievalMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    services: Services,
    metrics: Arc<Metrics>,
    /// One build at a time.
    build_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(settings: Settings, services: Services) -> Self {
        Self {
            settings: Arc::new(settings),
            services,
            metrics: Metrics::new(),
            build_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        tracing::warn!(status = status.as_u16(), error = %message, "request failed");

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::EmptyQuestion
            | QueryError::VectorIndexDisabled
            | QueryError::NoCommunityReports
            | QueryError::EmptyCypher
            | QueryError::RejectedCypher { .. }
            | QueryError::CypherFailed { .. } => ApiError::BadRequest(err.to_string()),
            QueryError::Llm(_) | QueryError::Embedding(_) | QueryError::Index(_) => {
                ApiError::Upstream(err.to_string())
            }
            QueryError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::NotFound(_) => ApiError::NotFound(err.to_string()),
            IngestError::Unsupported(_)
            | IngestError::Csv(_)
            | IngestError::Json { .. }
            | IngestError::Workbook { .. }
            | IngestError::MissingSheet { .. } => ApiError::BadRequest(err.to_string()),
            IngestError::Io { .. } | IngestError::Walk(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    graph_backend: &'static str,
    graph: String,
    vector_index: bool,
}

/// Files to load, inline texts, or both.
#[derive(Deserialize)]
struct BuildRequest {
    #[serde(default)]
    paths: Vec<PathBuf>,
    #[serde(default)]
    texts: Vec<String>,
}

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    mode: RetrievalMode,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/build", post(build))
        .route("/query", post(answer_query))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let graph = match state.services.graph.stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };

    Json(HealthResponse {
        status: "ok",
        graph_backend: state.services.graph.backend(),
        graph,
        vector_index: state.services.entity_index.is_some(),
    })
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<index::GraphStats>, ApiError> {
    let result = state.services.graph.stats().await;
    state.metrics.record_request(result.is_ok());
    let stats = result.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(stats))
}

async fn build(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> Result<Json<RunReport>, ApiError> {
    let result = run_build(&state, &req).await;
    state.metrics.record_request(result.is_ok());
    result.map(Json)
}

async fn run_build(state: &AppState, req: &BuildRequest) -> Result<RunReport, ApiError> {
    if req.paths.is_empty() && req.texts.is_empty() {
        return Err(ApiError::BadRequest("provide paths or texts to build from".to_string()));
    }
    let _guard = state.build_lock.lock().await;
    let timer = TimedOperation::start();

    let mut documents = ingest::load_paths(&req.paths, &state.settings.ingest).await?;
    documents.extend(ingest::documents_from_texts("request", &req.texts));
    let pipeline = Pipeline::new(state.services.clone(), state.settings.pipeline.clone());
    let report = pipeline
        .run(&documents)
        .await
        .map_err(|e| ApiError::Upstream(format!("{e:#}")))?;

    state
        .metrics
        .record_build(timer.elapsed(), report.extracted, report.skipped.len());
    Ok(report)
}

async fn answer_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<Answer>, ApiError> {
    let timer = TimedOperation::start();
    let retriever = state.services.retriever(state.settings.retrieval);
    let result = retriever.answer(&req.question, req.mode).await;

    state.metrics.record_query(timer.elapsed());
    state.metrics.record_request(result.is_ok());
    Ok(Json(result?))
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    let mut snapshot = state.metrics.snapshot();
    snapshot.embedding_cache = state.services.embedder.cache_stats();
    Json(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use extract::GraphSchema;
    use extract::mock::ScriptedModel;
    use index::{CachedEmbedder, GraphBackend, HashEmbedder, MemoryGraph};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const EXTRACTION: &str = r#"{"relationships": [{"source": "Alice", "target": "TechCorp", "type": "WORKS_AT", "description": "Alice works at TechCorp"}]}"#;

    fn state() -> AppState {
        let model = ScriptedModel::new(|req| {
            Ok(if req.user.starts_with("Entities\n") {
                r#"{"title": "TechCorp staff", "summary": "Alice and her employer.", "rating": 4, "rating_explanation": "Small."}"#.to_string()
            } else if req.json {
                EXTRACTION.to_string()
            } else {
                "Alice works at TechCorp.".to_string()
            })
        });
        let services = Services {
            graph: Arc::new(MemoryGraph::new()),
            llm: Arc::new(model),
            embedder: Arc::new(CachedEmbedder::new(Arc::new(HashEmbedder::new(64)), 100)),
            entity_index: None,
            schema: Arc::new(GraphSchema::default()),
        };
        let mut settings = Settings::default();
        settings.graph.backend = GraphBackend::Memory;
        AppState::new(settings, services)
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_backend() {
        let (status, body) = call(
            router(state()),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["graph_backend"], "memory");
        assert_eq!(body["graph"], "ok");
        assert_eq!(body["vector_index"], false);
    }

    #[tokio::test]
    async fn build_then_global_query() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "Alice works at TechCorp.").unwrap();
        let state = state();

        let (status, report) = call(
            router(state.clone()),
            post_json("/build", json!({"paths": [dir.path()]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{report}");
        assert_eq!(report["graph"]["entities"], 2);
        assert_eq!(report["communities_reported"], 1);

        let (status, answer) = call(
            router(state.clone()),
            post_json("/query", json!({"question": "Who works at TechCorp?", "mode": "global"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{answer}");
        assert_eq!(answer["answer"], "Alice works at TechCorp.");
        assert_eq!(answer["trace"]["communities"][0]["title"], "TechCorp staff");

        let (_, metrics) = call(
            router(state),
            Request::get("/metrics").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(metrics["builds"], 1);
        assert_eq!(metrics["queries"], 1);
        assert_eq!(metrics["successful_requests"], 2);
        // question plus one report, both first seen
        assert_eq!(metrics["embedding_cache"]["misses"], 2);
        assert_eq!(metrics["embedding_cache"]["hits"], 0);
    }

    #[tokio::test]
    async fn query_errors_map_to_client_errors() {
        let (status, body) = call(
            router(state()),
            post_json("/query", json!({"question": "Who?", "mode": "vector"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("vector index"));
    }

    #[tokio::test]
    async fn inline_texts_are_built() {
        let state = state();
        let (status, report) = call(
            router(state.clone()),
            post_json("/build", json!({"texts": ["Alice works at TechCorp.", "  "]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{report}");
        assert_eq!(report["documents"], 1);

        let (status, _) = call(router(state), post_json("/build", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_build_path_is_not_found() {
        let (status, _) = call(
            router(state()),
            post_json("/build", json!({"paths": ["/definitely/not/here"]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
