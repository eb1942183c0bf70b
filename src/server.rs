//! JSON HTTP API over the retrieval engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search/{kind}` | Hybrid search for one entity kind |
//! | `GET`  | `/graph/paths` | Join paths between two tables |
//! | `POST` | `/context/resolve` | Scatter-gather context resolution |
//! | `POST` | `/embeddings/ensure` | Write-path embedding refresh |
//!
//! # Error Contract
//!
//! All error responses share one envelope:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "limit must be >= 1" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `upstream_unavailable`
//! (503), `internal` (500). Partial resolver results are a 200 with
//! `"partial": true`; they are a flagged success, not an error.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! admin UIs and cross-origin agent callers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::error::AtlasError;
use crate::graph::{find_paths, PathRequest};
use crate::models::EntityKind;
use crate::resolve::{ContextItem, ContextResolver};
use crate::search::SearchEngine;
use crate::store::sqlite::SqliteStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<SearchEngine<SqliteStore>>,
    resolver: Arc<ContextResolver<SqliteStore>>,
    cache: Arc<EmbeddingCache>,
    store: Arc<SqliteStore>,
    config: Arc<Config>,
}

/// Starts the HTTP server. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let pool = db::connect(&config).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let embedder = embedding::create_embedder(&config.embedding)?;
    let engine = Arc::new(SearchEngine::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        config.retrieval.clone(),
    ));
    let resolver = Arc::new(ContextResolver::new(
        Arc::clone(&engine),
        config.resolver.clone(),
    ));
    let cache = Arc::new(EmbeddingCache::new(embedder));

    let state = AppState {
        engine,
        resolver,
        cache,
        store,
        config,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/search/{kind}", post(handle_search))
        .route("/graph/paths", get(handle_paths))
        .route("/context/resolve", post(handle_resolve))
        .route("/embeddings/ensure", post(handle_ensure))
        .layer(cors)
        .with_state(state);

    println!("atlas server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error mapping ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct ApiError(AtlasError);

impl From<AtlasError> for ApiError {
    fn from(err: AtlasError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            AtlasError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            AtlasError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AtlasError::Upstream { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable")
            }
            AtlasError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(AtlasError::invalid(message))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search/{kind} ============

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    query: String,
    #[serde(default)]
    datasource: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    min_ratio_to_best: Option<f64>,
}

async fn handle_search(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<SearchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = EntityKind::parse(&kind)
        .ok_or_else(|| bad_request(format!("unknown entity kind: {}", kind)))?;

    let page = body.page.unwrap_or(1);
    let limit = body.limit.unwrap_or(state.config.retrieval.default_limit);
    let q = body.query.as_str();
    let ds = body.datasource.as_deref();
    let table = body.table.as_deref();
    let column = body.column.as_deref();
    let ratio = body.min_ratio_to_best;
    let engine = &state.engine;

    let value = match kind {
        EntityKind::Datasource => to_value(engine.search_datasources(q, page, limit, ratio).await?),
        EntityKind::Table => to_value(engine.search_tables(q, ds, page, limit, ratio).await?),
        EntityKind::Column => {
            to_value(engine.search_columns(q, ds, table, page, limit, ratio).await?)
        }
        EntityKind::Edge => to_value(engine.search_edges(q, ds, table, page, limit, ratio).await?),
        EntityKind::Metric => to_value(engine.search_metrics(q, ds, page, limit, ratio).await?),
        EntityKind::Synonym => to_value(engine.search_synonyms(q, page, limit, ratio).await?),
        EntityKind::ContextRule => {
            to_value(engine.search_rules(q, ds, table, page, limit, ratio).await?)
        }
        EntityKind::CategoricalValue => to_value(
            engine
                .search_values(q, ds, table, column, page, limit, ratio)
                .await?,
        ),
        EntityKind::ExampleQuery => {
            to_value(engine.search_examples(q, ds, page, limit, ratio).await?)
        }
    };

    Ok(Json(value))
}

fn to_value<T: Serialize>(page: crate::search::Page<T>) -> serde_json::Value {
    serde_json::to_value(page).unwrap_or_else(|_| serde_json::json!({}))
}

// ============ GET /graph/paths ============

#[derive(Deserialize)]
struct PathsQuery {
    source: String,
    target: String,
    #[serde(default)]
    datasource: Option<String>,
    #[serde(default)]
    max_depth: Option<usize>,
}

async fn handle_paths(
    State(state): State<AppState>,
    Query(params): Query<PathsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = PathRequest {
        source: params.source,
        target: params.target,
        datasource_slug: params.datasource,
        max_depth: params
            .max_depth
            .unwrap_or(state.config.graph.default_max_depth),
    };
    let result = find_paths(
        state.store.as_ref(),
        &request,
        state.config.graph.max_expansions,
    )
    .await?;
    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

// ============ POST /context/resolve ============

#[derive(Deserialize)]
struct ResolveBody {
    #[serde(default)]
    items: Vec<ContextItem>,
}

async fn handle_resolve(
    State(state): State<AppState>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let graph = state.resolver.resolve(body.items).await?;
    Ok(Json(serde_json::to_value(graph).unwrap_or_default()))
}

// ============ POST /embeddings/ensure ============

#[derive(Deserialize)]
struct EnsureBody {
    kind: EntityKind,
    id: String,
}

#[derive(Serialize)]
struct EnsureResponse {
    updated: bool,
    dims: usize,
}

async fn handle_ensure(
    State(state): State<AppState>,
    Json(body): Json<EnsureBody>,
) -> Result<Json<EnsureResponse>, ApiError> {
    let ensured = state
        .cache
        .ensure(state.store.as_ref(), body.kind, &body.id)
        .await?;
    Ok(Json(EnsureResponse {
        updated: ensured.updated,
        dims: ensured.vector.len(),
    }))
}
