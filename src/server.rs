//! HTTP façade.
//!
//! A small JSON API over the same search core the CLI and tool surface
//! use, suitable for dashboards and quick curl checks.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/v1/search` | Hybrid search over blocks |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::OllamaEmbedder;
use crate::models::SearchOptions;
use crate::search::search_blocks;
use crate::store::Store;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<Store>,
    embedder: Arc<OllamaEmbedder>,
}

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = crate::db::connect(config).await?;
    let state = AppState {
        config: Arc::new(config.clone()),
        store: Arc::new(Store::new(pool)),
        embedder: Arc::new(OllamaEmbedder::new(&config.embedding)?),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/search", post(handle_search))
        .layer(cors)
        .with_state(state);

    println!("HTTP server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
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

// ============ POST /api/v1/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    include_n_plus: bool,
}

#[derive(Serialize)]
struct SearchResponseItem {
    block_id: String,
    topic: String,
    relevance: f64,
    created: String,
    exchange_count: i64,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResponseItem>,
    total_found: usize,
    search_time_ms: f64,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let opts = SearchOptions {
        project_id: None,
        limit: req.limit.or(Some(state.config.retrieval.limit)),
        min_relevance: None,
        include_n_plus: req.include_n_plus,
    };

    let results = search_blocks(
        &state.store,
        &state.embedder,
        &req.query,
        &opts,
        state.config.retrieval.related_limit,
    )
    .await
    .map_err(|e| internal_error(e.to_string()))?;

    let items = results
        .results
        .iter()
        .map(|r| SearchResponseItem {
            block_id: r.block.id.to_string(),
            topic: r.block.topic.clone(),
            relevance: r.relevance,
            created: r.block.created_at.to_rfc3339(),
            exchange_count: r.block.exchange_count,
        })
        .collect();

    Ok(Json(SearchResponse {
        results: items,
        total_found: results.total_found,
        search_time_ms: results.search_time.as_secs_f64() * 1000.0,
    }))
}
