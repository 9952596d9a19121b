//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/v1/embed-upsert` | Ingest one document |
//! | `POST`   | `/v1/query` | Semantic search within a user's documents |
//! | `POST`   | `/v1/answer` | Answer a question from caller-supplied contexts |
//! | `POST`   | `/v1/ask` | Search, then answer |
//! | `GET`    | `/v1/documents/{user_id}` | List a user's documents |
//! | `DELETE` | `/v1/documents/{user_id}/{item_id}` | Delete a document |
//!
//! When the environment variable named by `[server].api_key_env` is set,
//! every `/v1` route requires `Authorization: Bearer <key>`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `validation_error` | 400 |
//! | `unauthorized` | 401 |
//! | `not_found` | 404 |
//! | `limit_exceeded` | 409 |
//! | `configuration_error` | 500 |
//! | `provider_error` | 502 |
//! | `provider_timeout` | 504 |
//!
//! Provider failures are logged in full; clients only see the code.

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ragvault_core::error::VaultError;
use ragvault_core::ingest::{validate_id, IngestOutcome, IngestRequest};
use ragvault_core::models::{ChunkMetadata, DocumentSummary, QueryMatch};

use crate::app::Services;
use crate::config::Config;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
    api_key: Option<Arc<str>>,
}

/// Build the router. `api_key = None` disables authentication.
pub fn router(services: Arc<Services>, api_key: Option<String>) -> Router {
    let state = AppState {
        services,
        api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let v1 = Router::new()
        .route("/v1/embed-upsert", post(handle_ingest))
        .route("/v1/query", post(handle_query))
        .route("/v1/answer", post(handle_answer))
        .route("/v1/ask", post(handle_ask))
        .route("/v1/documents/{user_id}", get(handle_list_documents))
        .route("/v1/documents/{user_id}/{item_id}", delete(handle_delete_document))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(handle_health))
        .merge(v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build services from config and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Arc::new(Services::from_config(config).await?);
    let api_key = std::env::var(&config.server.api_key_env).ok();
    if api_key.is_none() {
        tracing::warn!(
            env = %config.server.api_key_env,
            "no API key configured; /v1 routes are unauthenticated"
        );
    }

    let app = router(services, api_key);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        let code = err.code();
        let status = match &err {
            VaultError::Validation(_) => StatusCode::BAD_REQUEST,
            VaultError::NotFound { .. } => StatusCode::NOT_FOUND,
            VaultError::LimitExceeded { .. } => StatusCode::CONFLICT,
            VaultError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            VaultError::Provider { .. } if code == "provider_timeout" => {
                StatusCode::GATEWAY_TIMEOUT
            }
            VaultError::Provider { .. } => StatusCode::BAD_GATEWAY,
        };
        let message = match &err {
            VaultError::Provider { provider, .. } => {
                tracing::error!(error = %err, "provider call failed");
                format!("upstream {} request failed", provider)
            }
            VaultError::Configuration(_) => {
                tracing::error!(error = %err, "configuration error");
                err.to_string()
            }
            _ => err.to_string(),
        };
        AppError {
            status,
            code,
            message,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "validation_error",
            message: rejection.body_text(),
        }
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: "missing or invalid bearer token".to_string(),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        let presented = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        match presented {
            Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {}
            _ => return unauthorized().into_response(),
        }
    }
    next.run(req).await
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

// ============ POST /v1/embed-upsert ============

async fn handle_ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestOutcome>, AppError> {
    let Json(req) = payload?;
    let outcome = state.services.ingest.ingest(&req).await?;
    Ok(Json(outcome))
}

// ============ POST /v1/query ============

#[derive(Deserialize)]
struct QueryBody {
    user_id: String,
    query: String,
    #[serde(default)]
    top_k: Option<i64>,
}

#[derive(Serialize)]
struct QueryResponse {
    matches: Vec<QueryMatch>,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(body) = payload?;
    let matches = state
        .services
        .retrieval
        .semantic_search(&body.user_id, &body.query, body.top_k)
        .await?;
    Ok(Json(QueryResponse { matches }))
}

// ============ POST /v1/answer ============

/// Caller-supplied context; only `id` is required.
#[derive(Deserialize)]
struct ContextItem {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<ContextMetadata>,
}

#[derive(Deserialize, Default)]
struct ContextMetadata {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    item_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    preview: Option<String>,
}

impl From<ContextItem> for QueryMatch {
    fn from(item: ContextItem) -> Self {
        QueryMatch {
            id: item.id,
            score: item.score,
            metadata: item.metadata.map(|m| ChunkMetadata {
                user_id: m.user_id,
                item_id: m.item_id,
                title: m.title,
                ordinal: 0,
                text: m.text.or(m.preview).unwrap_or_default(),
                created_at: 0,
                content_hash: String::new(),
                source_confidence: None,
            }),
        }
    }
}

#[derive(Deserialize)]
struct AnswerBody {
    query: String,
    #[serde(default)]
    contexts: Vec<ContextItem>,
}

#[derive(Serialize)]
struct AnswerResponse {
    answer: String,
}

async fn handle_answer(
    State(state): State<AppState>,
    payload: Result<Json<AnswerBody>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(body) = payload?;
    if body.query.trim().is_empty() {
        return Err(VaultError::validation("query must not be empty").into());
    }
    let matches: Vec<QueryMatch> = body.contexts.into_iter().map(QueryMatch::from).collect();
    let answer = state.services.composer.answer(&body.query, &matches).await?;
    Ok(Json(AnswerResponse { answer }))
}

// ============ POST /v1/ask ============

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    matches: Vec<QueryMatch>,
}

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(body) = payload?;
    let (answer, matches) = state
        .services
        .ask(&body.user_id, &body.query, body.top_k)
        .await?;
    Ok(Json(AskResponse { answer, matches }))
}

// ============ /v1/documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentSummary>,
    max_documents: usize,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DocumentsResponse>, AppError> {
    validate_id("user_id", &user_id)?;
    let catalog = &state.services.catalog;
    let documents = catalog.list_documents(&user_id).await?;
    Ok(Json(DocumentsResponse {
        documents,
        max_documents: catalog.max_documents(),
    }))
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, AppError> {
    validate_id("user_id", &user_id)?;
    validate_id("item_id", &item_id)?;
    let success = state
        .services
        .catalog
        .delete_document(&user_id, &item_id)
        .await?;
    Ok(Json(DeleteResponse { success }))
}
