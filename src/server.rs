//! HTTP gateway.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v2/events` | Submit a signed batch of captured packets |
//! | `GET`  | `/api/v1/mirror` | Drain the mirror ring (operator key in `x-operator-key`) |
//! | `GET`  | `/api/v1/personal/{public_key}` | An account's most recent metadata |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! The ingestion route always answers `200` with a `status` field; the
//! capturing client branches on it. Every other route reports failures as:
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "invalid operator key" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `internal` (500).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::gateway::{Gateway, IngestResponse, MirroredRequest};
use crate::models::{Account, Metadata};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Shortest public key the personal API accepts.
const MIN_PUBLIC_KEY_LEN: usize = 26;
const DEFAULT_PERSONAL_AMOUNT: usize = 40;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<Gateway>,
    store: Arc<dyn Store>,
    admin_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, store: Arc<dyn Store>, admin_key: Option<String>) -> Self {
        Self {
            gateway,
            store,
            admin_key: admin_key.map(Arc::from),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v2/events", post(handle_events))
        .route("/api/v1/mirror", get(handle_mirror))
        .route("/api/v1/personal/{public_key}", get(handle_personal))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the gateway on `[server].bind` and serves until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    let gateway = Arc::new(Gateway::new(store.clone(), config.ingest.mirror_capacity));

    if config.server.admin_key.is_none() {
        warn!("server.admin_key is not set, the mirror endpoint is disabled");
    }

    let state = AppState::new(gateway, store, config.server.admin_key.clone());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "gateway listening");
    println!("Evidence gateway listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

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

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: err.to_string(),
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

// ============ POST /api/v2/events ============

/// Header names are normalised to lower case; values that are not valid
/// UTF-8 are dropped and then reported as missing.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

async fn handle_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<IngestResponse> {
    let headers = header_map(&headers);
    Json(state.gateway.ingest_batch(&headers, &body).await)
}

// ============ GET /api/v1/mirror ============

/// Header carrying the operator key for the mirror route.
pub const HEADER_OPERATOR_KEY: &str = "x-operator-key";

#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorResponse {
    pub content: Vec<MirroredRequest>,
    pub elements: usize,
}

/// Byte comparison whose running time depends only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn handle_mirror(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MirrorResponse>, AppError> {
    let presented = headers
        .get(HEADER_OPERATOR_KEY)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state.admin_key {
        Some(ref expected) if constant_time_eq(expected.as_bytes(), presented.as_bytes()) => {}
        Some(_) => return Err(unauthorized("invalid operator key")),
        None => return Err(unauthorized("mirror is disabled on this instance")),
    }

    let content = state.gateway.drain_mirror();
    info!(elements = content.len(), "mirror drained");
    Ok(Json(MirrorResponse {
        elements: content.len(),
        content,
    }))
}

// ============ GET /api/v1/personal/{public_key} ============

#[derive(Debug, Deserialize)]
pub struct PersonalQuery {
    amount: Option<usize>,
    skip: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersonalResponse {
    pub account: Account,
    pub metadata: Vec<Metadata>,
}

async fn handle_personal(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
    Query(query): Query<PersonalQuery>,
) -> Result<Json<PersonalResponse>, AppError> {
    if public_key.len() < MIN_PUBLIC_KEY_LEN {
        return Err(bad_request("public key is too short"));
    }

    let account = state
        .store
        .find_account(&public_key)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("no account for this public key"))?;

    let metadata = state
        .store
        .metadata_by_owner(
            &public_key,
            query.amount.unwrap_or(DEFAULT_PERSONAL_AMOUNT),
            query.skip.unwrap_or(0),
        )
        .await
        .map_err(internal)?;

    Ok(Json(PersonalResponse { account, metadata }))
}
