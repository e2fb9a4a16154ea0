//! HTTP server for the chat UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Answer a conversation, as JSON or as a streamed text body |
//! | `GET`  | `/api/sources/{id}` | Display sources for one answer |
//! | `GET`  | `/api/health` | Whether the embedding index is loaded |
//! | `POST` | `/api/reindex` | Reload the index snapshot from disk |
//! | `POST` | `/api/feedback` | Append a feedback object to the feedback log |
//! | `GET`  | `/api/section/{heading}` | One heading section of the corpus markdown |
//!
//! When `server.static_dir` is set, every other path is served from that
//! directory.
//!
//! # Streaming
//!
//! A chat request asks for streaming with `X-Stream: 1` or an `Accept`
//! header containing `text/plain`. The response is then a chunked
//! `text/plain` body whose concatenation is the answer. Either way the
//! `X-Sources-Id` header carries the token for `/api/sources/{id}`.
//!
//! Once the body has started, an upstream failure can only end it: the
//! client sees a truncated answer and the error goes to the log.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "messages array required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `config_error` (400), `not_found` (404),
//! `upstream_error` (500), `internal` (500).

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::cache::{spawn_sweeper, SourcesCache};
use crate::chat::{self, ChatModel, DeltaStream};
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::error::ChatError;
use crate::index::IndexHandle;
use crate::models::{ChatMessage, SourceEntry};
use crate::querylog::QueryLog;
use crate::rag::{Pipeline, PreparedChat};
use crate::sections::extract_markdown_section;

/// Response header carrying the sources token.
pub const SOURCES_HEADER: &str = "x-sources-id";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub cache: Arc<SourcesCache>,
    pub query_log: Arc<QueryLog>,
}

impl AppState {
    pub fn new(config: Config, embedder: Arc<dyn Embedder>, chat: Arc<dyn ChatModel>) -> Self {
        let index = Arc::new(IndexHandle::new(&config.index.path));
        let cache = Arc::new(SourcesCache::new(Duration::from_secs(
            config.server.sources_ttl_secs,
        )));
        let query_log = Arc::new(QueryLog::new(
            &config.logs.dir,
            config.chat.ambiguity_marker.clone(),
        ));

        Self {
            pipeline: Pipeline {
                config: Arc::new(config),
                index,
                embedder,
                chat,
            },
            cache,
            query_log,
        }
    }

    pub fn config(&self) -> &Config {
        &self.pipeline.config
    }
}

/// Starts the HTTP server with the configured OpenAI clients.
///
/// Binds to `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    let chat = chat::create_chat_model(&config.chat)?;
    run_server_with_services(config, embedder, chat).await
}

/// Starts the server with caller-supplied embedding and chat services.
pub async fn run_server_with_services(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), embedder, chat);

    if let Err(e) = state.pipeline.index.current() {
        tracing::error!(error = %format!("{e:#}"), "failed to load index at startup");
    }

    let sweeper = spawn_sweeper(
        state.cache.clone(),
        Duration::from_secs(config.server.sweep_interval_secs),
    );

    let app = build_router(state);

    tracing::info!("Server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SOURCES_HEADER)]);

    let static_dir = state.config().server.static_dir.clone();

    let router = Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/sources/{id}", get(handle_sources))
        .route("/api/health", get(handle_health))
        .route("/api/reindex", post(handle_reindex))
        .route("/api/feedback", post(handle_feedback))
        .route("/api/section/{heading}", get(handle_section));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(cors).with_state(state)
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

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Config(message) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "config_error",
                message,
            },
            ChatError::Invalid(message) => bad_request(message),
            ChatError::Upstream(e) => {
                tracing::error!(error = %format!("{e:#}"), "upstream service failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "upstream_error",
                    message: format!("{e:#}"),
                }
            }
        }
    }
}

// ============ POST /api/chat ============

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
}

fn wants_stream(headers: &HeaderMap) -> bool {
    let flag = headers
        .get("x-stream")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "1");
    let accepts_text = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/plain"));
    flag || accepts_text
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let t_start = Instant::now();
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;

    let prepared = state.pipeline.prepare(&request.messages).await?;
    let t_respond = Instant::now();

    if wants_stream(&headers) {
        let deltas = state
            .pipeline
            .chat
            .stream(&prepared.input)
            .await
            .map_err(ChatError::classify)?;

        let mut response_headers = sources_header(&state, &prepared)?;
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response_headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-transform"),
        );

        let relay = Relay {
            deltas,
            answer: String::new(),
            done: false,
            query_log: state.query_log.clone(),
            prepared,
            t_start,
            t_respond,
        };
        let body = Body::from_stream(relay_body(relay));
        return Ok((response_headers, body).into_response());
    }

    let answer = state
        .pipeline
        .chat
        .complete(&prepared.input)
        .await
        .map_err(ChatError::classify)?;

    let response_headers = sources_header(&state, &prepared)?;
    record_answer(&state.query_log, &prepared, &answer, t_start, t_respond);

    Ok((response_headers, Json(ChatAnswer { answer })).into_response())
}

/// Caches the request's sources and returns the header carrying their token.
/// Only called once the model has accepted the request.
fn sources_header(state: &AppState, prepared: &PreparedChat) -> Result<HeaderMap, AppError> {
    let token = state.cache.insert(prepared.sources.clone());
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(SOURCES_HEADER),
        HeaderValue::from_str(&token).map_err(|e| internal(e.to_string()))?,
    );
    Ok(headers)
}

/// State carried across the streamed body.
struct Relay {
    deltas: DeltaStream,
    answer: String,
    done: bool,
    query_log: Arc<QueryLog>,
    prepared: PreparedChat,
    t_start: Instant,
    t_respond: Instant,
}

fn relay_body(relay: Relay) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send {
    futures::stream::unfold(relay, |mut relay| async move {
        if relay.done {
            return None;
        }
        match relay.deltas.next().await {
            Some(Ok(delta)) => {
                relay.answer.push_str(&delta);
                Some((Ok(Bytes::from(delta)), relay))
            }
            Some(Err(e)) => {
                relay.done = true;
                tracing::error!(
                    error = %format!("{e:#}"),
                    sent_chars = relay.answer.chars().count(),
                    "chat stream failed after response started"
                );
                None
            }
            None => {
                relay.done = true;
                record_answer(
                    &relay.query_log,
                    &relay.prepared,
                    &relay.answer,
                    relay.t_start,
                    relay.t_respond,
                );
                None
            }
        }
    })
}

fn record_answer(
    query_log: &QueryLog,
    prepared: &PreparedChat,
    answer: &str,
    t_start: Instant,
    t_respond: Instant,
) {
    match query_log.log_query(&prepared.query, answer) {
        Ok(entry) if entry.ambiguous => tracing::info!("answer flagged ambiguous"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "failed to write query log"),
    }

    tracing::info!(
        total_ms = t_start.elapsed().as_millis() as u64,
        load_ms = prepared.load_ms as u64,
        embed_ms = prepared.embed_ms as u64,
        sim_ms = prepared.sim_ms as u64,
        respond_ms = t_respond.elapsed().as_millis() as u64,
        records = prepared.records,
        sources = prepared.sources.len(),
        "chat timing"
    );
}

// ============ GET /api/sources/{id} ============

#[derive(Debug, Serialize, Deserialize)]
pub struct SourcesResponse {
    pub sources: Vec<SourceEntry>,
}

async fn handle_sources(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourcesResponse>, AppError> {
    state
        .cache
        .get(&id)
        .map(|sources| Json(SourcesResponse { sources }))
        .ok_or_else(|| not_found("Sources not found"))
}

// ============ GET /api/health ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    embeddings_ready: bool,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ready = match state.pipeline.index.current() {
        Ok(index) => index.is_some(),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "index unavailable");
            false
        }
    };
    Json(HealthResponse {
        ok: true,
        embeddings_ready: ready,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /api/reindex ============

#[derive(Serialize)]
struct ReindexResponse {
    ok: bool,
    count: usize,
}

async fn handle_reindex(State(state): State<AppState>) -> Result<Json<ReindexResponse>, AppError> {
    let index = state
        .pipeline
        .index
        .reload()
        .map_err(|e| internal(format!("{e:#}")))?;
    Ok(Json(ReindexResponse {
        ok: true,
        count: index.map_or(0, |i| i.len()),
    }))
}

// ============ POST /api/feedback ============

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

async fn handle_feedback(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<OkResponse>, AppError> {
    let Ok(Json(serde_json::Value::Object(map))) = payload else {
        return Err(bad_request("feedback payload required"));
    };
    state
        .query_log
        .log_feedback(map)
        .map_err(|e| internal(format!("{e:#}")))?;
    Ok(Json(OkResponse { ok: true }))
}

// ============ GET /api/section/{heading} ============

#[derive(Serialize)]
struct SectionResponse {
    section: String,
}

async fn handle_section(
    State(state): State<AppState>,
    Path(heading): Path<String>,
) -> Result<Json<SectionResponse>, AppError> {
    let path = &state.config().corpus.markdown_path;
    let markdown = match tokio::fs::read_to_string(path).await {
        Ok(markdown) => markdown,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(not_found("Markdown not found"))
        }
        Err(e) => return Err(internal(e.to_string())),
    };
    extract_markdown_section(&markdown, &heading)
        .map(|section| Json(SectionResponse { section }))
        .ok_or_else(|| not_found("Section not found"))
}
