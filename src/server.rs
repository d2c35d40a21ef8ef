//! HTTP and WebSocket server.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/prompt?prompt=` | Answer a prompt (defaults to the first example) |
//! | `POST` | `/prompt` | Answer a prompt with optional history and overrides |
//! | `GET` | `/documents` | List the documents directory |
//! | `POST` | `/documents` | Upload documents (multipart), then rebuild the index |
//! | `GET` | `/config` | Resolved configuration, secrets omitted |
//! | `GET` | `/health` | Status, version, mode and index state |
//! | `GET` | `/chat` | WebSocket chat with streamed tokens |
//!
//! `/documents` and `/config` require `?admin_pass=` when `auth.admin_pass`
//! is set. Every response carries an `X-Process-Time` header (seconds).
//!
//! # WebSocket protocol
//!
//! The client sends `{"prompt": "..."}`. The server answers with a
//! `start` message, one `stream` message per token and a final `end`
//! message carrying the full answer and its sources:
//!
//! ```json
//! {"message": "Amsterdam", "type": "end", "sender": "bot", "sources": [...]}
//! ```
//!
//! Each connection keeps its own conversation memory.

use std::path::PathBuf;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Query, Request, State,
    },
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use libre_chat_core::memory::{ConversationMemory, Speaker};
use libre_chat_core::models::{QueryResult, SourceDocument};
use libre_chat_core::ChatError;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::download::unzip_into;
use crate::engine::{Mode, QueryEngine, QueryOverrides};
use crate::ingest::IngestReport;
use crate::streaming::StreamItem;
use crate::vectorstore::IndexState;

/// Upload size limit for `POST /documents`.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Starts the server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config, engine: QueryEngine) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Libre Chat listening on http://{}", bind_addr);
    info!(bind = %bind_addr, mode = ?engine.mode(), "Server started");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

/// All routes with CORS and the process-time header applied.
pub fn router(engine: QueryEngine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/prompt", get(handle_get_prompt).post(handle_post_prompt))
        .route(
            "/documents",
            get(handle_list_documents)
                .post(handle_upload_documents)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/config", get(handle_config))
        .route("/health", get(handle_health))
        .route("/chat", get(handle_chat))
        .layer(middleware::from_fn(process_time))
        .layer(cors)
        .with_state(engine)
}

async fn process_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = format!("{:.6}", started.elapsed().as_secs_f64());
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }
    response
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"empty_prompt"`, `"forbidden"`).
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let status = match err {
            ChatError::EmptyPrompt => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn forbidden() -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "forbidden".to_string(),
        message: "The admin pass key provided was wrong".to_string(),
    }
}

fn unprocessable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        code: "unprocessable".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

#[derive(Deserialize)]
struct AdminQuery {
    admin_pass: Option<String>,
}

fn check_admin(engine: &QueryEngine, query: &AdminQuery) -> Result<(), AppError> {
    match &engine.config().auth.admin_pass {
        Some(expected) if !expected.is_empty() => {
            if query.admin_pass.as_deref() == Some(expected.as_str()) {
                Ok(())
            } else {
                warn!("Rejected request with a wrong admin pass");
                Err(forbidden())
            }
        }
        _ => Ok(()),
    }
}

// ============ /prompt ============

#[derive(Deserialize)]
struct PromptQuery {
    prompt: Option<String>,
}

/// Body of `POST /prompt`.
#[derive(Debug, Deserialize)]
struct PromptRequest {
    prompt: String,
    #[serde(default, alias = "system_prompt")]
    instructions: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default, alias = "max_tokens")]
    max_new_tokens: Option<u32>,
    /// Earlier `(user, assistant)` exchanges of a stateless conversation.
    #[serde(default, alias = "history_with_input")]
    history: Vec<(String, String)>,
}

async fn handle_get_prompt(
    State(engine): State<QueryEngine>,
    Query(query): Query<PromptQuery>,
) -> Result<Json<QueryResult>, AppError> {
    let prompt = match query.prompt {
        Some(prompt) => prompt,
        None => engine
            .config()
            .info
            .examples
            .first()
            .cloned()
            .unwrap_or_default(),
    };
    let result = engine.aquery(&prompt, None, None).await?;
    Ok(Json(result))
}

async fn handle_post_prompt(
    State(engine): State<QueryEngine>,
    Json(request): Json<PromptRequest>,
) -> Result<Json<QueryResult>, AppError> {
    let mut memory: ConversationMemory = request
        .history
        .into_iter()
        .flat_map(|(user, bot)| [(Speaker::User, user), (Speaker::Assistant, bot)])
        .collect();
    let overrides = QueryOverrides {
        instructions: request.instructions,
        temperature: request.temperature,
        max_new_tokens: request.max_new_tokens,
    };
    let result = engine
        .aquery(&request.prompt, Some(&mut memory), Some(&overrides))
        .await?;
    Ok(Json(result))
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentList {
    count: usize,
    files: Vec<String>,
}

async fn handle_list_documents(
    State(engine): State<QueryEngine>,
    Query(admin): Query<AdminQuery>,
) -> Result<Json<DocumentList>, AppError> {
    check_admin(&engine, &admin)?;
    let dir = engine.documents_path();
    let mut files = Vec::new();
    if dir.is_dir() {
        let entries = std::fs::read_dir(dir).map_err(ChatError::from)?;
        for entry in entries {
            let entry = entry.map_err(ChatError::from)?;
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(Json(DocumentList {
        count: files.len(),
        files,
    }))
}

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<IngestReport>,
}

async fn handle_upload_documents(
    State(engine): State<QueryEngine>,
    Query(admin): Query<AdminQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    check_admin(&engine, &admin)?;
    let dir = engine.documents_path().to_path_buf();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(ChatError::from)?;

    let mut saved = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| unprocessable(format!("invalid multipart body: {}", e)))?
    {
        // Only the base name is kept so uploads cannot escape the directory.
        let Some(name) = field
            .file_name()
            .and_then(|n| PathBuf::from(n).file_name().map(|n| n.to_os_string()))
        else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| unprocessable(format!("cannot read upload: {}", e)))?;
        let path = dir.join(&name);
        tokio::fs::write(&path, &data)
            .await
            .map_err(ChatError::from)?;
        saved.push(path);
    }
    if saved.is_empty() {
        return Err(unprocessable("no files in the upload"));
    }

    let mut names = Vec::new();
    for path in saved {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.to_ascii_lowercase().ends_with(".zip") {
            let archive = path.clone();
            let target = dir.clone();
            tokio::task::spawn_blocking(move || -> libre_chat_core::Result<usize> {
                let count = unzip_into(&archive, &target)?;
                std::fs::remove_file(&archive)?;
                Ok(count)
            })
            .await
            .map_err(|e| internal(format!("unzip task failed: {}", e)))??;
            info!(archive = %name, "Unzipped uploaded archive");
        }
        names.push(name);
    }
    info!(files = names.len(), dir = %dir.display(), "Stored uploaded documents");

    let index = if engine.mode() == Mode::Retrieval {
        let builder = engine.clone();
        let report = tokio::task::spawn_blocking(move || builder.rebuild_index())
            .await
            .map_err(|e| internal(format!("index build task failed: {}", e)))??;
        Some(report)
    } else {
        None
    };

    let message = match &index {
        Some(_) => format!(
            "Documents uploaded in {}, vectorstore rebuilt.",
            dir.display()
        ),
        None => format!("Documents uploaded in {}.", dir.display()),
    };
    Ok(Json(UploadResponse {
        message,
        files: names,
        index,
    }))
}

// ============ /config and /health ============

async fn handle_config(
    State(engine): State<QueryEngine>,
    Query(admin): Query<AdminQuery>,
) -> Result<Json<Config>, AppError> {
    check_admin(&engine, &admin)?;
    Ok(Json(engine.config().clone()))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    mode: Mode,
    /// `null` in conversational mode.
    index: Option<IndexState>,
}

async fn handle_health(State(engine): State<QueryEngine>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: engine.mode(),
        index: engine.index_state()?,
    }))
}

// ============ /chat ============

/// A message sent to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ChatMessageKind,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceDocument>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageKind {
    Start,
    Stream,
    End,
    Error,
    Info,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Bot,
    User,
}

impl ChatMessage {
    fn bot(kind: ChatMessageKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            sender: Sender::Bot,
            sources: None,
        }
    }
}

#[derive(Deserialize)]
struct ChatRequest {
    prompt: String,
}

async fn handle_chat(State(engine): State<QueryEngine>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| chat_session(engine, socket))
}

async fn send_json(socket: &mut WebSocket, message: &ChatMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => false,
    }
}

async fn chat_session(engine: QueryEngine, mut socket: WebSocket) {
    let session = Uuid::new_v4();
    info!(%session, "WebSocket connected");
    let mut memory = ConversationMemory::new();

    while let Some(Ok(incoming)) = socket.recv().await {
        let text = match incoming {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let prompt = match serde_json::from_str::<ChatRequest>(text.as_str()) {
            Ok(request) => request.prompt,
            Err(e) => {
                let reply = ChatMessage::bot(ChatMessageKind::Error, format!("invalid message: {}", e));
                if !send_json(&mut socket, &reply).await {
                    break;
                }
                continue;
            }
        };

        if !send_json(&mut socket, &ChatMessage::bot(ChatMessageKind::Start, "")).await {
            break;
        }
        let mut stream = match engine.stream(&prompt, Some(memory.clone()), None) {
            Ok(stream) => stream,
            Err(err) => {
                let reply = ChatMessage::bot(ChatMessageKind::Error, err.to_string());
                if !send_json(&mut socket, &reply).await {
                    break;
                }
                continue;
            }
        };

        let mut connected = true;
        while let Some(item) = stream.next().await {
            let reply = match item {
                Ok(StreamItem::Token { token, .. }) => {
                    ChatMessage::bot(ChatMessageKind::Stream, token)
                }
                Ok(StreamItem::Done(answer)) => {
                    memory = answer.memory;
                    ChatMessage {
                        sources: answer.result.source_documents,
                        ..ChatMessage::bot(ChatMessageKind::End, answer.result.result_text)
                    }
                }
                Err(err) => {
                    warn!(%session, error = %err, "Streaming answer failed");
                    ChatMessage::bot(ChatMessageKind::Error, err.to_string())
                }
            };
            if !send_json(&mut socket, &reply).await {
                connected = false;
                break;
            }
        }
        if !connected {
            break;
        }
    }
    info!(%session, turns = memory.len(), "WebSocket disconnected");
}
