//! HTTP server for the browser client.
//!
//! `POST /api/chat` runs one orchestrated turn and relays its events as
//! Server-Sent Events. The remaining routes expose the tool catalog and the
//! conversation and agent stores.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agents::{AgentDraft, AgentStore};
use crate::config::AppConfig;
use crate::history::{validate_id, ConversationDraft, ConversationStore, StoreError};
use crate::messages::Message;
use crate::orchestrator::{EventSink, Orchestrator, TurnSettings};
use crate::paths::PathResolver;
use crate::prompt::{build_system_prompt, PromptSources};
use crate::stream::StreamEvent;
use crate::tools::ToolRegistry;
use crate::upstream::{ChatUpstream, HttpUpstream};

/// Events buffered between the orchestrator and a slow browser
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub upstream: Arc<dyn ChatUpstream>,
    pub tools: ToolRegistry,
    pub conversations: ConversationStore,
    pub agents: AgentStore,
}

impl AppState {
    /// Wire up tools and stores from the configuration
    pub fn new(config: AppConfig, upstream: Arc<dyn ChatUpstream>) -> Self {
        let paths = PathResolver::new(
            config.workspace.root.clone(),
            config.workspace.framework_root.clone(),
        );
        let conversations =
            ConversationStore::new(under_workspace(&paths, &config.storage.conversations_dir));
        let agents = AgentStore::new(
            under_workspace(&paths, &config.storage.agents_dir),
            paths.framework_root(),
        );

        Self {
            config: Arc::new(config),
            upstream,
            tools: ToolRegistry::with_defaults(paths),
            conversations,
            agents,
        }
    }
}

/// Relative storage directories live under the workspace root
fn under_workspace(paths: &PathResolver, dir: &std::path::Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        paths.workspace_root().join(dir)
    }
}

/// Errors returned by the JSON handlers
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found_error"),
            ServerError::Store(StoreError::InvalidId(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error")
            }
            ServerError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found_error"),
            ServerError::Store(StoreError::ReadOnly(_)) => (StatusCode::FORBIDDEN, "permission_error"),
            ServerError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };

        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }

        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": kind
            }
        });

        (status, Json(body)).into_response()
    }
}

/// Build the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/tools", get(list_tools))
        .route(
            "/api/conversations",
            get(list_conversations).post(save_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/api/agents", get(list_agents).post(save_agent))
        .route("/api/agents/{id}", get(get_agent).delete(delete_agent))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "agentdesk",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// When set, the augmented conversation is saved under this id
    #[serde(default)]
    pub conversation_id: Option<String>,
}

fn to_sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

/// Run one chat turn and stream its events
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    if request.messages.is_empty() {
        return Err(ServerError::BadRequest(
            "messages must contain at least one message".to_string(),
        ));
    }
    if let Some(id) = &request.conversation_id {
        validate_id(id)?;
    }

    let agent = match &request.agent_id {
        Some(id) => Some(
            state
                .agents
                .get(id)?
                .ok_or_else(|| ServerError::NotFound(format!("agent '{}'", id)))?,
        ),
        None => None,
    };
    let agent_definition = agent.as_ref().map(|a| &a.definition);

    let tools = match agent_definition.and_then(|a| a.tools.as_ref()) {
        Some(allowed) => state.tools.restricted_to(allowed),
        None => state.tools.clone(),
    };

    let system_prompt = build_system_prompt(
        PromptSources {
            request_override: request.system_prompt.as_deref(),
            agent_prompt: agent_definition.map(|a| a.system_prompt.as_str()),
            config_prompt: state.config.chat.system_prompt.as_deref(),
        },
        tools.paths(),
        &tools.names(),
    );

    let settings = TurnSettings {
        model: agent_definition
            .and_then(|a| a.model.clone())
            .unwrap_or_else(|| state.config.upstream.model.clone()),
        max_tokens: state.config.upstream.max_tokens,
        system_prompt,
        max_iterations: state.config.chat.max_iterations,
    };

    info!(
        messages = request.messages.len(),
        agent = request.agent_id.as_deref().unwrap_or("default"),
        model = %settings.model,
        tools = tools.names().len(),
        "Starting chat turn"
    );

    let orchestrator = Orchestrator::new(state.upstream.clone(), tools, settings);
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let conversations = state.conversations.clone();
    let ChatRequest {
        messages,
        agent_id,
        conversation_id,
        ..
    } = request;

    // the sink lives until the save below, so the SSE stream closes only
    // once the conversation is on disk
    tokio::spawn(async move {
        let sink = EventSink::new(tx);
        let outcome = orchestrator.run(messages, &sink).await;
        let Some(id) = conversation_id else {
            return;
        };
        if outcome.cancelled {
            warn!(conversation_id = %id, "Turn cancelled, conversation not saved");
            return;
        }
        let draft = ConversationDraft {
            id: Some(id.clone()),
            title: None,
            messages: outcome.messages,
            agent_id,
        };
        if let Err(e) = conversations.save(draft) {
            warn!(conversation_id = %id, error = %e, "Failed to save conversation after turn");
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok(to_sse_event(&event)), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tools.definitions())
}

async fn list_conversations(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.conversations.list())
}

async fn save_conversation(
    State(state): State<AppState>,
    Json(draft): Json<ConversationDraft>,
) -> Result<impl IntoResponse, ServerError> {
    let conversation = state.conversations.save(draft)?;
    Ok(Json(conversation))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let conversation = state
        .conversations
        .load(&id)?
        .ok_or_else(|| ServerError::NotFound(format!("conversation '{}'", id)))?;
    Ok(Json(conversation))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    if !state.conversations.delete(&id)? {
        return Err(ServerError::NotFound(format!("conversation '{}'", id)));
    }
    Ok(Json(json!({ "deleted": true, "id": id })))
}

async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.agents.discover())
}

async fn save_agent(
    State(state): State<AppState>,
    Json(draft): Json<AgentDraft>,
) -> Result<impl IntoResponse, ServerError> {
    if draft.name.trim().is_empty() {
        return Err(ServerError::BadRequest("agent name must not be empty".to_string()));
    }
    let agent = state.agents.save(draft)?;
    Ok(Json(agent))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let agent = state
        .agents
        .get(&id)?
        .ok_or_else(|| ServerError::NotFound(format!("agent '{}'", id)))?;
    Ok(Json(agent))
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    if !state.agents.delete(&id)? {
        return Err(ServerError::NotFound(format!("agent '{}'", id)));
    }
    Ok(Json(json!({ "deleted": true, "id": id })))
}

/// Start the server and run until Ctrl-C
pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    config.validate().map_err(anyhow::Error::msg)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let upstream = HttpUpstream::new(&config.upstream)?;
    if config.upstream.api_key.as_deref().unwrap_or_default().is_empty() {
        warn!("No API key configured; chat requests will fail until ANTHROPIC_API_KEY is set");
    }

    let state = AppState::new(config, Arc::new(upstream));
    info!(
        workspace = %state.tools.paths().workspace_root().display(),
        framework = ?state.tools.paths().framework_root(),
        conversations = ?state.conversations.dir(),
        "Workspace ready"
    );

    let app = create_router(state);

    info!(address = %addr, "Starting agentdesk server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
