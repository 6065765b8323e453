//! HTTP API.
//!
//! Thin adapter over the session machinery. There is no ambient session
//! dictionary: each running session is owned exclusively by its spawned
//! task (controller, memory stream, and adapter live inside it), and the
//! registry only holds shared status/result snapshots that the owning task
//! writes. Progress events are bridged onto a broadcast channel and served
//! over a WebSocket.
//!
//! API sessions drive the bundled scripted adapter against a caller-supplied
//! site fixture; real browser drivers integrate through the library, not
//! through this endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::agent::{AgentController, SessionEvent};
use crate::browser::{ScriptedBrowser, SiteFixture};
use crate::config::AgentConfig;
use crate::embedding::{EmbeddingProvider, HashingEmbedder, HttpEmbeddingClient};
use crate::llm_client::{LanguageModel, LlmClient};
use crate::memory::{MemoryRecord, MemoryStream};
use crate::persona::{Persona, PersonaConstraints, PersonaGenerator};
use crate::session::{SessionDriver, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Running,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub cycles_completed: usize,
    pub last_event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared view of one session. The session task is the single writer.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub created_at: DateTime<Utc>,
    status: Arc<RwLock<SessionStatus>>,
    result: Arc<RwLock<Option<SessionResult>>>,
}

impl SessionHandle {
    fn new(id: String) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            status: Arc::new(RwLock::new(SessionStatus {
                phase: SessionPhase::Running,
                cycles_completed: 0,
                last_event: "created".to_string(),
                error: None,
            })),
            result: Arc::new(RwLock::new(None)),
        }
    }
}

/// Session-keyed store. Replaces the global "active sessions" dictionary
/// pattern: handles carry snapshots only, never live agent state.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub async fn insert(&self, handle: SessionHandle) {
        self.sessions
            .write()
            .await
            .insert(handle.id.clone(), handle);
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<SessionHandle> =
            self.sessions.read().await.values().cloned().collect();
        handles.sort_by_key(|h| h.created_at);
        handles
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEventEnvelope {
    pub session_id: String,
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

pub struct ServerState {
    config: AgentConfig,
    registry: SessionRegistry,
    auth: AuthConfig,
    ws_events: broadcast::Sender<ApiEventEnvelope>,
}

#[derive(Debug, Clone)]
struct AuthConfig {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    persona: Persona,
    intent: String,
    start_url: String,
    #[serde(default)]
    max_cycles: Option<usize>,
    #[serde(default)]
    site: Option<SiteFixture>,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    session_id: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    id: String,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    status: SessionStatus,
}

pub async fn serve(config: AgentConfig) -> Result<()> {
    let bind_addr = config
        .bind_addr
        .parse::<SocketAddr>()
        .context("Invalid bind_addr (expected host:port)")?;

    let auth = load_auth_config();
    let (ws_events, _) = broadcast::channel(512);

    let state = Arc::new(ServerState {
        config,
        registry: SessionRegistry::default(),
        auth,
        ws_events,
    });

    let protected = Router::new()
        .route("/health", get(health))
        .route("/personas/generate", post(generate_persona))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/result", get(get_session_result))
        .route("/sessions/:id/memories", get(get_session_memories))
        .route("/ws/events", get(ws_events_route))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let app = Router::new().nest("/v1", protected);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", bind_addr))?;
    tracing::info!("uxagent API listening on http://{}", bind_addr);
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}

fn load_auth_config() -> AuthConfig {
    let token = std::env::var("UXAGENT_API_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    if token.is_none() {
        tracing::warn!("UXAGENT_API_TOKEN is unset; all API routes are unauthenticated");
    }
    AuthConfig { token }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &AuthConfig) -> Result<(), StatusCode> {
    let Some(token) = auth.token.as_deref() else {
        return Ok(());
    };
    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if auth_value.trim() != format!("Bearer {}", token) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn generate_persona(
    State(state): State<Arc<ServerState>>,
    Json(constraints): Json<PersonaConstraints>,
) -> Result<Json<Persona>, (StatusCode, String)> {
    let generator = PersonaGenerator::new(build_llm(&state.config));
    generator
        .generate(&constraints)
        .await
        .map(Json)
        .map_err(|error| (StatusCode::BAD_GATEWAY, error.to_string()))
}

async fn create_session(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, (StatusCode, String)> {
    if body.persona.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "persona must not be empty".to_string(),
        ));
    }
    if body.intent.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "intent must not be empty".to_string(),
        ));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let handle = SessionHandle::new(session_id.clone());
    state.registry.insert(handle.clone()).await;

    let (event_tx, event_rx) = flume::unbounded();
    spawn_event_bridge(
        session_id.clone(),
        event_rx,
        handle.clone(),
        state.ws_events.clone(),
    );
    spawn_session_task(state.clone(), handle, body, event_tx);

    Ok(Json(CreateSessionResponse {
        session_id,
        status: "running",
    }))
}

fn spawn_session_task(
    state: Arc<ServerState>,
    handle: SessionHandle,
    body: CreateSessionRequest,
    event_tx: flume::Sender<SessionEvent>,
) {
    let max_cycles = body.max_cycles.unwrap_or(state.config.max_cycles);
    tokio::spawn(async move {
        let llm = build_llm(&state.config);
        let embedder = build_embedder(&state.config);
        let browser = Arc::new(ScriptedBrowser::new(body.site.unwrap_or_default()));
        let memory = MemoryStream::new(embedder);

        let mut controller = AgentController::new(llm, browser, memory)
            .with_temperature(state.config.llm_temperature);
        if let Err(error) = controller.set_persona(body.persona).await {
            fail_session(&handle, error.to_string()).await;
            return;
        }
        if let Err(error) = controller.set_intent(&body.intent).await {
            fail_session(&handle, error.to_string()).await;
            return;
        }

        let mut driver = SessionDriver::new(controller).with_event_sender(event_tx);
        match driver.run(&body.start_url, max_cycles).await {
            Ok(result) => {
                let mut status = handle.status.write().await;
                status.phase = SessionPhase::Finished;
                status.cycles_completed = result.cycles_completed;
                drop(status);
                *handle.result.write().await = Some(result);
            }
            Err(error) => fail_session(&handle, error.to_string()).await,
        }
    });
}

async fn fail_session(handle: &SessionHandle, error: String) {
    tracing::error!("Session {} failed: {}", handle.id, error);
    let mut status = handle.status.write().await;
    status.phase = SessionPhase::Failed;
    status.error = Some(error);
}

fn spawn_event_bridge(
    session_id: String,
    event_rx: flume::Receiver<SessionEvent>,
    handle: SessionHandle,
    ws_events: broadcast::Sender<ApiEventEnvelope>,
) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            {
                let mut status = handle.status.write().await;
                match &event {
                    SessionEvent::CycleStarted { cycle } => {
                        status.cycles_completed = *cycle;
                        status.last_event = format!("cycle {} started", cycle);
                    }
                    SessionEvent::ActionExecuted {
                        description,
                        success,
                    } => {
                        status.last_event = if *success {
                            description.clone()
                        } else {
                            format!("failed: {}", description)
                        };
                    }
                    SessionEvent::SessionFinished {
                        cycles_completed, ..
                    } => {
                        status.cycles_completed = *cycles_completed;
                        status.last_event = "finished".to_string();
                    }
                    _ => {}
                }
            }
            let _ = ws_events.send(map_session_event(&session_id, event));
        }
    });
}

fn map_session_event(session_id: &str, event: SessionEvent) -> ApiEventEnvelope {
    let (event_type, payload) = match event {
        SessionEvent::CycleStarted { cycle } => {
            ("cycle_started", serde_json::json!({ "cycle": cycle }))
        }
        SessionEvent::ObservationsAdded { count } => {
            ("observations_added", serde_json::json!({ "count": count }))
        }
        SessionEvent::PlanUpdated { next_step } => {
            ("plan_updated", serde_json::json!({ "next_step": next_step }))
        }
        SessionEvent::ActionExecuted {
            description,
            success,
        } => (
            "action_executed",
            serde_json::json!({ "description": description, "success": success }),
        ),
        SessionEvent::ReflectionsAdded { count } => {
            ("reflections_added", serde_json::json!({ "count": count }))
        }
        SessionEvent::WonderingsAdded { count } => {
            ("wonderings_added", serde_json::json!({ "count": count }))
        }
        SessionEvent::SessionFinished {
            cycles_completed,
            task_completed,
        } => (
            "session_finished",
            serde_json::json!({
                "cycles_completed": cycles_completed,
                "task_completed": task_completed
            }),
        ),
    };
    ApiEventEnvelope {
        session_id: session_id.to_string(),
        event_type: event_type.to_string(),
        emitted_at: Utc::now(),
        payload,
    }
}

async fn list_sessions(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<SessionSummary>>, (StatusCode, String)> {
    let mut summaries = Vec::new();
    for handle in state.registry.list().await {
        summaries.push(SessionSummary {
            id: handle.id.clone(),
            created_at: handle.created_at,
            status: handle.status.read().await.clone(),
        });
    }
    Ok(Json(summaries))
}

async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, (StatusCode, String)> {
    let handle = require_session(&state, &session_id).await?;
    let status = handle.status.read().await.clone();
    Ok(Json(SessionSummary {
        id: handle.id.clone(),
        created_at: handle.created_at,
        status,
    }))
}

async fn get_session_result(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResult>, (StatusCode, String)> {
    let handle = require_session(&state, &session_id).await?;
    let result = handle.result.read().await.clone();
    match result {
        Some(result) => Ok(Json(result)),
        None => {
            let status = handle.status.read().await;
            match status.phase {
                SessionPhase::Failed => Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    status.error.clone().unwrap_or_else(|| "session failed".to_string()),
                )),
                _ => Err((
                    StatusCode::CONFLICT,
                    "session is still running".to_string(),
                )),
            }
        }
    }
}

async fn get_session_memories(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<MemoryRecord>>, (StatusCode, String)> {
    let handle = require_session(&state, &session_id).await?;
    let memories = handle
        .result
        .read()
        .await
        .as_ref()
        .map(|result| result.memories.clone());
    match memories {
        Some(memories) => Ok(Json(memories)),
        None => Err((
            StatusCode::CONFLICT,
            "session is still running".to_string(),
        )),
    }
}

async fn require_session(
    state: &ServerState,
    session_id: &str,
) -> Result<SessionHandle, (StatusCode, String)> {
    state.registry.get(session_id).await.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("session '{}' not found", session_id),
        )
    })
}

async fn ws_events_route(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.ws_events.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx))
}

async fn stream_events(socket: WebSocket, mut rx: broadcast::Receiver<ApiEventEnvelope>) {
    let (mut sink, mut stream) = socket.split();
    // Drain client frames so we notice a close.
    let drain = tokio::spawn(async move { while stream.next().await.is_some() {} });

    loop {
        match rx.recv().await {
            Ok(envelope) => {
                let Ok(text) = serde_json::to_string(&envelope) else {
                    continue;
                };
                if futures_util::SinkExt::send(&mut sink, Message::Text(text))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("WebSocket client lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    drain.abort();
}

fn build_llm(config: &AgentConfig) -> Arc<dyn LanguageModel> {
    Arc::new(LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone().unwrap_or_default(),
        config.llm_model.clone(),
    ))
}

pub fn build_embedder(config: &AgentConfig) -> Arc<dyn EmbeddingProvider> {
    match config.embedding_provider.as_str() {
        "http" => Arc::new(HttpEmbeddingClient::new(
            config.embedding_api_url.clone(),
            config.embedding_api_key.clone().unwrap_or_default(),
            config.embedding_model.clone(),
        )),
        other => {
            if other != "hash" {
                tracing::warn!(
                    "Unknown embedding provider '{}', using the hashing embedder",
                    other
                );
            }
            Arc::new(HashingEmbedder::new(config.embedding_dim))
        }
    }
}
