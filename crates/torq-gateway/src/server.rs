//! Gateway server: Axum-based HTTP + WS server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, middleware};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use torq_core::{
    AgentEvent, ChatMessage, ChatRequest, Message, OrchestrationMode, Orchestrator, SkillSet,
    TorqError,
};

use crate::auth;
use crate::events::{EventBus, spawn_agent_event_forwarder};
use crate::protocol::{
    ApiError, ChatRequestBody, ChatResponseBody, CreateSessionBody, DEFAULT_SESSION_TITLE,
    GatewayEvent, events,
};
use crate::session::SessionManager;

const EVENT_BUS_CAPACITY: usize = 256;
const AGENT_EVENT_CAPACITY: usize = 256;

/// Shared state for all handlers
#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionManager>,
    pub events: EventBus,
    pub skills: Arc<SkillSet>,
    /// Tools of the connected MCP server, if any
    pub mcp_tools: Arc<Vec<String>>,
    pub auth_token: Arc<String>,
    pub start_time: Instant,
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
    agent_events: Option<mpsc::Receiver<AgentEvent>>,
}

impl GatewayServer {
    /// Create a gateway around an orchestrator; its agent status changes are
    /// streamed to WebSocket clients
    pub fn new(bind: SocketAddr, orchestrator: Orchestrator) -> Self {
        let (tx, rx) = mpsc::channel(AGENT_EVENT_CAPACITY);
        let state = GatewayState {
            orchestrator: Arc::new(orchestrator.with_events(tx)),
            sessions: Arc::new(SessionManager::new()),
            events: EventBus::new(EVENT_BUS_CAPACITY),
            skills: Arc::new(SkillSet::default()),
            mcp_tools: Arc::new(Vec::new()),
            auth_token: Arc::new(String::new()),
            start_time: Instant::now(),
        };
        Self {
            state,
            bind,
            agent_events: Some(rx),
        }
    }

    /// Require `Authorization: Bearer <token>` on `/api/*` and `/ws`
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.state.auth_token = Arc::new(token.into());
        self
    }

    pub fn with_skills(mut self, skills: SkillSet) -> Self {
        self.state.skills = Arc::new(skills);
        self
    }

    pub fn with_mcp_tools(mut self, tools: Vec<String>) -> Self {
        self.state.mcp_tools = Arc::new(tools);
        self
    }

    /// Get a reference to the event bus (for broadcasting from outside)
    pub fn event_bus(&self) -> &EventBus {
        &self.state.events
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.state.sessions
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/api/status", get(status_handler))
            .route("/api/agents", get(list_agents_handler))
            .route("/api/agents/{id}", get(get_agent_handler))
            .route("/api/agents/{id}/chat", post(chat_handler))
            .route(
                "/api/sessions",
                get(list_sessions_handler).post(create_session_handler),
            )
            .route("/api/sessions/{id}", get(get_session_handler))
            .route("/ws", get(ws_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.auth_token.clone(),
                auth::require_auth,
            ));

        Router::new()
            .route("/health", get(health_handler))
            .merge(protected)
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener until `shutdown` is cancelled
    pub async fn serve(mut self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        let forwarder = self
            .agent_events
            .take()
            .map(|rx| spawn_agent_event_forwarder(rx, self.state.events.clone()));

        info!("Gateway listening on {}", listener.local_addr()?);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

        if let Some(handle) = forwarder {
            handle.abort();
        }
        info!("Gateway stopped");
        Ok(())
    }

    /// Bind the configured address and serve (blocks until shutdown)
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind).await?;
        self.serve(listener, shutdown).await
    }
}

// ── HTTP Handlers ──

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let registry = state.orchestrator.registry();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "agents": registry.len(),
        "active_agents": registry.active_agents().await,
        "sessions": state.sessions.count().await,
        "provider": state.orchestrator.provider_name(),
        "model": state.orchestrator.model(),
        "connected_clients": state.events.subscriber_count(),
        "mcp_tools": state.mcp_tools.as_ref(),
    }))
}

async fn list_agents_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let agents = state.orchestrator.registry().list().await;
    Json(serde_json::json!({ "agents": agents }))
}

async fn get_agent_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state
        .orchestrator
        .registry()
        .get(&id)
        .await
        .ok_or(TorqError::AgentNotFound(id))?;
    Ok(Json(agent))
}

async fn chat_handler(
    State(state): State<GatewayState>,
    Path(agent_id): Path<String>,
    Json(body): Json<ChatRequestBody>,
) -> Result<Json<ChatResponseBody>, ApiError> {
    if !state.orchestrator.registry().contains(&agent_id) {
        return Err(TorqError::AgentNotFound(agent_id).into());
    }
    if body.message.trim().is_empty() {
        return Err(TorqError::InvalidRequest("Message cannot be empty".into()).into());
    }

    let mode = body
        .mode
        .as_deref()
        .map(str::parse::<OrchestrationMode>)
        .transpose()?
        .unwrap_or_default();

    let skill = body
        .skill
        .as_deref()
        .map(|name| state.skills.require(name).cloned())
        .transpose()?;

    let history: Vec<ChatMessage> = match &body.session_id {
        Some(session_id) => {
            let history = state.sessions.history(session_id).await?;
            record_message(&state, session_id, Message::user(body.message.clone())).await?;
            history.iter().map(ChatMessage::from).collect()
        }
        None => Vec::new(),
    };

    let mut request = ChatRequest::new(body.message)
        .with_agent(agent_id)
        .with_mode(mode)
        .with_history(history);
    request.context = body.context;
    request.skill = skill;

    let outcome = state.orchestrator.handle(request).await?;
    if !outcome.success {
        warn!("Chat with {} failed: {}", outcome.agent_id, outcome.response);
    }

    if let Some(session_id) = &body.session_id {
        let answered_by = outcome.agent_used.as_deref().unwrap_or(&outcome.agent_id);
        let reply = if outcome.success {
            Message::assistant(outcome.response.clone(), answered_by)
        } else {
            let mut msg = Message::error(outcome.response.clone());
            msg.metadata.agent_id = Some(answered_by.to_string());
            msg
        };
        record_message(&state, session_id, reply).await?;
    }

    Ok(Json(ChatResponseBody::from(outcome)))
}

/// Append to a session and announce it on the event bus
async fn record_message(
    state: &GatewayState,
    session_id: &str,
    message: Message,
) -> Result<(), TorqError> {
    let data = serde_json::json!({
        "session_id": session_id,
        "message": &message,
    });
    state.sessions.append(session_id, message).await?;
    state
        .events
        .broadcast(GatewayEvent::new(events::MESSAGE_CREATED, data));
    Ok(())
}

async fn list_sessions_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let sessions = state.sessions.list().await;
    Json(serde_json::json!({ "sessions": sessions }))
}

async fn create_session_handler(
    State(state): State<GatewayState>,
    body: Option<Json<CreateSessionBody>>,
) -> impl IntoResponse {
    let title = body
        .and_then(|Json(b)| b.title)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string());

    let session = state.sessions.create(&title).await;
    state.events.broadcast(GatewayEvent::new(
        events::SESSION_CREATED,
        serde_json::to_value(session.summary()).unwrap_or_default(),
    ));
    (StatusCode::CREATED, Json(session))
}

async fn get_session_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or(TorqError::SessionNotFound(id))?;
    Ok(Json(session))
}

// ── WebSocket Handler ──

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    info!("WebSocket connection from {}", addr);
    // Subscribe before the upgrade completes so no event is missed
    let event_rx = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_ws(socket, event_rx, addr))
}

async fn handle_ws(
    socket: WebSocket,
    mut event_rx: broadcast::Receiver<GatewayEvent>,
    addr: SocketAddr,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Client {} lagged by {} events", addr, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // The stream is server → client; incoming frames only matter for close
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => debug!("Ignoring frame from {}", addr),
            Err(e) => {
                warn!("WebSocket error from {}: {}", addr, e);
                break;
            }
        }
    }

    send_task.abort();
    info!("Client {} disconnected", addr);
}
