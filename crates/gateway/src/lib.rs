//! HTTP gateway for Hisho.
//!
//! Exposes the orchestrator the way the hosted agent runtime expects:
//! `POST /invocations` streams wire events as server-sent events and
//! `GET /ping` reports health.
//!
//! Built on Axum.

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::HeaderMap,
    response::{
        Json,
        sse::{Event as SseEvent, Sse},
    },
    routing::{get, post},
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use hisho_agent::{AgentSettings, InvokeRequest, Orchestrator, SessionRegistry};
use hisho_config::AppConfig;
use hisho_tools::ApiCapabilityFactory;

/// Session id header set by the hosted agent runtime.
pub const RUNTIME_SESSION_HEADER: &str = "X-Amzn-Bedrock-AgentCore-Runtime-Session-Id";

/// Session id header for direct callers.
pub const SESSION_HEADER: &str = "X-Session-Id";

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
}

type SharedState = Arc<GatewayState>;

/// Build the orchestrator and its collaborators from configuration.
pub fn build_orchestrator(
    config: &AppConfig,
) -> Result<Orchestrator, Box<dyn std::error::Error + Send + Sync>> {
    let provider = hisho_providers::build_from_config(&config.model)?;
    let capabilities = ApiCapabilityFactory::new(&config.graph, config.wiki.clone())?;
    let sessions = Arc::new(SessionRegistry::from_config(&config.sessions));

    Ok(
        Orchestrator::new(provider, Arc::new(capabilities), sessions)
            .with_settings(AgentSettings::from(&config.model))
            .with_default_timezone(config.graph.default_timezone.clone())
            .with_wiki(config.wiki.is_some()),
    )
}

/// Build the Axum router.
///
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/invocations", post(invocations_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let orchestrator = Arc::new(build_orchestrator(&config)?);

    // Idle sessions are also purged on every resolve; the sweep covers quiet periods.
    let sweeper = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sweeper.sessions().evict_expired();
            if removed > 0 {
                debug!(removed, "Session sweep");
            }
        }
    });

    let app = build_router(Arc::new(GatewayState { orchestrator }));

    info!(
        address = %addr,
        model = %config.model.model_id,
        wiki = config.wiki.is_some(),
        "Gateway listening"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Session id from the runtime header, falling back to `X-Session-Id`.
fn session_id(headers: &HeaderMap) -> Option<String> {
    [RUNTIME_SESSION_HEADER, SESSION_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

// --- Handlers ---

#[derive(Serialize)]
struct PingResponse {
    status: &'static str,
}

async fn ping_handler() -> Json<PingResponse> {
    Json(PingResponse { status: "Healthy" })
}

/// `POST /invocations`: one user turn, answered as an SSE stream of wire events.
async fn invocations_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<InvokeRequest>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let session_id = session_id(&headers);
    debug!(session_id = ?session_id, "Invocation received");

    let stream = state
        .orchestrator
        .invoke(request, session_id.as_deref())
        .map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok(SseEvent::default().data(data))
        });

    Sse::new(stream)
}
