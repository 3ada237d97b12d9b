//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::game::report::MatchReport;
use crate::game::settings::Persisted;
use crate::game::{GameConfig, MatchPhase, PlayerId, SessionClosed, SessionCommand};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::SessionSnapshot;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let game_routes = Router::new()
        .route("/api/session", get(session_handler))
        .route("/api/game/start", post(start_handler))
        .route("/api/game/reset", post(reset_handler))
        .route("/api/game/new", post(new_game_handler))
        .route("/api/pedal", post(pedal_handler))
        .route("/api/pedal/stop", post(stop_pedal_handler));

    let settings_routes = Router::new()
        .route("/api/config", get(get_config_handler).post(apply_config_handler))
        .route("/api/config/reset", post(reset_config_handler))
        .route("/api/connectivity/retry", post(retry_handler))
        .route("/api/connectivity/auto-reconnect", post(auto_reconnect_handler))
        .route("/api/reports", get(reports_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .merge(game_routes)
        .merge(settings_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    phase: MatchPhase,
    offline: bool,
    reports: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.session.snapshot();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        phase: snapshot.phase,
        offline: snapshot.offline,
        reports: state.reports.len(),
    })
}

// ============================================================================
// Game endpoints
// ============================================================================

async fn session_handler(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

async fn start_handler(State(state): State<AppState>) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.session.request(SessionCommand::Start).await?))
}

async fn reset_handler(State(state): State<AppState>) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.session.request(SessionCommand::Reset).await?))
}

async fn new_game_handler(
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.session.request(SessionCommand::NewGame).await?))
}

#[derive(Deserialize)]
struct PedalRequest {
    player: PlayerId,
}

async fn pedal_handler(
    State(state): State<AppState>,
    Json(req): Json<PedalRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(
        state.session.request(SessionCommand::Pedal(req.player)).await?,
    ))
}

async fn stop_pedal_handler(
    State(state): State<AppState>,
    Json(req): Json<PedalRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(
        state
            .session
            .request(SessionCommand::StopPedaling(req.player))
            .await?,
    ))
}

// ============================================================================
// Config endpoints
// ============================================================================

#[derive(Serialize)]
struct ConfigResponse {
    config: GameConfig,
    persisted: Persisted,
}

async fn get_config_handler(State(state): State<AppState>) -> Json<GameConfig> {
    Json(state.session.snapshot().config)
}

async fn apply_config_handler(
    State(state): State<AppState>,
    Json(candidate): Json<GameConfig>,
) -> Result<Json<ConfigResponse>, AppError> {
    // Session adopts it first; persistence is best effort
    state
        .session
        .request(SessionCommand::ApplyConfig(candidate.clamped()))
        .await?;
    let (config, persisted) = state.config_store.apply(candidate).await;

    Ok(Json(ConfigResponse { config, persisted }))
}

async fn reset_config_handler(
    State(state): State<AppState>,
) -> Result<Json<ConfigResponse>, AppError> {
    state
        .session
        .request(SessionCommand::ApplyConfig(GameConfig::default()))
        .await?;
    let (config, persisted) = state.config_store.reset().await;

    Ok(Json(ConfigResponse { config, persisted }))
}

// ============================================================================
// Connectivity endpoints
// ============================================================================

async fn retry_handler(State(state): State<AppState>) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(
        state.session.request(SessionCommand::RetryConnection).await?,
    ))
}

#[derive(Deserialize)]
struct AutoReconnectRequest {
    enabled: bool,
}

async fn auto_reconnect_handler(
    State(state): State<AppState>,
    Json(req): Json<AutoReconnectRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(
        state
            .session
            .request(SessionCommand::SetAutoReconnect(req.enabled))
            .await?,
    ))
}

// ============================================================================
// Reports
// ============================================================================

/// Export of the whole report log as a dated JSON download
async fn reports_handler(State(state): State<AppState>) -> impl IntoResponse {
    let reports: Vec<MatchReport> = state.reports.all();
    let filename = format!(
        "attachment; filename=\"bikejj_game_reports_{}.json\"",
        chrono::Utc::now().format("%Y-%m-%d")
    );

    ([(header::CONTENT_DISPOSITION, filename)], Json(reports))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Game session unavailable")]
    Unavailable,
}

impl From<SessionClosed> for AppError {
    fn from(_: SessionClosed) -> Self {
        AppError::Unavailable
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}
