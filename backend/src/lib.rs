pub mod cadence;
pub mod clients;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod feed;
pub mod geo;
pub mod playback;
pub mod route;
pub mod route_source;
pub mod session;
pub mod simulator;
pub mod walk_handlers;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use shared::{ApiError, LoadRouteRequest, RouteSummary};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::controller::WalkController;
use crate::error::{ConversationError, RouteError, WalkError};

#[derive(Clone)]
pub struct AppState {
    pub controller: WalkController,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/route", post(route_handler))
        .route("/api/walk/start", post(walk_handlers::start))
        .route("/api/walk/pause", post(walk_handlers::pause))
        .route("/api/walk/resume", post(walk_handlers::resume))
        .route("/api/walk/stop", post(walk_handlers::stop))
        .route("/api/walk/pace", put(walk_handlers::set_pace))
        .route("/api/walk/pace/faster", post(walk_handlers::faster))
        .route("/api/walk/pace/slower", post(walk_handlers::slower))
        .route("/api/status", get(walk_handlers::status))
        .route("/api/events", get(walk_handlers::events))
        .route("/api/conversation/messages", post(walk_handlers::submit_message))
        .route("/api/conversation/recording", post(walk_handlers::begin_recording))
        .route(
            "/api/conversation/recording/complete",
            post(walk_handlers::complete_recording),
        )
        .route("/api/playback/toggle", post(walk_handlers::toggle_playback))
        .route("/api/playback/stop", post(walk_handlers::stop_playback))
        .route("/api/playback/current", get(walk_handlers::current_clip))
        .route("/api/playback/finished/:id", post(walk_handlers::playback_finished))
        .route("/api/playback/failed/:id", post(walk_handlers::playback_failed))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn route_handler(
    State(state): State<AppState>,
    Json(req): Json<LoadRouteRequest>,
) -> Result<Json<RouteSummary>, (StatusCode, Json<ApiError>)> {
    state
        .controller
        .load_route(&req)
        .await
        .map(Json)
        .map_err(route_error_to_api_error)
}

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            message: message.into(),
        }),
    )
}

fn route_error_to_api_error(err: RouteError) -> (StatusCode, Json<ApiError>) {
    tracing::warn!(error = %err, "route load failed");
    let status = match err {
        RouteError::InvalidUrl(_) | RouteError::TooShort(_) | RouteError::Unavailable(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RouteError::Http(_) => StatusCode::BAD_GATEWAY,
    };
    api_error(status, err.to_string())
}

pub(crate) fn walk_error_to_api_error(err: WalkError) -> (StatusCode, Json<ApiError>) {
    let status = match err {
        WalkError::NoRoute | WalkError::InvalidTransition { .. } => StatusCode::CONFLICT,
        WalkError::PaceOutOfRange(_) => StatusCode::BAD_REQUEST,
    };
    api_error(status, err.to_string())
}

pub(crate) fn conversation_error_to_api_error(err: ConversationError) -> (StatusCode, Json<ApiError>) {
    api_error(StatusCode::BAD_REQUEST, err.to_string())
}
