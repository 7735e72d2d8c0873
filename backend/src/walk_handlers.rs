// Handlers for walk, conversation and playback control.
// All of them go through the shared WalkController.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use shared::{
    ApiError, ConversationStatus, CurrentClip, MessageRequest, NarrationEvent, PaceRequest,
    PlaybackFailure, PlaybackState, RecordingResult, RecordingUpload, SessionSnapshot,
};

use crate::{api_error, conversation_error_to_api_error, walk_error_to_api_error, AppState};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// POST /api/walk/start - Begin walking from the first coordinate
pub async fn start(State(state): State<AppState>) -> ApiResult<SessionSnapshot> {
    state
        .controller
        .start()
        .await
        .map(Json)
        .map_err(walk_error_to_api_error)
}

/// POST /api/walk/pause
pub async fn pause(State(state): State<AppState>) -> ApiResult<SessionSnapshot> {
    state
        .controller
        .pause()
        .await
        .map(Json)
        .map_err(walk_error_to_api_error)
}

/// POST /api/walk/resume
pub async fn resume(State(state): State<AppState>) -> ApiResult<SessionSnapshot> {
    state
        .controller
        .resume()
        .await
        .map(Json)
        .map_err(walk_error_to_api_error)
}

/// POST /api/walk/stop
pub async fn stop(State(state): State<AppState>) -> ApiResult<SessionSnapshot> {
    state
        .controller
        .stop()
        .await
        .map(Json)
        .map_err(walk_error_to_api_error)
}

/// PUT /api/walk/pace - Takes effect on the next tick
pub async fn set_pace(
    State(state): State<AppState>,
    Json(req): Json<PaceRequest>,
) -> ApiResult<PaceRequest> {
    state
        .controller
        .set_pace(req.pace_kmh)
        .await
        .map(|pace_kmh| Json(PaceRequest { pace_kmh }))
        .map_err(walk_error_to_api_error)
}

pub async fn faster(State(state): State<AppState>) -> Json<PaceRequest> {
    Json(PaceRequest {
        pace_kmh: state.controller.nudge_pace(true).await,
    })
}

pub async fn slower(State(state): State<AppState>) -> Json<PaceRequest> {
    Json(PaceRequest {
        pace_kmh: state.controller.nudge_pace(false).await,
    })
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.controller.snapshot().await)
}

/// GET /api/events - Narration feed, newest first
pub async fn events(State(state): State<AppState>) -> Json<Vec<NarrationEvent>> {
    Json(state.controller.events().await)
}

/// POST /api/conversation/messages - Ask a question; the reply lands in the feed
pub async fn submit_message(
    State(state): State<AppState>,
    Json(req): Json<MessageRequest>,
) -> Result<(StatusCode, Json<ConversationStatus>), (StatusCode, Json<ApiError>)> {
    state
        .controller
        .submit_message(&req.message)
        .await
        .map_err(conversation_error_to_api_error)?;
    let snapshot = state.controller.snapshot().await;
    Ok((StatusCode::ACCEPTED, Json(snapshot.conversation)))
}

/// POST /api/conversation/recording - The microphone opened; narration holds
pub async fn begin_recording(State(state): State<AppState>) -> Json<ConversationStatus> {
    state.controller.begin_recording().await;
    Json(state.controller.snapshot().await.conversation)
}

/// POST /api/conversation/recording/complete - Transcribe and submit
pub async fn complete_recording(
    State(state): State<AppState>,
    Json(upload): Json<RecordingUpload>,
) -> ApiResult<RecordingResult> {
    let audio = STANDARD
        .decode(upload.audio_base64.as_bytes())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid audio_base64: {e}")))?;
    let transcript = state
        .controller
        .complete_recording(Bytes::from(audio), &upload.mime_type)
        .await;
    Ok(Json(RecordingResult {
        transcript,
        conversation: state.controller.snapshot().await.conversation,
    }))
}

/// POST /api/playback/toggle
pub async fn toggle_playback(State(state): State<AppState>) -> Json<PlaybackState> {
    Json(state.controller.toggle_playback().await)
}

/// POST /api/playback/stop - Halt and drop every queued clip
pub async fn stop_playback(State(state): State<AppState>) -> StatusCode {
    state.controller.stop_playback().await;
    StatusCode::NO_CONTENT
}

/// GET /api/playback/current - The clip that is sounding now
pub async fn current_clip(State(state): State<AppState>) -> ApiResult<CurrentClip> {
    state
        .controller
        .current_clip()
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "nothing is playing"))
}

/// POST /api/playback/finished/:id
pub async fn playback_finished(State(state): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    if state.controller.playback_finished(id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CONFLICT
    }
}

/// POST /api/playback/failed/:id
pub async fn playback_failed(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(failure): Json<PlaybackFailure>,
) -> StatusCode {
    if state.controller.playback_failed(id, failure.reason).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CONFLICT
    }
}
