use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lng: self.lng + (other.lng - self.lng) * t,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkState {
    #[default]
    Stopped,
    Walking,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NarrationKind {
    Narrative,
    Conversation,
    UserInput,
    Loading,
}

/// Where along the route a narration request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextLabel {
    Start,
    Walking,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationEvent {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub kind: NarrationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_user_message: Option<String>,
}

/// Body of `POST /api/route`: either a routing-provider URL or an explicit pair of endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoadRouteRequest {
    Url { url: String },
    Endpoints { start: Coordinate, end: Coordinate },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSummary {
    pub point_count: usize,
    pub total_length_m: f64,
    pub start: Coordinate,
    pub end: Coordinate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaceRequest {
    pub pace_kmh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingUpload {
    pub audio_base64: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

pub fn default_mime_type() -> String {
    "audio/webm".to_string()
}

/// Result of `POST /api/conversation/recording/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingResult {
    /// The submitted question; absent when no speech was recognised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub conversation: ConversationStatus,
}

/// A client could not play the clip it fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackFailure {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStatus {
    pub active: bool,
    pub recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_remaining: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub walk_state: WalkState,
    pub pace_kmh: f64,
    pub distance_traveled_m: f64,
    pub total_length_m: f64,
    pub progress_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Coordinate>,
    pub segment_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_narration_in_secs: Option<u64>,
    pub narration_in_flight: bool,
    pub conversation: ConversationStatus,
    pub playback: PlaybackState,
    pub queued_audio: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentClip {
    pub id: u64,
    pub duration_secs: f64,
    pub mime_type: String,
    pub audio_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}
