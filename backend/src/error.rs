use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route unavailable: {0}")]
    Unavailable(String),
    #[error("a route needs at least 2 coordinates, got {0}")]
    TooShort(usize),
    #[error("unsupported route url: {0}")]
    InvalidUrl(String),
    #[error("routing provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum WalkError {
    #[error("no route loaded")]
    NoRoute,
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: shared::WalkState,
    },
    #[error("pace {0} km/h is outside [{min}, {max}]", min = crate::config::MIN_PACE_KMH, max = crate::config::MAX_PACE_KMH)]
    PaceOutOfRange(f64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("message is empty")]
    EmptyMessage,
}

/// Failures of the external narration, transcription and synthesis services.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("narration agent unreachable: {0}")]
    AgentUnreachable(String),
    #[error("narration agent returned HTTP {0}")]
    AgentError(u16),
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("audio item {0} could not be started: {1}")]
    Start(u64, String),
    #[error("audio item {0} failed during playback: {1}")]
    Interrupted(u64, String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid bind address: {0}")]
    Bind(#[from] std::net::AddrParseError),
}
