use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::error::ConfigError;

pub const MIN_PACE_KMH: f64 = 0.5;
pub const MAX_PACE_KMH: f64 = 50.0;
pub const PACE_STEP_KMH: f64 = 0.5;

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "Simulated walk with narrated surroundings and live questions"
)]
pub struct Config {
    /// Address the control API listens on
    #[arg(long, env = "WALKRADIO_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Initial walking pace in km/h
    #[arg(long, env = "WALKRADIO_PACE", default_value_t = 20.0)]
    pub pace: f64,

    /// Minimum seconds between ambient narration requests
    #[arg(long, env = "WALKRADIO_CADENCE_SECS", default_value_t = 20)]
    pub cadence_secs: u64,

    /// Seconds of silence after a conversation reply before narration resumes
    #[arg(long, env = "WALKRADIO_COUNTDOWN_SECS", default_value_t = 30)]
    pub countdown_secs: u32,

    /// LangFlow run endpoint used for narration and conversation replies
    #[arg(
        long,
        env = "LANGFLOW_RUN_URL",
        default_value = "http://localhost:7860/api/v1/run/walkradio"
    )]
    pub narration_url: String,

    /// Opaque session id forwarded to the narration agent
    #[arg(long, env = "WALKRADIO_SESSION_ID", default_value = "walkradio_user")]
    pub session_id: String,

    /// OSRM server used to expand route endpoints into a full path
    #[arg(long, env = "OSRM_URL", default_value = "https://router.project-osrm.org")]
    pub osrm_url: String,

    #[arg(long, env = "OSRM_PROFILE", default_value = "driving")]
    pub osrm_profile: String,

    /// OpenAI-compatible speech API base URL (e.g. https://api.openai.com/v1).
    /// Speech synthesis and transcription are disabled when unset.
    #[arg(long, env = "SPEECH_API_URL")]
    pub speech_api_url: Option<String>,

    #[arg(long, env = "SPEECH_API_KEY", hide_env_values = true)]
    pub speech_api_key: Option<String>,

    #[arg(long, env = "TTS_MODEL", default_value = "tts-1")]
    pub tts_model: String,

    #[arg(long, env = "TTS_VOICE", default_value = "nova")]
    pub tts_voice: String,

    #[arg(long, env = "STT_MODEL", default_value = "whisper-1")]
    pub stt_model: String,

    /// Played audio items kept around for replay before being released
    #[arg(long, env = "WALKRADIO_PLAYBACK_RETAIN", default_value_t = 16)]
    pub playback_retain: usize,

    /// Start the playback queue in the playing state
    #[arg(long, env = "WALKRADIO_AUTOPLAY", default_value_t = true, action = clap::ArgAction::Set)]
    pub autoplay: bool,
}

/// The part of the configuration the orchestrator core consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreConfig {
    pub pace_kmh: f64,
    pub cadence_interval: Duration,
    pub countdown_secs: u32,
    pub playback_retain: usize,
    pub autoplay: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pace_kmh: 20.0,
            cadence_interval: Duration::from_secs(20),
            countdown_secs: 30,
            playback_retain: 16,
            autoplay: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_pace(self.pace)?;
        if self.cadence_secs == 0 {
            return Err(ConfigError::Zero("cadence_secs"));
        }
        if self.countdown_secs == 0 {
            return Err(ConfigError::Zero("countdown_secs"));
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(self.bind.parse()?)
    }

    pub fn core(&self) -> CoreConfig {
        CoreConfig {
            pace_kmh: self.pace,
            cadence_interval: Duration::from_secs(self.cadence_secs),
            countdown_secs: self.countdown_secs,
            playback_retain: self.playback_retain,
            autoplay: self.autoplay,
        }
    }

    pub fn speech_enabled(&self) -> bool {
        self.speech_api_url.is_some()
    }
}

pub fn validate_pace(pace_kmh: f64) -> Result<f64, ConfigError> {
    if pace_kmh.is_finite() && (MIN_PACE_KMH..=MAX_PACE_KMH).contains(&pace_kmh) {
        Ok(pace_kmh)
    } else {
        Err(ConfigError::OutOfRange {
            name: "pace",
            value: pace_kmh,
            min: MIN_PACE_KMH,
            max: MAX_PACE_KMH,
        })
    }
}
