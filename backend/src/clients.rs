//! Narrow interfaces to the external services the orchestrator talks to, plus the
//! HTTP adapters used in production.
//!
//! - [`NarrationClient`]: the agent that describes surroundings and answers questions
//! - [`Transcriber`]: speech-to-text for recorded questions
//! - [`SpeechSynthesizer`]: text-to-speech for everything that ends up in the audio queue

use std::{io::Cursor, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{ContextLabel, Coordinate, NarrationKind};

use crate::error::ClientError;

const NO_RESPONSE_TEXT: &str = "No response from AI";

/// What the cadence controller asks the agent about.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationPrompt {
    pub coordinate: Coordinate,
    pub pace_kmh: f64,
    pub context: ContextLabel,
    /// e.g. `heading NE, turning left`; only present while walking mid-route.
    pub direction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationReply {
    pub text: String,
    pub kind: NarrationKind,
}

/// Synthesized speech ready to be queued.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Bytes,
    pub mime_type: String,
    pub duration: Duration,
}

#[async_trait]
pub trait NarrationClient: Send + Sync {
    async fn request(&self, prompt: &NarrationPrompt) -> Result<NarrationReply, ClientError>;

    async fn request_for_message(
        &self,
        message: &str,
        coordinate: Option<Coordinate>,
        pace_kmh: f64,
    ) -> Result<NarrationReply, ClientError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Returns an empty string when no speech was detected.
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> Result<String, ClientError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, ClientError>;
}

fn context_status(context: ContextLabel) -> &'static str {
    match context {
        ContextLabel::Start => "START of route",
        ContextLabel::Walking => "WALKING along route",
        ContextLabel::End => "END of route",
    }
}

pub fn narration_input(prompt: &NarrationPrompt) -> String {
    format!(
        "Current coordinates: {}, {}. Walking pace: {} km/h. Status: {}. Last direction: {}.",
        prompt.coordinate.lat,
        prompt.coordinate.lng,
        prompt.pace_kmh,
        context_status(prompt.context),
        prompt.direction.as_deref().unwrap_or(""),
    )
}

pub fn message_input(message: &str, coordinate: Option<Coordinate>, pace_kmh: f64) -> String {
    let (lat, lng) = coordinate.map_or_else(
        || ("unknown".to_string(), "unknown".to_string()),
        |c| (c.lat.to_string(), c.lng.to_string()),
    );
    format!("User message: {message}. Current coordinates: {lat}, {lng}. Walking pace: {pace_kmh} km/h.")
}

#[derive(Debug, Serialize)]
struct LangFlowRunRequest<'a> {
    input_value: String,
    output_type: &'a str,
    input_type: &'a str,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    response_type: Option<String>,
}

/// Pull the reply out of a LangFlow run response.
///
/// The agent may answer with a JSON document `{"text", "response_type"}` inside the
/// message text; anything else is taken verbatim with `fallback` as its kind.
pub fn parse_langflow_reply(body: &Value, fallback: NarrationKind) -> NarrationReply {
    let raw = body
        .pointer("/outputs/0/outputs/0/results/message/text")
        .and_then(Value::as_str);

    let Some(raw) = raw else {
        return NarrationReply {
            text: NO_RESPONSE_TEXT.to_string(),
            kind: fallback,
        };
    };

    match serde_json::from_str::<StructuredReply>(raw) {
        Ok(structured) => NarrationReply {
            text: structured
                .text
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Could not parse text from AI response.".to_string()),
            kind: if structured.response_type.as_deref() == Some("conversation") {
                NarrationKind::Conversation
            } else {
                NarrationKind::Narrative
            },
        },
        Err(_) => {
            tracing::debug!("agent reply is not structured JSON, using plain text");
            NarrationReply {
                text: raw.to_string(),
                kind: fallback,
            }
        }
    }
}

/// [`NarrationClient`] backed by a LangFlow `/api/v1/run/{flow}` endpoint.
#[derive(Debug, Clone)]
pub struct LangFlowClient {
    run_url: String,
    session_id: String,
    client: reqwest::Client,
}

impl LangFlowClient {
    pub fn new(run_url: impl Into<String>, session_id: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ClientError::AgentUnreachable(e.to_string()))?;
        Ok(Self {
            run_url: run_url.into(),
            session_id: session_id.into(),
            client,
        })
    }

    async fn run(&self, input_value: String, fallback: NarrationKind) -> Result<NarrationReply, ClientError> {
        let payload = LangFlowRunRequest {
            input_value,
            output_type: "chat",
            input_type: "chat",
            session_id: &self.session_id,
        };
        let response = self
            .client
            .post(&self.run_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClientError::AgentUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::AgentError(status.as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::AgentUnreachable(e.to_string()))?;
        Ok(parse_langflow_reply(&body, fallback))
    }
}

#[async_trait]
impl NarrationClient for LangFlowClient {
    async fn request(&self, prompt: &NarrationPrompt) -> Result<NarrationReply, ClientError> {
        tracing::debug!(context = ?prompt.context, "requesting narration");
        self.run(narration_input(prompt), NarrationKind::Narrative).await
    }

    async fn request_for_message(
        &self,
        message: &str,
        coordinate: Option<Coordinate>,
        pace_kmh: f64,
    ) -> Result<NarrationReply, ClientError> {
        tracing::debug!("requesting conversation reply");
        self.run(message_input(message, coordinate, pace_kmh), NarrationKind::Conversation)
            .await
    }
}

/// OpenAI-compatible speech endpoints (`/audio/speech`, `/audio/transcriptions`).
#[derive(Debug, Clone)]
pub struct OpenAiSpeech {
    base_url: String,
    api_key: Option<String>,
    tts_model: String,
    voice: String,
    stt_model: String,
    client: reqwest::Client,
}

impl OpenAiSpeech {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        tts_model: impl Into<String>,
        voice: impl Into<String>,
        stt_model: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ClientError::SynthesisFailed(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            tts_model: tts_model.into(),
            voice: voice.into(),
            stt_model: stt_model.into(),
            client,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Transcriber for OpenAiSpeech {
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> Result<String, ClientError> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        let extension = mime_type
            .split('/')
            .nth(1)
            .and_then(|sub| sub.split(';').next())
            .unwrap_or("webm");
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(format!("recording.{extension}"))
            .mime_str(mime_type)
            .map_err(|e| ClientError::TranscriptionFailed(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.stt_model.clone());

        let url = format!("{}/audio/transcriptions", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::TranscriptionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::TranscriptionFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ClientError::TranscriptionFailed(e.to_string()))?;
        Ok(body.text.trim().to_string())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::SynthesisFailed("nothing to say".to_string()));
        }
        let url = format!("{}/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": self.tts_model,
            "input": text,
            "voice": self.voice,
            "response_format": "wav",
        });
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::SynthesisFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::SynthesisFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::SynthesisFailed(e.to_string()))?;
        let duration = wav_duration(&bytes)?;
        Ok(SynthesizedAudio {
            bytes,
            mime_type: "audio/wav".to_string(),
            duration,
        })
    }
}

/// Read the playing time out of a WAV header.
pub fn wav_duration(bytes: &[u8]) -> Result<Duration, ClientError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| ClientError::SynthesisFailed(format!("unreadable audio: {e}")))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(ClientError::SynthesisFailed("sample rate is zero".to_string()));
    }
    let frames = reader.duration();
    Ok(Duration::from_secs_f64(f64::from(frames) / f64::from(spec.sample_rate)))
}
