use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkradio::{
    clients::{LangFlowClient, OpenAiSpeech, SpeechSynthesizer, Transcriber},
    config::Config,
    controller::{Collaborators, WalkController},
    create_router,
    playback::ClockSink,
    route_source::OsrmRouteSource,
    session::WalkSession,
    AppState,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "walkradio=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        tracing::error!("invalid configuration: {e}");
        std::process::exit(2);
    }

    let routes = OsrmRouteSource::new(&config.osrm_url, &config.osrm_profile).expect("build OSRM client");
    let narrator =
        LangFlowClient::new(&config.narration_url, &config.session_id).expect("build narration client");

    let (transcriber, synthesizer) = match &config.speech_api_url {
        Some(url) => {
            let speech = Arc::new(
                OpenAiSpeech::new(
                    url,
                    config.speech_api_key.clone(),
                    &config.tts_model,
                    &config.tts_voice,
                    &config.stt_model,
                )
                .expect("build speech client"),
            );
            tracing::info!("speech services at {url}");
            (
                Some(speech.clone() as Arc<dyn Transcriber>),
                Some(speech as Arc<dyn SpeechSynthesizer>),
            )
        }
        None => {
            tracing::warn!("SPEECH_API_URL not set: narration will be text only and recordings cannot be transcribed");
            (None, None)
        }
    };

    let session = WalkSession::new(config.core(), Box::new(ClockSink::new()), config.speech_enabled());
    let controller = WalkController::new(
        session,
        Collaborators {
            routes: Arc::new(routes),
            narrator: Arc::new(narrator),
            transcriber,
            synthesizer,
        },
    );
    controller.spawn_playback_clock().await;

    let app = create_router(AppState { controller });

    let addr = config.bind_addr().expect("valid socket address");
    tracing::info!("narration agent: {}", config.narration_url);
    tracing::info!(
        pace_kmh = config.pace,
        cadence_secs = config.cadence_secs,
        countdown_secs = config.countdown_secs,
        "starting walkradio on http://{addr}"
    );
    axum::serve(tokio::net::TcpListener::bind(addr).await.unwrap(), app)
        .await
        .unwrap();
}
