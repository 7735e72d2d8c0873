use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use shared::{CurrentClip, LoadRouteRequest, NarrationEvent, PlaybackState, RouteSummary, SessionSnapshot, WalkState};
use tokio::{sync::Mutex, task::JoinHandle, time};

use crate::clients::{NarrationClient, SpeechSynthesizer, Transcriber};
use crate::error::{ClientError, ConversationError, RouteError, WalkError};
use crate::route_source::RouteSource;
use crate::session::{Effect, WalkSession};

const TICK: Duration = Duration::from_secs(1);

/// External services the controller calls on the session's behalf.
#[derive(Clone)]
pub struct Collaborators {
    pub routes: Arc<dyn RouteSource>,
    pub narrator: Arc<dyn NarrationClient>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
}

fn now() -> Instant {
    time::Instant::now().into_std()
}

/// Drives a [`WalkSession`] on tokio timers.
///
/// The session sits behind one mutex. Position and countdown ticks run as
/// separate abortable tasks; every network call runs in its own task and
/// re-enters the session through the lock when it completes. Walk transitions
/// swap the position ticker before releasing the session lock.
#[derive(Clone)]
pub struct WalkController {
    session: Arc<Mutex<WalkSession>>,
    collaborators: Collaborators,
    position_ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    countdown_ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    playback_clock: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WalkController {
    pub fn new(session: WalkSession, collaborators: Collaborators) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            collaborators,
            position_ticker: Arc::new(Mutex::new(None)),
            countdown_ticker: Arc::new(Mutex::new(None)),
            playback_clock: Arc::new(Mutex::new(None)),
        }
    }

    pub fn speech_enabled(&self) -> bool {
        self.collaborators.synthesizer.is_some()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot(now())
    }

    pub async fn events(&self) -> Vec<NarrationEvent> {
        self.session.lock().await.events()
    }

    pub async fn load_route(&self, request: &LoadRouteRequest) -> Result<RouteSummary, RouteError> {
        let route = self.collaborators.routes.load(request).await?;
        let mut session = self.session.lock().await;
        let summary = session.load_route(route);
        cancel(&self.position_ticker).await;
        Ok(summary)
    }

    pub async fn start(&self) -> Result<SessionSnapshot, WalkError> {
        let (effects, snapshot) = {
            let mut session = self.session.lock().await;
            let effects = session.start(now())?;
            self.spawn_position_ticker().await;
            (effects, session.snapshot(now()))
        };
        self.run(effects);
        Ok(snapshot)
    }

    pub async fn pause(&self) -> Result<SessionSnapshot, WalkError> {
        let mut session = self.session.lock().await;
        session.pause()?;
        cancel(&self.position_ticker).await;
        Ok(session.snapshot(now()))
    }

    pub async fn resume(&self) -> Result<SessionSnapshot, WalkError> {
        let mut session = self.session.lock().await;
        session.resume(now())?;
        self.spawn_position_ticker().await;
        Ok(session.snapshot(now()))
    }

    pub async fn stop(&self) -> Result<SessionSnapshot, WalkError> {
        let mut session = self.session.lock().await;
        session.stop()?;
        cancel(&self.position_ticker).await;
        Ok(session.snapshot(now()))
    }

    pub async fn set_pace(&self, pace_kmh: f64) -> Result<f64, WalkError> {
        self.session.lock().await.set_pace(pace_kmh)
    }

    pub async fn nudge_pace(&self, faster: bool) -> f64 {
        self.session.lock().await.nudge_pace(faster)
    }

    pub async fn submit_message(&self, message: &str) -> Result<(), ConversationError> {
        let effects = self.session.lock().await.submit_message(message)?;
        self.run(effects);
        Ok(())
    }

    pub async fn begin_recording(&self) {
        self.session.lock().await.begin_recording();
    }

    /// Transcribe a finished recording and submit it. Returns the transcript when
    /// one was submitted.
    pub async fn complete_recording(&self, audio: Bytes, mime_type: &str) -> Option<String> {
        let transcript = match &self.collaborators.transcriber {
            Some(transcriber) => transcriber.transcribe(audio, mime_type).await,
            None => Err(ClientError::TranscriptionFailed(
                "no transcription service configured".into(),
            )),
        };
        let submitted = transcript
            .as_ref()
            .ok()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let effects = self.session.lock().await.finish_recording(transcript);
        let submitted = submitted.filter(|_| !effects.is_empty());
        self.run(effects);
        submitted
    }

    pub async fn toggle_playback(&self) -> PlaybackState {
        self.session.lock().await.toggle_playback()
    }

    pub async fn stop_playback(&self) {
        self.session.lock().await.stop_playback();
    }

    pub async fn current_clip(&self) -> Option<CurrentClip> {
        self.session.lock().await.current_clip()
    }

    pub async fn playback_finished(&self, item: u64) -> bool {
        self.session.lock().await.playback_finished(item)
    }

    pub async fn playback_failed(&self, item: u64, reason: String) -> bool {
        self.session.lock().await.playback_failed(item, reason)
    }

    /// Advance server-side playback once a second so clip durations elapse.
    pub async fn spawn_playback_clock(&self) {
        let session = self.session.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + TICK, TICK);
            loop {
                interval.tick().await;
                session.lock().await.elapse_playback(TICK);
            }
        });
        replace(&self.playback_clock, handle).await;
    }

    async fn spawn_position_ticker(&self) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + TICK, TICK);
            loop {
                interval.tick().await;
                let effects = {
                    let mut session = this.session.lock().await;
                    if session.walk_state() != WalkState::Walking {
                        break;
                    }
                    session.tick(now())
                };
                let finished = effects.contains(&Effect::WalkFinished);
                this.run(effects);
                if finished {
                    break;
                }
            }
        });
        replace(&self.position_ticker, handle).await;
    }

    async fn spawn_countdown(&self) {
        let session = self.session.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + TICK, TICK);
            loop {
                interval.tick().await;
                if !session.lock().await.tick_countdown() {
                    break;
                }
            }
        });
        replace(&self.countdown_ticker, handle).await;
    }

    /// Dispatch effects. Never blocks: each one becomes its own task.
    fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            let this = self.clone();
            match effect {
                Effect::RequestNarration(request) => {
                    tokio::spawn(async move {
                        let outcome = this.collaborators.narrator.request(&request.prompt).await;
                        let effects = this
                            .session
                            .lock()
                            .await
                            .complete_narration(now(), request.ticket, outcome);
                        this.run(effects);
                    });
                }
                Effect::RequestReply {
                    seq,
                    message,
                    coordinate,
                    pace_kmh,
                } => {
                    tokio::spawn(async move {
                        let outcome = this
                            .collaborators
                            .narrator
                            .request_for_message(&message, coordinate, pace_kmh)
                            .await;
                        let effects = this.session.lock().await.complete_reply(seq, outcome);
                        this.run(effects);
                    });
                }
                Effect::Synthesize {
                    item,
                    text,
                    priority,
                } => {
                    let Some(synthesizer) = this.collaborators.synthesizer.clone() else {
                        continue;
                    };
                    tokio::spawn(async move {
                        let outcome = synthesizer.synthesize(&text).await;
                        this.session
                            .lock()
                            .await
                            .complete_synthesis(item, priority, outcome);
                    });
                }
                Effect::StartCountdown => {
                    tokio::spawn(async move { this.spawn_countdown().await });
                }
                Effect::WalkFinished => {
                    tracing::info!("walk finished");
                }
            }
        }
    }
}

async fn replace(slot: &Mutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>) {
    if let Some(previous) = slot.lock().await.replace(handle) {
        previous.abort();
    }
}

async fn cancel(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Some(handle) = slot.lock().await.take() {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{NarrationPrompt, NarrationReply, SynthesizedAudio};
    use crate::config::CoreConfig;
    use crate::playback::ClockSink;
    use crate::route::{tests::straight_route, Route};
    use async_trait::async_trait;
    use shared::{Coordinate, NarrationKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedRoute(Route);

    #[async_trait]
    impl RouteSource for FixedRoute {
        async fn load(&self, _request: &LoadRouteRequest) -> Result<Route, RouteError> {
            Ok(self.0.clone())
        }
    }

    /// Answers after `delay`, numbering its narrations so none are duplicates.
    #[derive(Default)]
    struct SlowNarrator {
        delay: Duration,
        narrations: AtomicUsize,
    }

    impl SlowNarrator {
        async fn think(&self) {
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
        }
    }

    #[async_trait]
    impl NarrationClient for SlowNarrator {
        async fn request(&self, _prompt: &NarrationPrompt) -> Result<NarrationReply, ClientError> {
            let n = self.narrations.fetch_add(1, Ordering::SeqCst);
            self.think().await;
            Ok(NarrationReply {
                text: format!("narration {n}"),
                kind: NarrationKind::Narrative,
            })
        }

        async fn request_for_message(
            &self,
            message: &str,
            _coordinate: Option<Coordinate>,
            _pace_kmh: f64,
        ) -> Result<NarrationReply, ClientError> {
            self.think().await;
            Ok(NarrationReply {
                text: format!("about {message}"),
                kind: NarrationKind::Conversation,
            })
        }
    }

    struct SilentTranscriber;

    #[async_trait]
    impl Transcriber for SilentTranscriber {
        async fn transcribe(&self, _audio: Bytes, _mime_type: &str) -> Result<String, ClientError> {
            Ok(String::new())
        }
    }

    struct InstantVoice;

    #[async_trait]
    impl SpeechSynthesizer for InstantVoice {
        async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio, ClientError> {
            Ok(SynthesizedAudio {
                bytes: Bytes::from_static(b"RIFF"),
                mime_type: "audio/wav".into(),
                duration: Duration::from_secs(3),
            })
        }
    }

    fn controller(narrator: Arc<SlowNarrator>, route: Route) -> WalkController {
        let config = CoreConfig {
            pace_kmh: 3.6,
            cadence_interval: Duration::from_secs(10),
            countdown_secs: 20,
            playback_retain: 16,
            autoplay: true,
        };
        let session = WalkSession::new(config, Box::new(ClockSink::new()), true);
        WalkController::new(
            session,
            Collaborators {
                routes: Arc::new(FixedRoute(route)),
                narrator,
                transcriber: Some(Arc::new(SilentTranscriber)),
                synthesizer: Some(Arc::new(InstantVoice)),
            },
        )
    }

    fn endpoints() -> LoadRouteRequest {
        LoadRouteRequest::Endpoints {
            start: Coordinate::new(45.0, 5.0),
            end: Coordinate::new(45.002, 5.0),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn narration_follows_the_cadence() {
        let narrator = Arc::new(SlowNarrator {
            delay: Duration::from_millis(500),
            ..Default::default()
        });
        let controller = controller(narrator.clone(), straight_route(3, 100.0));
        controller.load_route(&endpoints()).await.unwrap();
        controller.start().await.unwrap();
        settle().await;
        assert_eq!(narrator.narrations.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(9_500)).await;
        settle().await;
        assert_eq!(narrator.narrations.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(1_200)).await;
        settle().await;
        assert_eq!(narrator.narrations.load(Ordering::SeqCst), 2);

        let events = controller.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "narration 1");
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.walk_state, WalkState::Walking);
        assert!(snapshot.distance_traveled_m >= 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn question_suspends_narration_until_countdown_ends() {
        let narrator = Arc::new(SlowNarrator {
            delay: Duration::from_secs(2),
            ..Default::default()
        });
        let controller = controller(narrator.clone(), straight_route(3, 100.0));
        controller.load_route(&endpoints()).await.unwrap();
        controller.start().await.unwrap();

        time::sleep(Duration::from_millis(5_500)).await;
        controller.submit_message("What's that building?").await.unwrap();
        settle().await;
        assert!(controller.snapshot().await.conversation.active);

        // reply lands ~2s later, then 20s of countdown
        time::sleep(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(narrator.narrations.load(Ordering::SeqCst), 1);
        let status = controller.snapshot().await.conversation;
        assert!(status.countdown_remaining.is_some());

        time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert!(!controller.snapshot().await.conversation.active);
        assert_eq!(narrator.narrations.load(Ordering::SeqCst), 2);

        let kinds: Vec<_> = controller.events().await.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&NarrationKind::Conversation));
        assert!(!kinds.contains(&NarrationKind::Loading));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_ticks_and_resume_continues() {
        let narrator = Arc::new(SlowNarrator::default());
        let controller = controller(narrator, straight_route(3, 100.0));
        controller.load_route(&endpoints()).await.unwrap();
        controller.start().await.unwrap();

        time::sleep(Duration::from_millis(3_500)).await;
        controller.pause().await.unwrap();
        let paused_at = controller.snapshot().await.distance_traveled_m;
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(controller.snapshot().await.distance_traveled_m, paused_at);

        controller.resume().await.unwrap();
        time::sleep(Duration::from_millis(2_500)).await;
        assert!(controller.snapshot().await.distance_traveled_m > paused_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_pause_and_resume_never_strand_the_walk() {
        let controller = controller(Arc::new(SlowNarrator::default()), straight_route(3, 100.0));
        controller.load_route(&endpoints()).await.unwrap();
        controller.start().await.unwrap();

        for round in 0..8 {
            let (pausing, resuming) = (controller.clone(), controller.clone());
            let pause = tokio::spawn(async move { pausing.pause().await });
            let resume = tokio::spawn(async move { resuming.resume().await });
            let _ = tokio::join!(pause, resume);

            let before = controller.snapshot().await;
            if before.walk_state != WalkState::Walking {
                continue;
            }
            time::sleep(Duration::from_millis(1_400)).await;
            let after = controller.snapshot().await;
            assert_eq!(after.walk_state, WalkState::Walking);
            assert!(
                after.distance_traveled_m > before.distance_traveled_m,
                "walk stalled in round {round}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn walk_ends_at_the_last_coordinate() {
        let narrator = Arc::new(SlowNarrator::default());
        let route = straight_route(2, 5.0);
        let end = route.end();
        let controller = controller(narrator, route);
        controller.load_route(&endpoints()).await.unwrap();
        controller.start().await.unwrap();

        time::sleep(Duration::from_secs(8)).await;
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.walk_state, WalkState::Stopped);
        assert_eq!(snapshot.position, Some(end));
        assert_eq!(snapshot.progress_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_recording_returns_to_idle() {
        let narrator = Arc::new(SlowNarrator::default());
        let controller = controller(narrator, straight_route(3, 100.0));
        controller.begin_recording().await;
        assert!(controller.snapshot().await.conversation.recording);

        let submitted = controller
            .complete_recording(Bytes::from_static(b"...."), "audio/webm")
            .await;
        assert_eq!(submitted, None);
        assert!(!controller.snapshot().await.conversation.active);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_narration_reaches_the_audio_queue() {
        let narrator = Arc::new(SlowNarrator::default());
        let controller = controller(narrator, straight_route(3, 100.0));
        controller.load_route(&endpoints()).await.unwrap();
        controller.start().await.unwrap();
        settle().await;

        let clip = controller.current_clip().await.expect("narration is sounding");
        assert_eq!(clip.duration_secs, 3.0);
        assert!(controller.playback_finished(clip.id).await);
        assert_eq!(controller.toggle_playback().await, PlaybackState::Paused);
    }
}
