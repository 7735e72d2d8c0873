use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{
    Coordinate, CurrentClip, NarrationEvent, NarrationKind, PlaybackState, RouteSummary,
    SessionSnapshot, WalkState,
};

use crate::cadence::{CadenceController, CadenceInput, NarrationRequest, NarrationTicket, NarrationVerdict};
use crate::clients::{NarrationReply, SynthesizedAudio};
use crate::config::{CoreConfig, PACE_STEP_KMH};
use crate::conversation::{ConversationSession, Resolution};
use crate::error::{ClientError, ConversationError, PlaybackError, WalkError};
use crate::feed::{EventId, NarrationFeed};
use crate::playback::{AudioPlaybackQueue, AudioSink};
use crate::route::Route;
use crate::simulator::{PositionSimulator, Tick};

const LOADING_TEXT: &str = "Thinking...";

/// Work the session needs done outside its lock.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RequestNarration(NarrationRequest),
    RequestReply {
        seq: u64,
        message: String,
        coordinate: Option<Coordinate>,
        pace_kmh: f64,
    },
    /// Speak the feed entry `item`; conversation replies jump the queue.
    Synthesize {
        item: EventId,
        text: String,
        priority: bool,
    },
    /// A reply landed; start (or restart) the one-second countdown ticker.
    StartCountdown,
    /// The walker reached the end of the route.
    WalkFinished,
}

#[derive(Debug)]
struct PendingReply {
    seq: u64,
    placeholder: EventId,
    message: String,
}

/// Everything one walk owns: position, cadence, conversation, feed and audio.
///
/// Methods are synchronous and take the current instant so the whole aggregate
/// can be driven by a test clock. Network work is returned as [`Effect`]s.
pub struct WalkSession {
    simulator: PositionSimulator,
    cadence: CadenceController,
    conversation: ConversationSession,
    feed: NarrationFeed,
    playback: AudioPlaybackQueue<Box<dyn AudioSink>>,
    pending_reply: Option<PendingReply>,
    speech: bool,
}

impl WalkSession {
    pub fn new(config: CoreConfig, sink: Box<dyn AudioSink>, speech: bool) -> Self {
        Self {
            simulator: PositionSimulator::new(config.pace_kmh),
            cadence: CadenceController::new(config.cadence_interval),
            conversation: ConversationSession::new(config.countdown_secs),
            feed: NarrationFeed::new(),
            playback: AudioPlaybackQueue::new(sink, config.autoplay, config.playback_retain),
            pending_reply: None,
            speech,
        }
    }

    pub fn walk_state(&self) -> WalkState {
        self.simulator.state()
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.simulator.route()
    }

    pub fn feed(&self) -> &NarrationFeed {
        &self.feed
    }

    pub fn conversation(&self) -> &ConversationSession {
        &self.conversation
    }

    pub fn cadence(&self) -> &CadenceController {
        &self.cadence
    }

    pub fn playback(&self) -> &AudioPlaybackQueue<Box<dyn AudioSink>> {
        &self.playback
    }

    pub fn events(&self) -> Vec<NarrationEvent> {
        self.feed.snapshot()
    }

    /// Swap in a new route. A walk in progress ends and narration still in flight
    /// for the old route is discarded when it lands.
    pub fn load_route(&mut self, route: Route) -> RouteSummary {
        let summary = route.summary();
        self.simulator.load_route(Arc::new(route));
        self.cadence.retire_walk();
        tracing::info!(
            points = summary.point_count,
            total_m = summary.total_length_m,
            "route loaded"
        );
        summary
    }

    pub fn start(&mut self, now: Instant) -> Result<Vec<Effect>, WalkError> {
        self.simulator.start()?;
        self.feed.clear();
        self.cadence.begin_walk(now);
        Ok(self.poll_cadence(now).into_iter().collect())
    }

    pub fn pause(&mut self) -> Result<(), WalkError> {
        self.simulator.pause()?;
        self.cadence.halt();
        Ok(())
    }

    pub fn resume(&mut self, now: Instant) -> Result<(), WalkError> {
        self.simulator.resume()?;
        self.cadence.resume(now);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), WalkError> {
        self.simulator.stop()?;
        self.cadence.halt();
        Ok(())
    }

    pub fn set_pace(&mut self, pace_kmh: f64) -> Result<f64, WalkError> {
        self.simulator.set_pace(pace_kmh)?;
        tracing::info!(pace_kmh, "pace changed");
        Ok(pace_kmh)
    }

    /// One step of the pace buttons, up or down.
    pub fn nudge_pace(&mut self, faster: bool) -> f64 {
        let delta = if faster { PACE_STEP_KMH } else { -PACE_STEP_KMH };
        let pace = self.simulator.nudge_pace(delta);
        tracing::info!(pace_kmh = pace, "pace nudged");
        pace
    }

    /// One-second position tick.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        match self.simulator.tick() {
            Tick::Idle => Vec::new(),
            Tick::Moved(_) => self.poll_cadence(now).into_iter().collect(),
            Tick::Finished(_) => {
                self.cadence.halt();
                vec![Effect::WalkFinished]
            }
        }
    }

    fn poll_cadence(&mut self, now: Instant) -> Option<Effect> {
        if self.simulator.state() != WalkState::Walking {
            return None;
        }
        let route = self.simulator.route()?;
        let position = self.simulator.position()?;
        let input = CadenceInput {
            route,
            position,
            progress: self.simulator.progress(),
            pace_kmh: self.simulator.pace_kmh(),
            conversation_active: self.conversation.is_active(),
            interrupt_generation: self.conversation.interrupt_generation(),
        };
        self.cadence.poll(now, input).map(Effect::RequestNarration)
    }

    pub fn complete_narration(
        &mut self,
        now: Instant,
        ticket: NarrationTicket,
        outcome: Result<NarrationReply, ClientError>,
    ) -> Vec<Effect> {
        let verdict = self
            .cadence
            .complete(now, ticket, outcome, self.conversation.interrupt_generation());
        let mut effects = Vec::new();
        match verdict {
            NarrationVerdict::Accept(reply) => {
                let item = self.feed.push(reply.kind, reply.text.clone(), None);
                if self.speech {
                    effects.push(Effect::Synthesize {
                        item,
                        text: reply.text,
                        priority: false,
                    });
                }
            }
            NarrationVerdict::Failed(message) => {
                self.feed.push(NarrationKind::Narrative, message, None);
            }
            NarrationVerdict::Duplicate | NarrationVerdict::Stale => {}
        }
        // a Start that arrived while this request was out fires now
        effects.extend(self.poll_cadence(now));
        effects
    }

    /// A typed question, or a finished transcription.
    pub fn submit_message(&mut self, message: &str) -> Result<Vec<Effect>, ConversationError> {
        let message = message.trim();
        let submission = self.conversation.submit(message)?;

        if let Some(superseded) = self.pending_reply.take() {
            self.feed.remove(superseded.placeholder);
            tracing::debug!(seq = superseded.seq, "superseded reply placeholder removed");
        }
        self.feed
            .push(NarrationKind::UserInput, message, Some(message.to_string()));
        let placeholder = self.feed.push(NarrationKind::Loading, LOADING_TEXT, None);
        self.pending_reply = Some(PendingReply {
            seq: submission.seq,
            placeholder,
            message: message.to_string(),
        });

        Ok(vec![Effect::RequestReply {
            seq: submission.seq,
            message: message.to_string(),
            coordinate: self.simulator.position().map(|p| p.coordinate),
            pace_kmh: self.simulator.pace_kmh(),
        }])
    }

    pub fn complete_reply(&mut self, seq: u64, outcome: Result<NarrationReply, ClientError>) -> Vec<Effect> {
        let resolution = self.conversation.resolve(seq);
        if resolution == Resolution::Superseded {
            return Vec::new();
        }
        let Some(pending) = self.pending_reply.take_if(|pending| pending.seq == seq) else {
            return Vec::new();
        };

        let (text, speak) = match outcome {
            Ok(reply) => (reply.text, true),
            Err(err) => {
                tracing::warn!(seq, error = %err, "conversation reply failed");
                (
                    format!("Error: {err} - make sure the narration agent is reachable"),
                    false,
                )
            }
        };
        let related = Some(pending.message);
        let item = match self.feed.replace(
            pending.placeholder,
            NarrationKind::Conversation,
            text.clone(),
            related.clone(),
        ) {
            Some(item) => item,
            None => self.feed.push(NarrationKind::Conversation, text.clone(), related),
        };

        let mut effects = Vec::new();
        if speak && self.speech {
            effects.push(Effect::Synthesize {
                item,
                text,
                priority: true,
            });
        }
        if resolution == Resolution::Countdown && self.conversation.countdown_remaining().is_some() {
            effects.push(Effect::StartCountdown);
        }
        effects
    }

    /// Returns whether the countdown is still running afterwards.
    pub fn tick_countdown(&mut self) -> bool {
        self.conversation.tick_countdown();
        self.conversation.countdown_remaining().is_some()
    }

    pub fn begin_recording(&mut self) {
        self.conversation.begin_recording();
    }

    pub fn finish_recording(&mut self, transcript: Result<String, ClientError>) -> Vec<Effect> {
        let text = match transcript {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "transcription failed");
                self.conversation.abandon_recording();
                return Vec::new();
            }
        };
        match self.submit_message(&text) {
            Ok(effects) => effects,
            Err(err) => {
                tracing::info!(error = %err, "transcript not submitted");
                self.conversation.abandon_recording();
                Vec::new()
            }
        }
    }

    pub fn complete_synthesis(
        &mut self,
        item: EventId,
        priority: bool,
        outcome: Result<SynthesizedAudio, ClientError>,
    ) {
        let audio = match outcome {
            Ok(audio) => audio,
            Err(err) => {
                tracing::warn!(item, error = %err, "no audio for feed entry");
                return;
            }
        };
        if self.feed.get(item).is_none() {
            tracing::debug!(item, "feed entry gone, dropping its audio");
            return;
        }
        if priority {
            self.playback.enqueue_priority(item, audio);
        } else {
            self.playback.enqueue(item, audio);
        }
    }

    pub fn toggle_playback(&mut self) -> PlaybackState {
        self.playback.toggle()
    }

    pub fn stop_playback(&mut self) {
        self.playback.stop();
    }

    pub fn playback_finished(&mut self, item: EventId) -> bool {
        self.playback.on_finished(item)
    }

    pub fn playback_failed(&mut self, item: EventId, reason: String) -> bool {
        self.playback.on_error(PlaybackError::Interrupted(item, reason))
    }

    pub fn elapse_playback(&mut self, elapsed: Duration) {
        self.playback.elapse(elapsed);
    }

    pub fn current_clip(&self) -> Option<CurrentClip> {
        let (id, audio) = self.playback.current_audio()?;
        Some(CurrentClip {
            id,
            duration_secs: audio.duration.as_secs_f64(),
            mime_type: audio.mime_type.clone(),
            audio_base64: STANDARD.encode(&audio.bytes),
        })
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let total = self.route().map_or(0.0, |route| route.total_length_m());
        let position = self.simulator.position();
        SessionSnapshot {
            walk_state: self.simulator.state(),
            pace_kmh: self.simulator.pace_kmh(),
            distance_traveled_m: self.simulator.distance_m().min(total),
            total_length_m: total,
            progress_percent: self.simulator.progress() * 100.0,
            position: position.map(|p| p.coordinate),
            segment_index: position.map_or(0, |p| p.segment_index),
            next_narration_in_secs: if self.conversation.is_active() {
                None
            } else {
                self.cadence.seconds_until_next(now)
            },
            narration_in_flight: self.cadence.in_flight(),
            conversation: self.conversation.status(),
            playback: self.playback.state(),
            queued_audio: self.playback.unplayed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::tests::clip;
    use crate::playback::ClockSink;
    use crate::route::tests::straight_route;
    use shared::ContextLabel;

    fn config(cadence: u64, countdown: u32) -> CoreConfig {
        CoreConfig {
            pace_kmh: 3.6,
            cadence_interval: Duration::from_secs(cadence),
            countdown_secs: countdown,
            playback_retain: 16,
            autoplay: true,
        }
    }

    fn session(cadence: u64, countdown: u32) -> WalkSession {
        let mut session = WalkSession::new(config(cadence, countdown), Box::new(ClockSink::new()), true);
        session.load_route(straight_route(3, 100.0));
        session
    }

    fn reply(text: &str, kind: NarrationKind) -> NarrationReply {
        NarrationReply {
            text: text.to_string(),
            kind,
        }
    }

    fn narration(effects: &[Effect]) -> Option<&NarrationRequest> {
        effects.iter().find_map(|effect| match effect {
            Effect::RequestNarration(request) => Some(request),
            _ => None,
        })
    }

    fn reply_seq(effects: &[Effect]) -> u64 {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::RequestReply { seq, .. } => Some(*seq),
                _ => None,
            })
            .expect("reply requested")
    }

    #[test]
    fn start_fires_immediately_with_start_context() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let effects = session.start(t0).unwrap();
        let request = narration(&effects).expect("immediate fire");
        assert_eq!(request.prompt.context, ContextLabel::Start);
    }

    #[test]
    fn start_without_route_is_rejected() {
        let mut session = WalkSession::new(CoreConfig::default(), Box::new(ClockSink::new()), false);
        assert_eq!(session.start(Instant::now()), Err(WalkError::NoRoute));
    }

    #[test]
    fn accepted_narration_is_logged_and_spoken() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let effects = session.start(t0).unwrap();
        let ticket = narration(&effects).unwrap().ticket;

        let effects = session.complete_narration(t0, ticket, Ok(reply("A quiet square.", NarrationKind::Narrative)));
        assert_eq!(session.feed().len(), 1);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Synthesize { priority: false, .. }]
        ));
    }

    #[test]
    fn duplicate_narration_leaves_log_unchanged() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let first = narration(&session.start(t0).unwrap()).unwrap().ticket;
        session.complete_narration(t0, first, Ok(reply("same", NarrationKind::Narrative)));

        let mut second = None;
        for s in 1..=10 {
            let effects = session.tick(t0 + Duration::from_secs(s));
            if let Some(request) = narration(&effects) {
                second = Some(request.ticket);
            }
        }
        let second = second.expect("fired at t=10");
        let effects = session.complete_narration(
            t0 + Duration::from_secs(10),
            second,
            Ok(reply("same", NarrationKind::Narrative)),
        );
        assert!(effects.is_empty());
        assert_eq!(session.feed().len(), 1);
    }

    #[test]
    fn agent_failure_becomes_an_error_entry() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let ticket = narration(&session.start(t0).unwrap()).unwrap().ticket;
        session.complete_narration(t0, ticket, Err(ClientError::AgentError(500)));

        let events = session.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, NarrationKind::Narrative);
        assert!(events[0].message.starts_with("Error: "));
        assert!(!session.cadence().in_flight());
    }

    #[test]
    fn question_interrupts_narration_and_countdown_hands_back() {
        // cadence 10s, countdown 20s, question at t=5, reply at t=7
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let at = |s: u64| t0 + Duration::from_secs(s);

        let start = narration(&session.start(t0).unwrap()).unwrap().ticket;
        session.complete_narration(at(1), start, Ok(reply("Welcome.", NarrationKind::Narrative)));

        let mut fires = Vec::new();
        for s in 1..=4 {
            if narration(&session.tick(at(s))).is_some() {
                fires.push(s);
            }
        }
        let effects = session.submit_message("What's that building?").unwrap();
        let seq = reply_seq(&effects);
        for s in 5..=6 {
            if narration(&session.tick(at(s))).is_some() {
                fires.push(s);
            }
        }
        let effects = session.complete_reply(seq, Ok(reply("The old town hall.", NarrationKind::Conversation)));
        assert!(effects.contains(&Effect::StartCountdown));

        let mut released_at = None;
        for s in 7..=40 {
            if session.conversation().is_active() && !session.tick_countdown() {
                released_at = Some(s);
            }
            if narration(&session.tick(at(s))).is_some() {
                fires.push(s);
            }
        }
        assert_eq!(released_at, Some(26));
        assert_eq!(fires, [26]);
    }

    #[test]
    fn narration_issued_before_a_question_is_discarded() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let ticket = narration(&session.start(t0).unwrap()).unwrap().ticket;

        session.submit_message("Where am I?").unwrap();
        let before = session.feed().len();
        let effects = session.complete_narration(
            t0 + Duration::from_secs(2),
            ticket,
            Ok(reply("Late narration.", NarrationKind::Narrative)),
        );
        assert!(effects.is_empty());
        assert_eq!(session.feed().len(), before);
        assert!(session.playback().is_empty());
    }

    #[test]
    fn reply_takes_the_placeholder_slot() {
        let mut session = session(10, 20);
        let seq = reply_seq(&session.submit_message("  Is it far?  ").unwrap());
        let kinds: Vec<_> = session.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [NarrationKind::Loading, NarrationKind::UserInput]);

        session.complete_reply(seq, Ok(reply("Ten minutes.", NarrationKind::Conversation)));
        let events = session.events();
        assert_eq!(events[0].kind, NarrationKind::Conversation);
        assert_eq!(events[0].related_user_message.as_deref(), Some("Is it far?"));
        assert_eq!(events[1].message, "Is it far?");
    }

    #[test]
    fn superseded_reply_is_dropped_with_its_placeholder() {
        let mut session = session(10, 20);
        let first = reply_seq(&session.submit_message("one").unwrap());
        let second = reply_seq(&session.submit_message("two").unwrap());

        assert!(session.complete_reply(first, Ok(reply("for one", NarrationKind::Conversation))).is_empty());
        let loading = session
            .events()
            .iter()
            .filter(|e| e.kind == NarrationKind::Loading)
            .count();
        assert_eq!(loading, 1);

        session.complete_reply(second, Ok(reply("for two", NarrationKind::Conversation)));
        let messages: Vec<_> = session.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["for two", "two", "one"]);
    }

    #[test]
    fn failed_reply_still_counts_down() {
        let mut session = session(10, 3);
        let seq = reply_seq(&session.submit_message("hello?").unwrap());
        let effects = session.complete_reply(seq, Err(ClientError::AgentUnreachable("refused".into())));
        assert_eq!(effects, [Effect::StartCountdown]);
        assert!(session.events()[0].message.contains("make sure the narration agent is reachable"));
        assert!(session.tick_countdown());
        assert!(session.tick_countdown());
        assert!(!session.tick_countdown());
        assert!(!session.conversation().is_active());
    }

    #[test]
    fn recording_blocks_narration_until_transcript_arrives() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        session.begin_recording();
        assert!(narration(&session.start(t0).unwrap()).is_none());

        let effects = session.finish_recording(Ok("what river is this".into()));
        assert_eq!(reply_seq(&effects), 1);
    }

    #[test]
    fn empty_transcript_returns_to_idle_without_a_message() {
        let mut session = session(10, 20);
        session.begin_recording();
        assert!(session.finish_recording(Ok("   ".into())).is_empty());
        assert!(!session.conversation().is_active());
        assert!(session.feed().is_empty());

        session.begin_recording();
        assert!(session
            .finish_recording(Err(ClientError::TranscriptionFailed("HTTP 500".into())))
            .is_empty());
        assert!(!session.conversation().is_active());
    }

    #[test]
    fn rejected_transcript_never_leaves_recording_stuck() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        session.start(t0).unwrap();
        session.begin_recording();
        assert!(session.conversation().is_recording());

        assert!(session.finish_recording(Ok("\u{3000}\n".into())).is_empty());
        assert!(!session.conversation().is_recording());
        assert!(!session.conversation().is_active());
        assert!(session.feed().is_empty());
    }

    #[test]
    fn narration_for_a_replaced_route_is_discarded() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let ticket = narration(&session.start(t0).unwrap()).unwrap().ticket;

        session.load_route(straight_route(4, 50.0));
        let effects = session.complete_narration(
            t0 + Duration::from_secs(1),
            ticket,
            Ok(reply("Still on the old street.", NarrationKind::Narrative)),
        );
        assert!(effects.is_empty());
        assert!(session.feed().is_empty());
        assert!(session.playback().is_empty());
        assert!(!session.cadence().in_flight());

        let restarted = session.start(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(narration(&restarted).map(|r| r.prompt.context), Some(ContextLabel::Start));
    }

    #[test]
    fn conversation_audio_plays_before_queued_narration() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let ticket = narration(&session.start(t0).unwrap()).unwrap().ticket;
        session.complete_narration(t0, ticket, Ok(reply("first", NarrationKind::Narrative)));
        let first = session.events()[0].id;
        session.complete_synthesis(first, false, Ok(clip(5)));

        for s in 1..=10 {
            for effect in session.tick(t0 + Duration::from_secs(s)) {
                if let Effect::RequestNarration(request) = effect {
                    session.complete_narration(
                        t0 + Duration::from_secs(s),
                        request.ticket,
                        Ok(reply("second", NarrationKind::Narrative)),
                    );
                }
            }
        }
        let second = session.events()[0].id;
        session.complete_synthesis(second, false, Ok(clip(5)));

        let seq = reply_seq(&session.submit_message("question").unwrap());
        session.complete_reply(seq, Ok(reply("answer", NarrationKind::Conversation)));
        let answer = session.events()[0].id;
        session.complete_synthesis(answer, true, Ok(clip(5)));

        assert_eq!(session.playback().current(), Some(first));
        session.elapse_playback(Duration::from_secs(5));
        assert_eq!(session.playback().current(), Some(answer));
        session.elapse_playback(Duration::from_secs(5));
        assert_eq!(session.playback().current(), Some(second));
    }

    #[test]
    fn restart_clears_feed_and_drops_late_audio() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let ticket = narration(&session.start(t0).unwrap()).unwrap().ticket;
        session.complete_narration(t0, ticket, Ok(reply("hi", NarrationKind::Narrative)));
        let item = session.events()[0].id;

        session.stop().unwrap();
        session.start(t0 + Duration::from_secs(1)).unwrap();
        assert!(session.feed().is_empty());

        session.complete_synthesis(item, false, Ok(clip(1)));
        assert!(session.playback().is_empty());
    }

    #[test]
    fn finishing_the_route_halts_cadence() {
        let mut session = WalkSession::new(config(10, 20), Box::new(ClockSink::new()), false);
        session.load_route(straight_route(2, 15.0));
        session.set_pace(36.0).unwrap();
        let t0 = Instant::now();
        session.start(t0).unwrap();

        assert!(!session.tick(t0 + Duration::from_secs(1)).contains(&Effect::WalkFinished));
        assert_eq!(session.tick(t0 + Duration::from_secs(2)), [Effect::WalkFinished]);
        assert_eq!(session.walk_state(), WalkState::Stopped);
        assert_eq!(session.snapshot(t0).next_narration_in_secs, None);
        assert_eq!(session.snapshot(t0).progress_percent, 100.0);
    }

    #[test]
    fn snapshot_reports_position_and_timers() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let ticket = narration(&session.start(t0).unwrap()).unwrap().ticket;
        session.complete_narration(t0, ticket, Ok(reply("hi", NarrationKind::Narrative)));
        for s in 1..=4 {
            session.tick(t0 + Duration::from_secs(s));
        }
        let snapshot = session.snapshot(t0 + Duration::from_secs(4));
        assert_eq!(snapshot.walk_state, WalkState::Walking);
        assert!((snapshot.distance_traveled_m - 4.0).abs() < 1e-9);
        assert_eq!(snapshot.total_length_m.round(), 200.0);
        assert_eq!(snapshot.next_narration_in_secs, Some(6));
        assert!(!snapshot.narration_in_flight);
        assert_eq!(snapshot.playback, PlaybackState::Playing);
    }

    #[test]
    fn current_clip_is_base64_encoded() {
        let mut session = session(10, 20);
        let t0 = Instant::now();
        let ticket = narration(&session.start(t0).unwrap()).unwrap().ticket;
        session.complete_narration(t0, ticket, Ok(reply("hi", NarrationKind::Narrative)));
        let item = session.events()[0].id;
        session.complete_synthesis(item, false, Ok(clip(2)));

        let current = session.current_clip().expect("sounding");
        assert_eq!(current.id, item);
        assert_eq!(current.audio_base64, "UklGRg==");
        assert_eq!(current.duration_secs, 2.0);
    }

    #[test]
    fn nudges_step_half_a_kilometre() {
        let mut session = session(10, 20);
        session.set_pace(20.0).unwrap();
        assert_eq!(session.nudge_pace(true), 20.5);
        assert_eq!(session.nudge_pace(false), 20.0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use proptest::test_runner::TestCaseError;

        const CADENCE_SECS: u64 = 5;

        #[derive(Debug, Clone, Copy)]
        enum Answer {
            Fresh,
            Repeat,
            Fail,
        }

        #[derive(Debug, Clone, Copy)]
        enum Step {
            Tick,
            Narrated(Answer),
            Ask,
            Answered,
            Record,
            Countdown,
        }

        fn step() -> impl Strategy<Value = Step> {
            let answer = prop_oneof![Just(Answer::Fresh), Just(Answer::Repeat), Just(Answer::Fail)];
            prop_oneof![
                4 => Just(Step::Tick),
                2 => answer.prop_map(Step::Narrated),
                1 => Just(Step::Ask),
                1 => Just(Step::Answered),
                1 => Just(Step::Record),
                2 => Just(Step::Countdown),
            ]
        }

        /// Walks a session through `steps`, completing requests in the order they
        /// were issued, and checks the cadence after every step.
        fn drive(steps: &[Step]) -> Result<(), TestCaseError> {
            let mut session =
                WalkSession::new(config(CADENCE_SECS, 3), Box::new(ClockSink::new()), false);
            session.load_route(straight_route(3, 100.0));
            let t0 = Instant::now();
            let mut clock = 0u64;
            let mut outstanding: Vec<NarrationTicket> = Vec::new();
            let mut replies: Vec<u64> = Vec::new();
            let mut fires: Vec<u64> = Vec::new();
            let mut fresh = 0u32;

            let effects = session.start(t0).map_err(|e| TestCaseError::fail(e.to_string()))?;
            check(&session, &effects, clock, &mut outstanding, &mut replies, &mut fires)?;

            for step in steps {
                let now = t0 + Duration::from_secs(clock);
                let effects = match *step {
                    Step::Tick => {
                        clock += 1;
                        session.tick(t0 + Duration::from_secs(clock))
                    }
                    Step::Narrated(answer) => {
                        if outstanding.is_empty() {
                            Vec::new()
                        } else {
                            let ticket = outstanding.remove(0);
                            let outcome = match answer {
                                Answer::Fresh => {
                                    fresh += 1;
                                    Ok(reply(&format!("sight {fresh}"), NarrationKind::Narrative))
                                }
                                Answer::Repeat => Ok(reply("the same view", NarrationKind::Narrative)),
                                Answer::Fail => Err(ClientError::AgentError(503)),
                            };
                            session.complete_narration(now, ticket, outcome)
                        }
                    }
                    Step::Ask => session
                        .submit_message("what is that?")
                        .map_err(|e| TestCaseError::fail(e.to_string()))?,
                    Step::Answered => {
                        if replies.is_empty() {
                            Vec::new()
                        } else {
                            let seq = replies.remove(0);
                            session.complete_reply(seq, Ok(reply("an answer", NarrationKind::Conversation)))
                        }
                    }
                    Step::Record => {
                        session.begin_recording();
                        Vec::new()
                    }
                    Step::Countdown => {
                        session.tick_countdown();
                        Vec::new()
                    }
                };
                check(&session, &effects, clock, &mut outstanding, &mut replies, &mut fires)?;
            }
            Ok(())
        }

        fn check(
            session: &WalkSession,
            effects: &[Effect],
            clock: u64,
            outstanding: &mut Vec<NarrationTicket>,
            replies: &mut Vec<u64>,
            fires: &mut Vec<u64>,
        ) -> Result<(), TestCaseError> {
            for effect in effects {
                match effect {
                    Effect::RequestNarration(request) => {
                        prop_assert!(outstanding.is_empty(), "second narration request at t={clock}");
                        prop_assert!(
                            !session.conversation().is_active(),
                            "narration requested during a conversation at t={clock}"
                        );
                        if let Some(&last) = fires.last() {
                            prop_assert!(
                                clock - last >= CADENCE_SECS,
                                "fires at t={last} and t={clock}"
                            );
                        }
                        fires.push(clock);
                        outstanding.push(request.ticket);
                    }
                    Effect::RequestReply { seq, .. } => replies.push(*seq),
                    _ => {}
                }
            }
            prop_assert_eq!(session.cadence().in_flight(), !outstanding.is_empty());
            Ok(())
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(128))]

            #[test]
            fn prop_cadence_holds_under_any_interleaving(
                steps in prop::collection::vec(step(), 1..160),
            ) {
                drive(&steps)?;
            }
        }
    }
}
