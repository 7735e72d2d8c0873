use shared::ConversationStatus;

use crate::error::ConversationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    Idle,
    /// The user is recording a spoken question; no transcript yet.
    Recording,
    /// Waiting for the agent's reply to submission `seq`.
    Pending { seq: u64 },
    /// Reply delivered; narration resumes when `remaining` reaches zero.
    CountingDown { remaining: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub seq: u64,
    /// The earlier submission whose reply will now be discarded, if one was outstanding.
    pub superseded: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Latest reply; the resume countdown has been armed.
    Countdown,
    /// Latest reply, but the user has started recording again so no countdown runs.
    Displayed,
    /// A newer message was submitted meanwhile; drop this reply.
    Superseded,
}

/// Interrupt coordinator between the user's live questions and ambient narration.
///
/// Any phase other than `Idle` suspends narration. Every entry into an active phase
/// bumps [`ConversationSession::interrupt_generation`], which lets narration
/// responses issued earlier detect that they were overtaken.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    phase: ConversationPhase,
    countdown_secs: u32,
    latest_seq: u64,
    interrupts: u64,
}

impl ConversationSession {
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            phase: ConversationPhase::Idle,
            countdown_secs,
            latest_seq: 0,
            interrupts: 0,
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != ConversationPhase::Idle
    }

    pub fn is_recording(&self) -> bool {
        self.phase == ConversationPhase::Recording
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        match self.phase {
            ConversationPhase::CountingDown { remaining } => Some(remaining),
            _ => None,
        }
    }

    pub fn interrupt_generation(&self) -> u64 {
        self.interrupts
    }

    pub fn latest_seq(&self) -> u64 {
        self.latest_seq
    }

    fn pending_seq(&self) -> Option<u64> {
        match self.phase {
            ConversationPhase::Pending { seq } => Some(seq),
            _ => None,
        }
    }

    /// Enter the active state as soon as the microphone opens, before any transcript exists.
    pub fn begin_recording(&mut self) {
        self.interrupts += 1;
        self.phase = ConversationPhase::Recording;
        tracing::info!(generation = self.interrupts, "conversation recording started");
    }

    /// Transcription produced nothing usable. Returns to `Idle` only if still recording.
    pub fn abandon_recording(&mut self) -> bool {
        if self.phase != ConversationPhase::Recording {
            return false;
        }
        self.phase = ConversationPhase::Idle;
        tracing::info!("recording produced no message, conversation idle");
        true
    }

    pub fn submit(&mut self, message: &str) -> Result<Submission, ConversationError> {
        if message.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }
        let superseded = self.pending_seq();
        self.latest_seq += 1;
        self.interrupts += 1;
        self.phase = ConversationPhase::Pending {
            seq: self.latest_seq,
        };
        tracing::info!(
            seq = self.latest_seq,
            superseded = ?superseded,
            "conversation message submitted"
        );
        Ok(Submission {
            seq: self.latest_seq,
            superseded,
        })
    }

    /// Record that the reply (or failure) for submission `seq` arrived.
    pub fn resolve(&mut self, seq: u64) -> Resolution {
        if seq != self.latest_seq {
            tracing::debug!(seq, latest = self.latest_seq, "discarding superseded reply");
            return Resolution::Superseded;
        }
        match self.phase {
            ConversationPhase::Pending { seq: pending } if pending == seq => {
                if self.countdown_secs == 0 {
                    self.phase = ConversationPhase::Idle;
                } else {
                    self.phase = ConversationPhase::CountingDown {
                        remaining: self.countdown_secs,
                    };
                }
                tracing::info!(seq, countdown = self.countdown_secs, "conversation reply received");
                Resolution::Countdown
            }
            _ => Resolution::Displayed,
        }
    }

    /// One countdown second elapsed. Returns `true` when this tick released the session.
    pub fn tick_countdown(&mut self) -> bool {
        let ConversationPhase::CountingDown { remaining } = self.phase else {
            return false;
        };
        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            self.phase = ConversationPhase::Idle;
            tracing::info!("countdown finished, narration resumes");
            true
        } else {
            self.phase = ConversationPhase::CountingDown { remaining };
            false
        }
    }

    pub fn status(&self) -> ConversationStatus {
        ConversationStatus {
            active: self.is_active(),
            recording: self.is_recording(),
            countdown_remaining: self.countdown_remaining(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_state_is_idle_without_countdown() {
        let session = ConversationSession::new(20);
        assert!(!session.is_active());
        assert_eq!(session.countdown_remaining(), None);
    }

    #[test]
    fn submit_reply_countdown_release() {
        let mut session = ConversationSession::new(3);
        let submission = session.submit("What's that building?").unwrap();
        assert!(session.is_active());
        assert_eq!(session.resolve(submission.seq), Resolution::Countdown);
        assert_eq!(session.countdown_remaining(), Some(3));

        assert!(!session.tick_countdown());
        assert!(!session.tick_countdown());
        assert!(session.tick_countdown());
        assert!(!session.is_active());
        assert!(!session.tick_countdown());
    }

    #[test]
    fn new_submit_cancels_running_countdown() {
        let mut session = ConversationSession::new(5);
        let first = session.submit("one").unwrap();
        session.resolve(first.seq);
        session.tick_countdown();

        let second = session.submit("two").unwrap();
        assert_eq!(second.superseded, None);
        assert_eq!(session.phase(), ConversationPhase::Pending { seq: second.seq });
        assert!(!session.tick_countdown());
    }

    #[test]
    fn only_the_latest_reply_is_kept() {
        let mut session = ConversationSession::new(5);
        let first = session.submit("one").unwrap();
        let second = session.submit("two").unwrap();
        assert_eq!(second.superseded, Some(first.seq));

        assert_eq!(session.resolve(first.seq), Resolution::Superseded);
        assert_eq!(session.phase(), ConversationPhase::Pending { seq: second.seq });
        assert_eq!(session.resolve(second.seq), Resolution::Countdown);
    }

    #[test]
    fn recording_is_active_before_any_transcript() {
        let mut session = ConversationSession::new(5);
        let before = session.interrupt_generation();
        session.begin_recording();
        assert!(session.is_active());
        assert!(session.interrupt_generation() > before);
        assert!(session.abandon_recording());
        assert!(!session.is_active());
    }

    #[test]
    fn abandoning_after_a_typed_submit_keeps_the_submission() {
        let mut session = ConversationSession::new(5);
        session.begin_recording();
        let typed = session.submit("typed instead").unwrap();
        assert!(!session.abandon_recording());
        assert_eq!(session.phase(), ConversationPhase::Pending { seq: typed.seq });
    }

    #[test]
    fn reply_while_recording_again_does_not_arm_countdown() {
        let mut session = ConversationSession::new(5);
        let submission = session.submit("one").unwrap();
        session.begin_recording();
        assert_eq!(session.resolve(submission.seq), Resolution::Displayed);
        assert!(session.is_recording());
    }

    #[test]
    fn blank_messages_are_rejected() {
        let mut session = ConversationSession::new(5);
        assert_eq!(session.submit("   "), Err(ConversationError::EmptyMessage));
        assert!(!session.is_active());
    }
}
