use std::time::{Duration, Instant};

use shared::ContextLabel;

use crate::clients::{NarrationPrompt, NarrationReply};
use crate::error::ClientError;
use crate::geo::{compass_octant, initial_bearing_deg, turn_between};
use crate::route::{Position, Route};

/// Progress from which narration is requested with the `End` label (inclusive).
pub const END_PROGRESS: f64 = 0.95;

/// Identifies one dispatched narration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrationTicket {
    id: u64,
    walk: u64,
    interrupt_generation: u64,
}

impl NarrationTicket {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NarrationRequest {
    pub ticket: NarrationTicket,
    pub prompt: NarrationPrompt,
}

/// What to do with a narration response once it arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationVerdict {
    Accept(NarrationReply),
    /// The request failed; log this text as an error entry.
    Failed(String),
    /// Same text as the previous accepted narration.
    Duplicate,
    /// A conversation started or the walk restarted after the request went out.
    Stale,
}

/// Everything the cadence decision reads on a position tick.
#[derive(Debug, Clone, Copy)]
pub struct CadenceInput<'a> {
    pub route: &'a Route,
    pub position: Position,
    pub progress: f64,
    pub pace_kmh: f64,
    pub conversation_active: bool,
    pub interrupt_generation: u64,
}

/// Decides when ambient narration is requested.
///
/// Fires at most once per `interval`, never while a request is in flight or a
/// conversation is active, and filters the responses that come back.
#[derive(Debug, Clone)]
pub struct CadenceController {
    interval: Duration,
    last_fire: Option<Instant>,
    next_fire: Option<Instant>,
    /// Set by `begin_walk`: the next eligible poll fires regardless of the interval.
    due_now: bool,
    in_flight: Option<NarrationTicket>,
    walk: u64,
    issued: u64,
    last_accepted: Option<String>,
}

impl CadenceController {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
            next_fire: None,
            due_now: false,
            in_flight: None,
            walk: 0,
            issued: 0,
            last_accepted: None,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn next_fire(&self) -> Option<Instant> {
        self.next_fire
    }

    pub fn seconds_until_next(&self, now: Instant) -> Option<u64> {
        self.next_fire
            .map(|next| next.saturating_duration_since(now).as_secs_f64().ceil() as u64)
    }

    /// A fresh walk: responses to earlier requests become stale and the next poll
    /// fires immediately.
    pub fn begin_walk(&mut self, now: Instant) {
        self.walk += 1;
        self.due_now = true;
        self.last_accepted = None;
        self.next_fire = Some(now);
    }

    /// The route changed: halt, and treat anything still in flight as stale.
    pub fn retire_walk(&mut self) {
        self.walk += 1;
        self.last_accepted = None;
        self.halt();
    }

    /// Walk resumed after a pause.
    pub fn resume(&mut self, now: Instant) {
        self.next_fire = Some(self.schedule_from(now));
    }

    /// Walk paused or stopped. A request already in flight is left alone.
    pub fn halt(&mut self) {
        self.due_now = false;
        self.next_fire = None;
    }

    fn schedule_from(&self, now: Instant) -> Instant {
        if self.due_now {
            return now;
        }
        self.last_fire.map_or(now, |last| last + self.interval)
    }

    fn is_due(&self, now: Instant) -> bool {
        self.due_now
            || self
                .last_fire
                .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Called on every position tick while walking.
    pub fn poll(&mut self, now: Instant, input: CadenceInput<'_>) -> Option<NarrationRequest> {
        if input.conversation_active {
            return None;
        }
        if self.in_flight.is_some() {
            return None;
        }
        if !self.is_due(now) {
            return None;
        }

        let (context, direction) = describe_context(input.route, input.position, input.progress);
        self.issued += 1;
        let ticket = NarrationTicket {
            id: self.issued,
            walk: self.walk,
            interrupt_generation: input.interrupt_generation,
        };
        self.in_flight = Some(ticket);
        self.last_fire = Some(now);
        self.next_fire = Some(now + self.interval);
        self.due_now = false;

        tracing::info!(
            ticket = ticket.id,
            context = ?context,
            direction = direction.as_deref().unwrap_or(""),
            segment = input.position.segment_index,
            progress = input.progress,
            "requesting narration"
        );

        Some(NarrationRequest {
            ticket,
            prompt: NarrationPrompt {
                coordinate: input.position.coordinate,
                pace_kmh: input.pace_kmh,
                context,
                direction,
            },
        })
    }

    /// Settle a dispatched request. The in-flight slot is always released.
    pub fn complete(
        &mut self,
        now: Instant,
        ticket: NarrationTicket,
        outcome: Result<NarrationReply, ClientError>,
        interrupt_generation: u64,
    ) -> NarrationVerdict {
        if self.in_flight == Some(ticket) {
            self.in_flight = None;
        }
        if self.next_fire.is_some() {
            self.next_fire = Some(self.schedule_from(now));
        }

        if ticket.walk != self.walk || ticket.interrupt_generation != interrupt_generation {
            tracing::info!(ticket = ticket.id, "discarding narration overtaken by an interrupt or restart");
            return NarrationVerdict::Stale;
        }

        match outcome {
            Ok(reply) => {
                if self.last_accepted.as_deref() == Some(reply.text.as_str()) {
                    tracing::debug!(ticket = ticket.id, "duplicate narration dropped");
                    return NarrationVerdict::Duplicate;
                }
                self.last_accepted = Some(reply.text.clone());
                NarrationVerdict::Accept(reply)
            }
            Err(err) => {
                tracing::warn!(ticket = ticket.id, error = %err, "narration request failed");
                NarrationVerdict::Failed(format!(
                    "Error: {err} - make sure the narration agent is reachable"
                ))
            }
        }
    }
}

/// Label a narration request by where the walker is.
///
/// `Start` anywhere on the first segment, `End` from [`END_PROGRESS`] on, otherwise
/// `Walking` with a heading and, when the route bends by more than the turn
/// threshold ahead, the turn direction.
pub fn describe_context(route: &Route, position: Position, progress: f64) -> (ContextLabel, Option<String>) {
    let index = position.segment_index;
    if index == 0 {
        return (ContextLabel::Start, None);
    }
    if progress >= END_PROGRESS {
        return (ContextLabel::End, None);
    }

    let direction = route.point(index - 1).map(|previous| {
        let heading = initial_bearing_deg(previous, position.coordinate);
        let octant = compass_octant(heading);
        let turn = route
            .point(index + 1)
            .and_then(|next| turn_between(heading, initial_bearing_deg(position.coordinate, next)));
        match turn {
            Some(turn) => format!("heading {octant}, turning {}", turn.as_str()),
            None => format!("heading {octant}"),
        }
    });

    (ContextLabel::Walking, direction)
}
