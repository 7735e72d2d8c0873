use std::sync::Arc;

use shared::WalkState;

use crate::config::{validate_pace, MAX_PACE_KMH, MIN_PACE_KMH};
use crate::error::WalkError;
use crate::route::{Position, Route};

/// Outcome of one position tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    /// Not walking; nothing moved.
    Idle,
    Moved(Position),
    /// The walker passed the end of the route. The simulator is now `Stopped`.
    Finished(Position),
}

/// Advances a virtual walker along a [`Route`] one second at a time.
#[derive(Debug, Clone)]
pub struct PositionSimulator {
    route: Option<Arc<Route>>,
    state: WalkState,
    distance_m: f64,
    pace_kmh: f64,
    position: Option<Position>,
}

impl PositionSimulator {
    pub fn new(pace_kmh: f64) -> Self {
        Self {
            route: None,
            state: WalkState::Stopped,
            distance_m: 0.0,
            pace_kmh: pace_kmh.clamp(MIN_PACE_KMH, MAX_PACE_KMH),
            position: None,
        }
    }

    /// Replace the route. Any walk in progress is stopped and the cursor rewinds.
    pub fn load_route(&mut self, route: Arc<Route>) {
        self.state = WalkState::Stopped;
        self.distance_m = 0.0;
        self.position = None;
        self.route = Some(route);
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    pub fn pace_kmh(&self) -> f64 {
        self.pace_kmh
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn progress(&self) -> f64 {
        self.route
            .as_ref()
            .map_or(0.0, |route| route.progress(self.distance_m))
    }

    /// Meters covered per one-second tick at the current pace.
    pub fn speed_mps(&self) -> f64 {
        self.pace_kmh / 3.6
    }

    /// Takes effect on the next tick.
    pub fn set_pace(&mut self, pace_kmh: f64) -> Result<(), WalkError> {
        self.pace_kmh = validate_pace(pace_kmh).map_err(|_| WalkError::PaceOutOfRange(pace_kmh))?;
        Ok(())
    }

    pub fn nudge_pace(&mut self, delta_kmh: f64) -> f64 {
        self.pace_kmh = (self.pace_kmh + delta_kmh).clamp(MIN_PACE_KMH, MAX_PACE_KMH);
        self.pace_kmh
    }

    /// Begin a fresh walk from the first coordinate.
    pub fn start(&mut self) -> Result<Position, WalkError> {
        let route = self.route.as_ref().ok_or(WalkError::NoRoute)?;
        if self.state == WalkState::Walking {
            return Err(WalkError::InvalidTransition {
                action: "start",
                state: self.state,
            });
        }
        let position = route.position_at(0.0);
        self.distance_m = 0.0;
        self.position = Some(position);
        self.state = WalkState::Walking;
        tracing::info!(
            points = route.len(),
            total_m = route.total_length_m(),
            pace_kmh = self.pace_kmh,
            "walk started"
        );
        Ok(position)
    }

    pub fn pause(&mut self) -> Result<(), WalkError> {
        if self.state != WalkState::Walking {
            return Err(WalkError::InvalidTransition {
                action: "pause",
                state: self.state,
            });
        }
        self.state = WalkState::Paused;
        tracing::info!(distance_m = self.distance_m, "walk paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), WalkError> {
        if self.state != WalkState::Paused {
            return Err(WalkError::InvalidTransition {
                action: "resume",
                state: self.state,
            });
        }
        self.state = WalkState::Walking;
        tracing::info!(distance_m = self.distance_m, "walk resumed");
        Ok(())
    }

    /// Halt the walk. The cursor is left where it is; only `start` rewinds it.
    pub fn stop(&mut self) -> Result<(), WalkError> {
        if self.state == WalkState::Stopped {
            return Err(WalkError::InvalidTransition {
                action: "stop",
                state: self.state,
            });
        }
        self.state = WalkState::Stopped;
        tracing::info!(distance_m = self.distance_m, "walk stopped");
        Ok(())
    }

    pub fn tick(&mut self) -> Tick {
        if self.state != WalkState::Walking {
            return Tick::Idle;
        }
        let Some(route) = self.route.as_ref() else {
            return Tick::Idle;
        };

        self.distance_m += self.speed_mps();

        if self.distance_m > route.total_length_m() {
            let position = Position {
                coordinate: route.end(),
                segment_index: route.segment_count() - 1,
            };
            self.position = Some(position);
            self.state = WalkState::Stopped;
            tracing::info!(
                distance_m = self.distance_m,
                total_m = route.total_length_m(),
                "reached end of route"
            );
            return Tick::Finished(position);
        }

        let position = route.position_at(self.distance_m);
        self.position = Some(position);
        tracing::trace!(
            distance_m = self.distance_m,
            segment = position.segment_index,
            lat = position.coordinate.lat,
            lng = position.coordinate.lng,
            "position tick"
        );
        Tick::Moved(position)
    }
}
