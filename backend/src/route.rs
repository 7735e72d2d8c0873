use shared::{Coordinate, RouteSummary};

use crate::error::RouteError;
use crate::geo::haversine_m;

/// Distances this close to a vertex resolve onto the vertex itself.
const VERTEX_EPSILON_M: f64 = 1e-6;

/// An ordered, immutable walking route.
///
/// The cumulative-length table is computed once on construction; consumers share
/// a loaded route behind an `Arc` and a new route replaces the old one wholesale.
#[derive(Debug, Clone)]
pub struct Route {
    points: Vec<Coordinate>,
    /// `cumulative_m[i]` is the walking distance from the first point to `points[i]`.
    cumulative_m: Vec<f64>,
}

/// A resolved point on the route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub coordinate: Coordinate,
    /// Index of the segment `points[i] -> points[i + 1]` containing the position.
    pub segment_index: usize,
}

impl Route {
    pub fn new(points: Vec<Coordinate>) -> Result<Self, RouteError> {
        if points.len() < 2 {
            return Err(RouteError::TooShort(points.len()));
        }
        if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
            return Err(RouteError::Unavailable(format!(
                "invalid coordinate {}, {}",
                bad.lat, bad.lng
            )));
        }

        let mut cumulative_m = Vec::with_capacity(points.len());
        let mut total = 0.0;
        cumulative_m.push(total);
        for window in points.windows(2) {
            total += haversine_m(window[0], window[1]);
            cumulative_m.push(total);
        }

        Ok(Self {
            points,
            cumulative_m,
        })
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_length_m(&self) -> f64 {
        self.cumulative_m[self.cumulative_m.len() - 1]
    }

    pub fn segment_count(&self) -> usize {
        self.points.len() - 1
    }

    pub fn start(&self) -> Coordinate {
        self.points[0]
    }

    pub fn end(&self) -> Coordinate {
        self.points[self.points.len() - 1]
    }

    pub fn point(&self, index: usize) -> Option<Coordinate> {
        self.points.get(index).copied()
    }

    /// Fraction of the route covered at `distance_m`, in [0, 1].
    pub fn progress(&self, distance_m: f64) -> f64 {
        let total = self.total_length_m();
        if total <= 0.0 {
            return 1.0;
        }
        (distance_m / total).clamp(0.0, 1.0)
    }

    /// Resolve a walked distance to a coordinate by linear interpolation inside the
    /// segment whose cumulative-length bracket `[start, end)` contains it.
    ///
    /// Distances at or beyond the total length pin to the final coordinate.
    pub fn position_at(&self, distance_m: f64) -> Position {
        let last_segment = self.segment_count() - 1;
        if distance_m >= self.total_length_m() - VERTEX_EPSILON_M {
            return Position {
                coordinate: self.end(),
                segment_index: last_segment,
            };
        }
        if distance_m <= 0.0 {
            return Position {
                coordinate: self.start(),
                segment_index: 0,
            };
        }

        let upper = self
            .cumulative_m
            .partition_point(|&c| c <= distance_m + VERTEX_EPSILON_M);
        let segment_index = upper.saturating_sub(1).min(last_segment);

        let seg_start = self.cumulative_m[segment_index];
        let seg_len = self.cumulative_m[segment_index + 1] - seg_start;
        let t = if seg_len > 0.0 {
            ((distance_m - seg_start) / seg_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let t = if t * seg_len <= VERTEX_EPSILON_M { 0.0 } else { t };

        Position {
            coordinate: self.points[segment_index].interpolate(self.points[segment_index + 1], t),
            segment_index,
        }
    }

    pub fn summary(&self) -> RouteSummary {
        RouteSummary {
            point_count: self.points.len(),
            total_length_m: self.total_length_m(),
            start: self.start(),
            end: self.end(),
        }
    }
}
