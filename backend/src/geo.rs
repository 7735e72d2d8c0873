use shared::Coordinate;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const OCTANTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

/// Bearing change above which a turn is reported.
pub const TURN_THRESHOLD_DEG: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Left,
    Right,
}

impl Turn {
    pub fn as_str(self) -> &'static str {
        match self {
            Turn::Left => "left",
            Turn::Right => "right",
        }
    }
}

/// Great-circle distance in meters.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlng = (dlng / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` towards `b`, in degrees within [0, 360).
pub fn initial_bearing_deg(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if bearing >= 360.0 { 0.0 } else { bearing }
}

pub fn compass_octant(bearing_deg: f64) -> &'static str {
    let index = (bearing_deg.rem_euclid(360.0) / 45.0).round() as usize % OCTANTS.len();
    OCTANTS[index]
}

/// Signed bearing change from `incoming` to `outgoing`, normalised to (-180, 180].
/// Positive values are clockwise.
pub fn bearing_delta_deg(incoming: f64, outgoing: f64) -> f64 {
    let delta = (outgoing - incoming).rem_euclid(360.0);
    if delta > 180.0 { delta - 360.0 } else { delta }
}

pub fn turn_between(incoming: f64, outgoing: f64) -> Option<Turn> {
    let delta = bearing_delta_deg(incoming, outgoing);
    if delta.abs() <= TURN_THRESHOLD_DEG {
        None
    } else if delta > 0.0 {
        Some(Turn::Right)
    } else {
        Some(Turn::Left)
    }
}

pub fn path_length_m(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

/// Point `distance_m` meters from `origin` along `bearing_deg`.
pub fn destination(origin: Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    let angular = distance_m / EARTH_RADIUS_M;
    let bearing = bearing_deg.to_radians();
    let lat1 = origin.lat.to_radians();
    let lng1 = origin.lng.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lng2 = lng1
        + (bearing.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

    Coordinate {
        lat: lat2.to_degrees(),
        lng: lng2.to_degrees(),
    }
}
