use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use shared::{Coordinate, LoadRouteRequest};

use crate::error::RouteError;
use crate::route::Route;

/// Points in the straight-line route used when the routing provider fails.
pub const FALLBACK_POINTS: usize = 16;

/// Where routes come from.
#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn load(&self, request: &LoadRouteRequest) -> Result<Route, RouteError>;
}

/// Extract the `lonlats=lng,lat;lng,lat;...` waypoints from a BRouter map URL.
///
/// Pairs that do not parse into a valid coordinate are skipped.
pub fn parse_brouter_url(url: &str) -> Result<Vec<Coordinate>, RouteError> {
    if !url.contains("brouter") {
        return Err(RouteError::InvalidUrl(url.to_string()));
    }
    let lonlats = url
        .split(['?', '&', '#'])
        .find_map(|param| param.strip_prefix("lonlats="))
        .ok_or_else(|| RouteError::Unavailable("url has no lonlats parameter".into()))?;

    let coords: Vec<Coordinate> = lonlats
        .split(';')
        .filter_map(|pair| {
            let (lng, lat) = pair.split_once(',')?;
            let coordinate = Coordinate::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?);
            coordinate.is_valid().then_some(coordinate)
        })
        .collect();

    if coords.len() < 2 {
        return Err(RouteError::Unavailable(format!(
            "need at least 2 waypoints in lonlats, found {}",
            coords.len()
        )));
    }
    Ok(coords)
}

/// Evenly spaced points from `start` to `end`, both included.
pub fn straight_line(start: Coordinate, end: Coordinate, points: usize) -> Vec<Coordinate> {
    let steps = points.max(2) - 1;
    (0..=steps)
        .map(|i| {
            if i == steps {
                end
            } else {
                start.interpolate(end, i as f64 / steps as f64)
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// GeoJSON order: `[lng, lat]`.
    coordinates: Vec<[f64; 2]>,
}

/// Expands two endpoints into a followable path through an OSRM server.
#[derive(Debug, Clone)]
pub struct OsrmRouteSource {
    base_url: String,
    profile: String,
    client: reqwest::Client,
}

impl OsrmRouteSource {
    pub fn new(base_url: impl Into<String>, profile: impl Into<String>) -> Result<Self, RouteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: profile.into(),
            client,
        })
    }

    pub fn route_url(&self, start: Coordinate, end: Coordinate) -> String {
        format!(
            "{}/route/v1/{}/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url, self.profile, start.lng, start.lat, end.lng, end.lat
        )
    }

    async fn fetch_path(&self, start: Coordinate, end: Coordinate) -> Result<Vec<Coordinate>, RouteError> {
        let response = self
            .client
            .get(self.route_url(start, end))
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RouteError::Unavailable(format!("OSRM returned HTTP {status}")));
        }
        let body: OsrmResponse = response.json().await?;
        let path: Vec<Coordinate> = body
            .routes
            .into_iter()
            .next()
            .map(|route| {
                route
                    .geometry
                    .coordinates
                    .into_iter()
                    .map(|[lng, lat]| Coordinate::new(lat, lng))
                    .collect()
            })
            .unwrap_or_default();
        if path.len() < 2 {
            return Err(RouteError::Unavailable("no route in OSRM response".into()));
        }
        Ok(path)
    }

    /// Full path between the endpoints, or a straight line when OSRM cannot help.
    pub async fn expand(&self, start: Coordinate, end: Coordinate) -> Vec<Coordinate> {
        match self.fetch_path(start, end).await {
            Ok(path) => {
                tracing::info!(points = path.len(), "OSRM route loaded");
                path
            }
            Err(err) => {
                tracing::warn!(error = %err, "OSRM unavailable, using straight-line route");
                straight_line(start, end, FALLBACK_POINTS)
            }
        }
    }
}

#[async_trait]
impl RouteSource for OsrmRouteSource {
    async fn load(&self, request: &LoadRouteRequest) -> Result<Route, RouteError> {
        let (start, end) = match request {
            LoadRouteRequest::Url { url } => {
                let waypoints = parse_brouter_url(url)?;
                tracing::debug!(waypoints = waypoints.len(), "parsed BRouter url");
                (waypoints[0], waypoints[waypoints.len() - 1])
            }
            LoadRouteRequest::Endpoints { start, end } => {
                for point in [start, end] {
                    if !point.is_valid() {
                        return Err(RouteError::Unavailable(format!(
                            "invalid endpoint {}, {}",
                            point.lat, point.lng
                        )));
                    }
                }
                (*start, *end)
            }
        };
        Route::new(self.expand(start, end).await)
    }
}
