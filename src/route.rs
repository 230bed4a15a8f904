//! Route reconstruction from sparse samples.
//!
//! Two steps before any network call:
//!
//! 1. **Reduce** - keep a point only if it lies at least `min_spacing_meters`
//!    from the last kept point. The first and last points always survive.
//! 2. **Batch** - split the reduced list into chunks of at most
//!    `max_waypoints_per_request` points. Consecutive chunks share one point,
//!    so the routed segments join without a gap.
//!
//! Each chunk is then routed by a [`DirectionsProvider`] (first point origin,
//! last point destination, interior points waypoints). A failing chunk is
//! logged and contributes nothing; the rest of the route is still returned.

use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo_utils::haversine_distance;
use crate::{GpsPoint, RouteSegmentResult};

/// Travel mode forwarded to the directions provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    #[default]
    Driving,
    Walking,
    Cycling,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Driving => "driving",
            TravelMode::Walking => "walking",
            TravelMode::Cycling => "cycling",
        }
    }
}

/// Configuration for route reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Minimum spacing between kept waypoints. Default: 200.0 meters
    pub min_spacing_meters: f64,
    /// Provider ceiling on points per request, origin and destination included.
    /// Default: 25
    pub max_waypoints_per_request: usize,
    pub travel_mode: TravelMode,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            min_spacing_meters: 200.0,
            max_waypoints_per_request: 25,
            travel_mode: TravelMode::Driving,
        }
    }
}

/// One routed segment as returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionsLeg {
    pub path: Vec<GpsPoint>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Outbound query: route from `origin` to `destination` through `waypoints`.
#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    async fn route(
        &self,
        origin: GpsPoint,
        destination: GpsPoint,
        waypoints: &[GpsPoint],
        mode: TravelMode,
    ) -> Result<DirectionsLeg>;
}

/// Keep points at least `min_spacing_meters` from the last kept one.
///
/// The final input point is always kept so the route ends at the true
/// destination.
///
/// # Example
/// ```
/// use route_tracker::{route, GpsPoint};
///
/// let points: Vec<GpsPoint> = (0..10).map(|i| GpsPoint::new(51.5 + i as f64 * 0.0001, -0.12)).collect();
/// let kept = route::reduce_waypoints(&points, 200.0);
/// assert_eq!(kept, vec![points[0], points[9]]);
/// ```
pub fn reduce_waypoints(points: &[GpsPoint], min_spacing_meters: f64) -> Vec<GpsPoint> {
    let Some((&first, rest)) = points.split_first() else {
        return Vec::new();
    };

    let mut kept = vec![first];
    let mut last_kept = first;
    for p in rest {
        if haversine_distance(&last_kept, p) >= min_spacing_meters {
            kept.push(*p);
            last_kept = *p;
        }
    }

    if let Some(&last) = rest.last() {
        if last_kept != last {
            kept.push(last);
        }
    }

    kept
}

/// Split `points` into overlapping chunks of at most `max_per_chunk` points.
///
/// Each chunk starts at the previous chunk's last point. Chunks of fewer than
/// two points are dropped. A ceiling below two is treated as two.
pub fn batch_waypoints(points: &[GpsPoint], max_per_chunk: usize) -> Vec<&[GpsPoint]> {
    let size = max_per_chunk.max(2);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start + 1 < points.len() {
        let end = (start + size).min(points.len());
        chunks.push(&points[start..end]);
        start = end - 1;
    }

    chunks
}

/// Reconstruct a route through `points` using `provider`.
///
/// Invalid coordinates are dropped first. Totals cover successful chunks
/// only.
pub async fn reconstruct(
    points: &[GpsPoint],
    provider: &dyn DirectionsProvider,
    config: &RouteConfig,
) -> RouteSegmentResult {
    let valid: Vec<GpsPoint> = points.iter().copied().filter(GpsPoint::is_valid).collect();
    let reduced = reduce_waypoints(&valid, config.min_spacing_meters);
    let chunks = batch_waypoints(&reduced, config.max_waypoints_per_request);

    info!(
        "[Route] {} points -> {} waypoints -> {} requests ({})",
        points.len(),
        reduced.len(),
        chunks.len(),
        config.travel_mode.as_str()
    );

    let start = Instant::now();
    let mut result = RouteSegmentResult::default();

    for (i, chunk) in chunks.iter().enumerate() {
        result.batches_requested += 1;
        let origin = chunk[0];
        let destination = chunk[chunk.len() - 1];
        let waypoints = &chunk[1..chunk.len() - 1];

        match provider.route(origin, destination, waypoints, config.travel_mode).await {
            Ok(leg) => {
                debug!(
                    "[Route] batch {} ok: {} points, {:.0}m, {:.0}s",
                    i,
                    leg.path.len(),
                    leg.distance_meters,
                    leg.duration_seconds
                );
                result.path.extend(leg.path);
                result.total_distance_meters += leg.distance_meters;
                result.total_duration_seconds += leg.duration_seconds;
            }
            Err(e) => {
                result.batches_failed += 1;
                warn!("[Route] batch {} ({} points) failed, skipping: {}", i, chunk.len(), e);
            }
        }
    }

    info!(
        "[Route] Done: {:.1}km, {:.0}min, {}/{} batches ok in {:?}",
        result.total_distance_meters / 1000.0,
        result.total_duration_seconds / 60.0,
        result.batches_requested - result.batches_failed,
        result.batches_requested,
        start.elapsed()
    );

    result
}
