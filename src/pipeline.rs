//! Assemble everything a map view needs for one subject's day.
//!
//! query -> anomaly detection -> declutter (markers) + reconstruction (route line)
//!
//! The rendering layer consumes [`MapView`] and holds no logic of its own.
//! When tracking is disabled, or the day has fewer than two samples, the view
//! is an explanatory empty state rather than an empty map.

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::anomaly::{self, AnomalyConfig};
use crate::declutter::{self, DeclutterConfig};
use crate::error::{Result, TrackerError};
use crate::route::{self, DirectionsProvider, RouteConfig};
use crate::{AnnotatedSample, Bounds, GpsPoint, RouteSegmentResult, TrackPoint};

/// Inbound query: samples recorded for a subject on a given day, in time order.
///
/// Implementations report disabled tracking as [`TrackerError::TrackingDisabled`].
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn fetch_day(&self, subject_id: &str, date: NaiveDate) -> Result<Vec<TrackPoint>>;
}

/// Why a map view has nothing to draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EmptyReason {
    TrackingDisabled,
    NotEnoughSamples { found: usize },
}

impl EmptyReason {
    /// User-facing explanation.
    pub fn message(&self) -> String {
        match self {
            EmptyReason::TrackingDisabled => "GPS tracking is disabled for this employee.".to_string(),
            EmptyReason::NotEnoughSamples { found: 0 } => {
                "No GPS points were recorded on this day.".to_string()
            }
            EmptyReason::NotEnoughSamples { found } => format!(
                "Only {} GPS point was recorded on this day; at least two are needed to draw a route.",
                found
            ),
        }
    }
}

/// A fully annotated day, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayMap {
    pub subject_id: String,
    pub date: NaiveDate,
    /// Markers in time order: suspicious flags set, clusters fanned out
    pub samples: Vec<AnnotatedSample>,
    pub route: RouteSegmentResult,
    /// Bounds of the true sample coordinates
    pub bounds: Bounds,
    pub suspicious_count: usize,
}

impl DayMap {
    pub fn center(&self) -> GpsPoint {
        self.bounds.center()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MapView {
    Empty(EmptyReason),
    Ready(DayMap),
}

/// All tuning used when building a map view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapViewConfig {
    pub anomaly: AnomalyConfig,
    pub declutter: DeclutterConfig,
    pub route: RouteConfig,
}

/// Anomaly detection followed by declutter. Pure.
pub fn annotate(samples: &[TrackPoint], config: &MapViewConfig) -> Vec<AnnotatedSample> {
    let annotated = anomaly::detect(samples, &config.anomaly);
    declutter::declutter(annotated, &config.declutter)
}

/// Build the map view for `subject_id` on `date`.
///
/// Tracking being disabled is an empty state, not an error. Transport
/// failures from the query are returned as errors and are retryable.
pub async fn build_map_view(
    source: &dyn SampleSource,
    provider: &dyn DirectionsProvider,
    subject_id: &str,
    date: NaiveDate,
    config: &MapViewConfig,
) -> Result<MapView> {
    let fetched = match source.fetch_day(subject_id, date).await {
        Ok(samples) => samples,
        Err(TrackerError::TrackingDisabled { .. }) => {
            info!("[MapView] Tracking disabled for {}", subject_id);
            return Ok(MapView::Empty(EmptyReason::TrackingDisabled));
        }
        Err(e) => return Err(e),
    };

    let total = fetched.len();
    let samples: Vec<TrackPoint> = fetched.into_iter().filter(|s| s.point().is_valid()).collect();
    if samples.len() < total {
        warn!("[MapView] {}: dropped {} samples with invalid coordinates", subject_id, total - samples.len());
    }

    if samples.len() < 2 {
        return Ok(MapView::Empty(EmptyReason::NotEnoughSamples { found: samples.len() }));
    }

    let annotated = annotate(&samples, config);
    let suspicious_count = anomaly::suspicious_count(&annotated);

    let points: Vec<GpsPoint> = samples.iter().map(TrackPoint::point).collect();
    let Some(bounds) = Bounds::from_points(&points) else {
        return Ok(MapView::Empty(EmptyReason::NotEnoughSamples { found: 0 }));
    };
    let route = route::reconstruct(&points, provider, &config.route).await;

    info!(
        "[MapView] {} on {}: {} samples, {} suspicious, route {:.1}km",
        subject_id,
        date,
        annotated.len(),
        suspicious_count,
        route.total_distance_meters / 1000.0
    );

    Ok(MapView::Ready(DayMap {
        subject_id: subject_id.to_string(),
        date,
        samples: annotated,
        route,
        bounds,
        suspicious_count,
    }))
}
