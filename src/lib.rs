//! # Route Tracker
//!
//! GPS tracking for field staff: sample filtering, offline buffering with
//! best-effort sync, trust scoring of recorded days and route reconstruction.
//!
//! This library provides:
//! - A noise filter deciding which raw device fixes are worth recording
//! - A durable local buffer and an idempotent sync queue
//! - Detection of physically impossible travel ("teleportation")
//! - Declutter jitter for overlapping map markers
//! - Route reconstruction through a waypoint-capped directions provider
//!
//! ## Features
//!
//! - **`http`** - Enable HTTP clients for an OSRM-compatible directions
//!   service and a JSON sample store
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_tracker::{anomaly, declutter, AnomalyConfig, DeclutterConfig, TrackPoint};
//!
//! let day = vec![
//!     TrackPoint::at(51.5074, -0.1278, 0),
//!     TrackPoint::at(51.5080, -0.1290, 120),
//!     TrackPoint::at(52.2053, 0.1218, 240), // ~75 km in two minutes
//! ];
//!
//! let annotated = anomaly::detect(&day, &AnomalyConfig::default());
//! assert!(annotated[1].suspicious && annotated[2].suspicious);
//!
//! let markers = declutter::declutter(annotated, &DeclutterConfig::default());
//! assert_eq!(markers.len(), 3);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod error;
pub use error::{Result, TrackerError};

pub mod geo_utils;

pub mod filter;
pub use filter::{should_accept, FilterConfig, RawReading};

pub mod buffer;
pub use buffer::LocalBuffer;

pub mod sync;
pub use sync::{PersistOutcome, SampleSink, SyncQueue, SyncReport};

pub mod anomaly;
pub use anomaly::AnomalyConfig;

pub mod declutter;
pub use declutter::DeclutterConfig;

pub mod route;
pub use route::{DirectionsLeg, DirectionsProvider, RouteConfig, TravelMode};

pub mod session;
pub use session::{PositionProvider, SessionConfig, TrackingSession};

pub mod pipeline;
pub use pipeline::{build_map_view, DayMap, EmptyReason, MapView, MapViewConfig, SampleSource};

// HTTP adapters for the directions provider and the remote sample store
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{DirectionsConfig, OsrmDirections, RemoteStore};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_tracker::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self { min_lat, max_lat, min_lng, max_lng })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Unique identifier of a recorded sample.
///
/// Minted on creation so sync state never depends on timestamps being unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(Uuid);

impl SampleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SampleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a sample marks on the day's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingType {
    /// Ordinary route point.
    #[default]
    Route,
    CallStart,
    CallEnd,
}

impl TrackingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingType::Route => "route",
            TrackingType::CallStart => "call_start",
            TrackingType::CallEnd => "call_end",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "route" => Some(TrackingType::Route),
            "call_start" => Some(TrackingType::CallStart),
            "call_end" => Some(TrackingType::CallEnd),
            _ => None,
        }
    }

    /// Special points mark events rather than movement.
    pub fn is_special(&self) -> bool {
        !matches!(self, TrackingType::Route)
    }
}

/// One observed position, as recorded on the device.
///
/// Samples are immutable after creation except for `synced`, which flips
/// from `false` to `true` exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsSample {
    pub id: SampleId,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, if the sensor reported one
    pub accuracy: Option<f64>,
    pub subject_id: String,
    pub tracking_type: TrackingType,
    pub synced: bool,
}

impl GpsSample {
    /// Record a new, not yet synced sample with a fresh id.
    pub fn new(
        subject_id: &str,
        timestamp: DateTime<Utc>,
        point: GpsPoint,
        accuracy: Option<f64>,
        tracking_type: TrackingType,
    ) -> Self {
        Self {
            id: SampleId::new(),
            timestamp,
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy: accuracy.map(|a| a.max(0.0)),
            subject_id: subject_id.to_string(),
            tracking_type,
            synced: false,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// A sample as returned by the day query.
///
/// Remote records may lack a timestamp; the detector treats such pairs as
/// non-suspicious instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub tracking_type: TrackingType,
    /// Display label supplied by the host (customer name, call subject, ...)
    #[serde(default)]
    pub label: Option<String>,
}

impl TrackPoint {
    /// Ordinary route point at `seconds` after the Unix epoch.
    pub fn at(latitude: f64, longitude: f64, seconds: i64) -> Self {
        Self {
            timestamp: Utc.timestamp_opt(seconds, 0).single(),
            latitude,
            longitude,
            accuracy: None,
            tracking_type: TrackingType::Route,
            label: None,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

impl From<&GpsSample> for TrackPoint {
    fn from(sample: &GpsSample) -> Self {
        Self {
            timestamp: Some(sample.timestamp),
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            tracking_type: sample.tracking_type,
            label: None,
        }
    }
}

/// A track point plus render-time annotations. Never persisted.
///
/// Invariant: a `suspicious` sample is never `is_jittered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedSample {
    pub sample: TrackPoint,
    pub suspicious: bool,
    pub suspicious_reason: Option<String>,
    pub is_jittered: bool,
    /// Equal to the true coordinates unless jittered
    pub display_latitude: f64,
    pub display_longitude: f64,
}

impl AnnotatedSample {
    pub fn new(sample: TrackPoint) -> Self {
        Self {
            display_latitude: sample.latitude,
            display_longitude: sample.longitude,
            sample,
            suspicious: false,
            suspicious_reason: None,
            is_jittered: false,
        }
    }

    /// True coordinates. Distance and anomaly math always uses these.
    pub fn true_point(&self) -> GpsPoint {
        self.sample.point()
    }

    pub fn display_point(&self) -> GpsPoint {
        GpsPoint::new(self.display_latitude, self.display_longitude)
    }
}

/// Reconstructed route: drawable path plus totals over successful batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteSegmentResult {
    pub path: Vec<GpsPoint>,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    /// Number of batches sent to the provider
    pub batches_requested: u32,
    /// Number of batches that contributed nothing because the provider failed
    pub batches_failed: u32,
}

impl RouteSegmentResult {
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
