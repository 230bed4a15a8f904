//! Noise filter for raw device fixes.
//!
//! Decides whether a new reading is worth recording given the last accepted
//! sample of the session. Pure decision, no I/O: the caller moves its
//! "last accepted" reference only when a reading is accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{GpsPoint, GpsSample};

/// Thresholds for accepting a raw reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Movement from the last accepted sample that always counts as real.
    /// Default: 10.0 meters
    pub min_distance_meters: f64,

    /// Elapsed time after which a stationary reading is still recorded.
    /// Default: 30.0 seconds
    pub min_time_seconds: f64,

    /// Fixes with a larger accuracy radius are dropped.
    /// Default: 50.0 meters
    pub max_accuracy_meters: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_distance_meters: 10.0,
            min_time_seconds: 30.0,
            max_accuracy_meters: 50.0,
        }
    }
}

/// A position fix as delivered by the device, before filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

impl RawReading {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64, accuracy: Option<f64>) -> Self {
        Self { timestamp, latitude, longitude, accuracy }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Outcome of [`evaluate`], kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// First reading of the session
    AcceptFirst,
    /// Moved at least `min_distance_meters`
    AcceptMoved,
    /// Stationary, but `min_time_seconds` have passed
    AcceptHeartbeat,
    RejectLowAccuracy,
    RejectNoise,
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(
            self,
            FilterDecision::AcceptFirst | FilterDecision::AcceptMoved | FilterDecision::AcceptHeartbeat
        )
    }
}

/// Classify a reading against the last accepted sample.
pub fn evaluate(
    candidate: &RawReading,
    last_accepted: Option<&GpsSample>,
    config: &FilterConfig,
) -> FilterDecision {
    let Some(last) = last_accepted else {
        return FilterDecision::AcceptFirst;
    };

    if candidate.accuracy.is_some_and(|a| a > config.max_accuracy_meters) {
        return FilterDecision::RejectLowAccuracy;
    }

    let distance = haversine_distance(&candidate.point(), &last.point());
    if distance >= config.min_distance_meters {
        return FilterDecision::AcceptMoved;
    }

    // Clock going backwards never counts as elapsed time
    let elapsed = (candidate.timestamp - last.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
    if elapsed >= config.min_time_seconds {
        return FilterDecision::AcceptHeartbeat;
    }

    FilterDecision::RejectNoise
}

/// Whether `candidate` should be recorded.
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use route_tracker::{should_accept, FilterConfig, GpsPoint, GpsSample, RawReading, TrackingType};
///
/// let t0 = Utc::now();
/// let last = GpsSample::new("emp-1", t0, GpsPoint::new(51.5, -0.12), Some(5.0), TrackingType::Route);
///
/// // Poor fix: 75 m accuracy radius
/// let poor = RawReading::new(t0 + Duration::seconds(60), 51.6, -0.12, Some(75.0));
/// assert!(!should_accept(&poor, Some(&last), &FilterConfig::default()));
/// ```
pub fn should_accept(
    candidate: &RawReading,
    last_accepted: Option<&GpsSample>,
    config: &FilterConfig,
) -> bool {
    evaluate(candidate, last_accepted, config).is_accept()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackingType;
    use chrono::{Duration, TimeZone};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn last_at(lat: f64, lng: f64, seconds: i64) -> GpsSample {
        GpsSample::new("emp-1", t(seconds), GpsPoint::new(lat, lng), Some(5.0), TrackingType::Route)
    }

    #[test]
    fn test_first_reading_always_accepted() {
        let reading = RawReading::new(t(0), 51.5, -0.12, Some(500.0));
        assert_eq!(evaluate(&reading, None, &FilterConfig::default()), FilterDecision::AcceptFirst);
    }

    #[test]
    fn test_low_accuracy_rejected() {
        let last = last_at(51.5, -0.12, 0);
        let reading = RawReading::new(t(600), 51.6, -0.12, Some(75.0));
        assert!(!should_accept(&reading, Some(&last), &FilterConfig::default()));
        assert_eq!(
            evaluate(&reading, Some(&last), &FilterConfig::default()),
            FilterDecision::RejectLowAccuracy
        );
    }

    #[test]
    fn test_accuracy_at_threshold_is_kept() {
        let last = last_at(51.5, -0.12, 0);
        let reading = RawReading::new(t(5), 51.501, -0.12, Some(50.0));
        assert!(should_accept(&reading, Some(&last), &FilterConfig::default()));
    }

    #[test]
    fn test_missing_accuracy_is_not_rejected() {
        let last = last_at(51.5, -0.12, 0);
        let reading = RawReading::new(t(5), 51.501, -0.12, None);
        assert_eq!(evaluate(&reading, Some(&last), &FilterConfig::default()), FilterDecision::AcceptMoved);
    }

    #[test]
    fn test_movement_accepted() {
        let last = last_at(51.5, -0.12, 0);
        // ~111 m north, 2 seconds later
        let reading = RawReading::new(t(2), 51.501, -0.12, Some(8.0));
        assert_eq!(evaluate(&reading, Some(&last), &FilterConfig::default()), FilterDecision::AcceptMoved);
    }

    #[test]
    fn test_stationary_heartbeat_accepted() {
        let last = last_at(51.5, -0.12, 0);
        let reading = RawReading::new(t(30), 51.50001, -0.12, Some(8.0));
        assert_eq!(evaluate(&reading, Some(&last), &FilterConfig::default()), FilterDecision::AcceptHeartbeat);
    }

    #[test]
    fn test_noise_rejected() {
        let last = last_at(51.5, -0.12, 0);
        // ~1 m away, 10 seconds later
        let reading = RawReading::new(t(10), 51.50001, -0.12, Some(8.0));
        assert_eq!(evaluate(&reading, Some(&last), &FilterConfig::default()), FilterDecision::RejectNoise);
    }

    #[test]
    fn test_clock_going_backwards_is_noise() {
        let last = last_at(51.5, -0.12, 100);
        let reading = RawReading::new(t(0), 51.50001, -0.12, Some(8.0));
        assert!(!should_accept(&reading, Some(&last), &FilterConfig::default()));
    }

    #[test]
    fn test_accept_set_monotone_in_distance() {
        let config = FilterConfig::default();
        let last = last_at(51.5, -0.12, 0);
        for secs in [1, 10, 29, 30, 120] {
            let mut accepted_before = false;
            for step in 0..40 {
                let lat = 51.5 + step as f64 * 0.00002;
                let reading = RawReading::new(t(0) + Duration::seconds(secs), lat, -0.12, Some(10.0));
                let accepted = should_accept(&reading, Some(&last), &config);
                // Once accepted, farther readings stay accepted
                assert!(!accepted_before || accepted, "non-monotone at step {} ({}s)", step, secs);
                accepted_before = accepted;
            }
        }
    }
}
