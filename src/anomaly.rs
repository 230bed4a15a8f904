//! Trust scoring: flag physically impossible travel between consecutive samples.
//!
//! This is an annotation pass, not a filter. Output has the same length and
//! order as the input. When a pair is implausible both of its endpoints are
//! flagged, since there is no telling which one is wrong.
//!
//! A pair is judged only if its samples are at least `min_interval_seconds`
//! apart. It is flagged when the implied speed exceeds `max_speed_kmh`, or
//! when it covers more than `teleport_distance_meters` in under
//! `teleport_window_seconds`.

use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{AnnotatedSample, TrackPoint};

/// Thresholds for implausible travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Pairs closer in time than this are never judged. Default: 10 seconds
    pub min_interval_seconds: f64,
    /// Fastest plausible ground travel. Default: 120 km/h
    pub max_speed_kmh: f64,
    /// Distance that is implausible within `teleport_window_seconds`. Default: 50 km
    pub teleport_distance_meters: f64,
    /// Default: 300 seconds
    pub teleport_window_seconds: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_interval_seconds: 10.0,
            max_speed_kmh: 120.0,
            teleport_distance_meters: 50_000.0,
            teleport_window_seconds: 300.0,
        }
    }
}

/// Why a pair of samples was judged implausible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anomaly {
    Speed { speed_kmh: f64 },
    Teleport { distance_meters: f64, seconds: f64 },
}

impl Anomaly {
    pub fn describe(&self) -> String {
        match self {
            Anomaly::Speed { speed_kmh } => format!("impossible speed: {:.0} km/h", speed_kmh),
            Anomaly::Teleport { distance_meters, seconds } => format!(
                "teleportation: {:.1} km in {:.0} s",
                distance_meters / 1000.0,
                seconds
            ),
        }
    }
}

/// Judge one pair of samples. `None` when plausible or not judgeable.
pub fn classify_pair(a: &TrackPoint, b: &TrackPoint, config: &AnomalyConfig) -> Option<Anomaly> {
    let (Some(ta), Some(tb)) = (a.timestamp, b.timestamp) else {
        return None;
    };

    let seconds = (tb - ta).num_milliseconds().unsigned_abs() as f64 / 1000.0;
    if seconds < config.min_interval_seconds {
        return None;
    }

    let distance = haversine_distance(&a.point(), &b.point());

    if distance > config.teleport_distance_meters && seconds < config.teleport_window_seconds {
        return Some(Anomaly::Teleport { distance_meters: distance, seconds });
    }

    let speed_kmh = (distance / 1000.0) / (seconds / 3600.0);
    if speed_kmh > config.max_speed_kmh {
        return Some(Anomaly::Speed { speed_kmh });
    }

    None
}

/// Annotate `samples` with suspicious flags and reasons.
///
/// A sample flagged by both of its pairs keeps the reason of the earlier pair.
pub fn detect(samples: &[TrackPoint], config: &AnomalyConfig) -> Vec<AnnotatedSample> {
    let mut annotated: Vec<AnnotatedSample> =
        samples.iter().cloned().map(AnnotatedSample::new).collect();

    for i in 1..samples.len() {
        if let Some(anomaly) = classify_pair(&samples[i - 1], &samples[i], config) {
            let reason = anomaly.describe();
            for idx in [i - 1, i] {
                let entry = &mut annotated[idx];
                entry.suspicious = true;
                if entry.suspicious_reason.is_none() {
                    entry.suspicious_reason = Some(reason.clone());
                }
            }
        }
    }

    annotated
}

/// Number of suspicious samples in an annotated day.
pub fn suspicious_count(samples: &[AnnotatedSample]) -> usize {
    samples.iter().filter(|s| s.suspicious).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0.1 degree of latitude is ~11.1 km
    fn km_north(km: f64) -> f64 {
        km / 111.194_93
    }

    fn flags(annotated: &[AnnotatedSample]) -> Vec<bool> {
        annotated.iter().map(|a| a.suspicious).collect()
    }

    #[test]
    fn test_short_interval_never_suspicious() {
        // 80 km in 5 seconds
        let day = vec![
            TrackPoint::at(24.0, 46.0, 0),
            TrackPoint::at(24.0 + km_north(80.0), 46.0, 5),
        ];
        let out = detect(&day, &AnomalyConfig::default());
        assert_eq!(flags(&out), vec![false, false]);
    }

    #[test]
    fn test_teleport_flags_both_endpoints() {
        // 60 km in 200 seconds
        let day = vec![
            TrackPoint::at(24.0, 46.0, 0),
            TrackPoint::at(24.0 + km_north(60.0), 46.0, 200),
        ];
        let out = detect(&day, &AnomalyConfig::default());
        assert_eq!(flags(&out), vec![true, true]);
        assert!(out[0].suspicious_reason.as_deref().unwrap().starts_with("teleportation"));
    }

    #[test]
    fn test_speed_limit() {
        // 5 km in 2 minutes = 150 km/h
        let fast = vec![
            TrackPoint::at(24.0, 46.0, 0),
            TrackPoint::at(24.0 + km_north(5.0), 46.0, 120),
        ];
        let out = detect(&fast, &AnomalyConfig::default());
        assert_eq!(flags(&out), vec![true, true]);
        assert!(out[1].suspicious_reason.as_deref().unwrap().starts_with("impossible speed"));

        // 3 km in 2 minutes = 90 km/h
        let ok = vec![
            TrackPoint::at(24.0, 46.0, 0),
            TrackPoint::at(24.0 + km_north(3.0), 46.0, 120),
        ];
        assert_eq!(flags(&detect(&ok, &AnomalyConfig::default())), vec![false, false]);
    }

    #[test]
    fn test_only_offending_pair_flagged() {
        let day = vec![
            TrackPoint::at(24.0, 46.0, 0),
            TrackPoint::at(24.001, 46.0, 60),
            TrackPoint::at(24.001 + km_north(60.0), 46.0, 120),
            TrackPoint::at(24.001 + km_north(60.0), 46.001, 180),
        ];
        let out = detect(&day, &AnomalyConfig::default());
        assert_eq!(flags(&out), vec![false, true, true, false]);
        assert_eq!(suspicious_count(&out), 2);
    }

    #[test]
    fn test_missing_timestamp_is_not_suspicious() {
        let mut b = TrackPoint::at(25.0, 46.0, 60);
        b.timestamp = None;
        let day = vec![TrackPoint::at(24.0, 46.0, 0), b];
        assert_eq!(flags(&detect(&day, &AnomalyConfig::default())), vec![false, false]);
    }

    #[test]
    fn test_output_preserves_order_and_length() {
        let day: Vec<TrackPoint> = (0..6)
            .map(|i| TrackPoint::at(24.0 + i as f64 * 0.3, 46.0, i * 60))
            .collect();
        let out = detect(&day, &AnomalyConfig::default());
        assert_eq!(out.len(), day.len());
        for (a, p) in out.iter().zip(&day) {
            assert_eq!(&a.sample, p);
        }
    }

    #[test]
    fn test_time_reversal_symmetry() {
        let day = vec![
            TrackPoint::at(24.0, 46.0, 0),
            TrackPoint::at(24.002, 46.0, 60),
            TrackPoint::at(24.7, 46.0, 200),
            TrackPoint::at(24.701, 46.0, 260),
            TrackPoint::at(24.702, 46.0, 265),
            TrackPoint::at(25.5, 46.0, 270),
        ];
        let forward = flags(&detect(&day, &AnomalyConfig::default()));

        let mut reversed = day.clone();
        reversed.reverse();
        let mut backward = flags(&detect(&reversed, &AnomalyConfig::default()));
        backward.reverse();

        assert_eq!(forward, backward);
        assert!(forward.iter().any(|f| *f));
    }

    #[test]
    fn test_empty_and_single() {
        assert!(detect(&[], &AnomalyConfig::default()).is_empty());
        let one = detect(&[TrackPoint::at(24.0, 46.0, 0)], &AnomalyConfig::default());
        assert_eq!(flags(&one), vec![false]);
    }
}
