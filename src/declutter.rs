//! Declutter overlapping map markers.
//!
//! Near-duplicate samples (a worker standing still, repeated heartbeats) would
//! stack on one marker. Clusters of such samples are fanned out on a small
//! circle around their centroid so each stays clickable. Only the display
//! coordinates move; the true coordinates are kept untouched for every
//! distance computation.
//!
//! Clusters containing a suspicious sample are never jittered, so anomalies
//! are not hidden behind the fan-out.

use std::f64::consts::TAU;

use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::geo_utils::{compute_center, offset_on_circle};
use crate::{AnnotatedSample, GpsPoint};

/// Declutter parameters, in raw degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclutterConfig {
    /// Samples within this straight-line degree distance of a cluster's
    /// first member join the cluster. Default: 0.0001 (~11 m)
    pub threshold_degrees: f64,
    /// Radius of the fan-out circle. Default: 0.00003 (~3 m)
    pub jitter_radius_degrees: f64,
}

impl Default for DeclutterConfig {
    fn default() -> Self {
        Self {
            threshold_degrees: 0.0001,
            jitter_radius_degrees: 0.00003,
        }
    }
}

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Greedy single-pass clustering.
///
/// Walks points in order; each point not yet clustered seeds a cluster with
/// every later unclustered point within `threshold_degrees` of it
/// (inclusive). Returned clusters hold indices in input order, seed first.
pub fn find_clusters(points: &[GpsPoint], threshold_degrees: f64) -> Vec<Vec<usize>> {
    let tree: RTree<IndexedPoint> = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new([p.longitude, p.latitude], i))
            .collect(),
    );

    let max_sq = threshold_degrees * threshold_degrees;
    let mut clustered = vec![false; points.len()];
    let mut clusters = Vec::new();

    for (i, seed) in points.iter().enumerate() {
        if clustered[i] {
            continue;
        }
        clustered[i] = true;

        let mut near: Vec<usize> = tree
            .locate_within_distance([seed.longitude, seed.latitude], max_sq)
            .map(|entry| entry.data)
            .filter(|&j| j > i && !clustered[j])
            .collect();
        near.sort_unstable();

        let mut members = Vec::with_capacity(near.len() + 1);
        members.push(i);
        for j in near {
            clustered[j] = true;
            members.push(j);
        }
        clusters.push(members);
    }

    clusters
}

/// Fan out clean clusters for display.
///
/// The first member of a jittered cluster keeps its true coordinates; member
/// `k` of `n` moves to angle `2πk/n` on the jitter circle around the
/// cluster centroid. Suspicious flags are never changed.
pub fn declutter(mut samples: Vec<AnnotatedSample>, config: &DeclutterConfig) -> Vec<AnnotatedSample> {
    let points: Vec<GpsPoint> = samples.iter().map(|s| s.true_point()).collect();

    for members in find_clusters(&points, config.threshold_degrees) {
        if members.len() < 2 || members.iter().any(|&i| samples[i].suspicious) {
            continue;
        }

        let member_points: Vec<GpsPoint> = members.iter().map(|&i| points[i]).collect();
        let Some(centroid) = compute_center(&member_points) else {
            continue;
        };

        let n = members.len() as f64;
        for (k, &idx) in members.iter().enumerate().skip(1) {
            let angle = TAU * k as f64 / n;
            let display = offset_on_circle(&centroid, config.jitter_radius_degrees, angle);
            let entry = &mut samples[idx];
            entry.display_latitude = display.latitude;
            entry.display_longitude = display.longitude;
            entry.is_jittered = true;
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::{degree_distance, haversine_distance};
    use crate::TrackPoint;

    fn annotated(points: &[(f64, f64)]) -> Vec<AnnotatedSample> {
        points
            .iter()
            .enumerate()
            .map(|(i, &(lat, lng))| AnnotatedSample::new(TrackPoint::at(lat, lng, i as i64 * 60)))
            .collect()
    }

    fn tight_cluster() -> Vec<(f64, f64)> {
        // Five fixes within a few meters of each other
        vec![
            (51.50000, -0.12000),
            (51.50002, -0.12001),
            (51.49999, -0.12002),
            (51.50001, -0.11999),
            (51.50002, -0.12000),
        ]
    }

    #[test]
    fn test_five_close_points_fan_out() {
        let out = declutter(annotated(&tight_cluster()), &DeclutterConfig::default());
        let jittered = out.iter().filter(|s| s.is_jittered).count();
        assert_eq!(jittered, 4);
        assert!(!out[0].is_jittered);
        assert_eq!(out[0].display_point(), out[0].true_point());

        let truth: Vec<GpsPoint> = out.iter().map(|s| s.true_point()).collect();
        let centroid = compute_center(&truth).unwrap();
        for s in &out {
            assert!(haversine_distance(&centroid, &s.display_point()) < 4.0);
        }
        for s in out.iter().filter(|s| s.is_jittered) {
            assert!((degree_distance(&centroid, &s.display_point()) - 0.00003).abs() < 1e-9);
        }
    }

    #[test]
    fn test_true_coordinates_untouched() {
        let input = annotated(&tight_cluster());
        let out = declutter(input.clone(), &DeclutterConfig::default());
        for (before, after) in input.iter().zip(&out) {
            assert_eq!(before.sample, after.sample);
        }
    }

    #[test]
    fn test_jittered_points_are_distinct() {
        let out = declutter(annotated(&tight_cluster()), &DeclutterConfig::default());
        for i in 0..out.len() {
            for j in (i + 1)..out.len() {
                assert!(degree_distance(&out[i].display_point(), &out[j].display_point()) > 1e-7);
            }
        }
    }

    #[test]
    fn test_singletons_untouched() {
        let out = declutter(
            annotated(&[(51.5, -0.12), (51.51, -0.12), (51.52, -0.12)]),
            &DeclutterConfig::default(),
        );
        assert!(out.iter().all(|s| !s.is_jittered));
    }

    #[test]
    fn test_suspicious_cluster_untouched() {
        let mut input = annotated(&tight_cluster());
        input[3].suspicious = true;
        let out = declutter(input.clone(), &DeclutterConfig::default());

        assert!(out.iter().all(|s| !s.is_jittered));
        let before: Vec<bool> = input.iter().map(|s| s.suspicious).collect();
        let after: Vec<bool> = out.iter().map(|s| s.suspicious).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_suspicious_cluster_does_not_block_others() {
        let mut points = tight_cluster();
        points.extend([(51.6, -0.2), (51.60001, -0.2)]);
        let mut input = annotated(&points);
        input[0].suspicious = true;

        let out = declutter(input, &DeclutterConfig::default());
        assert!(out[..5].iter().all(|s| !s.is_jittered));
        assert!(!out[5].is_jittered);
        assert!(out[6].is_jittered);
        assert!(out.iter().all(|s| !(s.suspicious && s.is_jittered)));
    }

    #[test]
    fn test_clusters_are_seed_centred_and_ordered() {
        // Point 2 is near point 1 but not near seed 0
        let points = vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.0, 0.00008),
            GpsPoint::new(0.0, 0.00016),
            GpsPoint::new(0.0, 0.00005),
        ];
        let clusters = find_clusters(&points, 0.0001);
        assert_eq!(clusters, vec![vec![0, 1, 3], vec![2]]);
    }

    #[test]
    fn test_revisited_location_joins_earlier_cluster() {
        let points = vec![
            GpsPoint::new(24.0, 46.0),
            GpsPoint::new(24.5, 46.0),
            GpsPoint::new(24.00001, 46.0),
        ];
        assert_eq!(find_clusters(&points, 0.0001), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_empty_input() {
        assert!(declutter(Vec::new(), &DeclutterConfig::default()).is_empty());
        assert!(find_clusters(&[], 0.0001).is_empty());
    }
}
