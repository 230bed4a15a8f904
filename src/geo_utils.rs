//! # Geographic Utilities
//!
//! Geographic computations shared by the filter, detector, declutterer and
//! route reconstructor.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`degree_distance`] | Straight-line distance in raw degrees (coarse proximity test) |
//! | [`polyline_length`] | Total length of a GPS track in meters |
//! | [`compute_center`] | Arithmetic centroid of a set of points |
//! | [`offset_on_circle`] | Point on a circle of a given radius in degrees |
//!
//! ## Example
//!
//! ```rust
//! use route_tracker::{GpsPoint, geo_utils};
//!
//! let london = GpsPoint::new(51.5074, -0.1278);
//! let paris = GpsPoint::new(48.8566, 2.3522);
//!
//! let dist = geo_utils::haversine_distance(&london, &paris);
//! assert!((dist - 343_500.0).abs() < 2_000.0);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! Distances are computed on a sphere of radius 6,371,000 m. Every threshold in
//! the crate (filter spacing, anomaly speeds, route reduction) is expressed
//! against this radius, so it is fixed here rather than taken from `geo`,
//! whose mean radius differs slightly.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)

use geo::{Centroid, Distance, Euclidean, MultiPoint, Point};
use crate::GpsPoint;

/// Earth radius used for all great-circle distances, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters along the Earth's surface.
///
/// # Example
///
/// ```rust
/// use route_tracker::{GpsPoint, geo_utils};
///
/// let a = GpsPoint::new(0.0, 0.0);
/// let b = GpsPoint::new(0.0, 1.0);
///
/// // One degree of longitude at the equator
/// let d = geo_utils::haversine_distance(&a, &b);
/// assert!((d - 111_195.0).abs() < 1.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lng = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Straight-line distance between two points in raw degrees.
///
/// Not a real distance: longitude degrees shrink with latitude. Good enough
/// for "are these two markers on top of each other" at a ~10 m scale.
#[inline]
pub fn degree_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    Euclidean::distance(to_geo(p1), to_geo(p2))
}

/// Calculate the total length of a polyline in meters.
///
/// Empty or single-point tracks return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Center/Offset Functions
// =============================================================================

/// Compute the arithmetic centroid (mean latitude, mean longitude) of a set of points.
///
/// Returns `None` for empty input. Suitable for small areas only; no care is
/// taken around the antimeridian.
///
/// # Example
///
/// ```rust
/// use route_tracker::{GpsPoint, geo_utils};
///
/// let points = vec![
///     GpsPoint::new(51.50, -0.10),
///     GpsPoint::new(51.52, -0.12),
/// ];
///
/// let center = geo_utils::compute_center(&points).unwrap();
/// assert!((center.latitude - 51.51).abs() < 0.001);
/// assert!((center.longitude - (-0.11)).abs() < 0.001);
/// ```
pub fn compute_center(points: &[GpsPoint]) -> Option<GpsPoint> {
    let multi: MultiPoint<f64> = points.iter().map(to_geo).collect();
    multi.centroid().map(|c| GpsPoint::new(c.y(), c.x()))
}

/// Point at `angle` radians on a circle of `radius_degrees` around `center`.
///
/// Latitude follows the sine, longitude the cosine.
#[inline]
pub fn offset_on_circle(center: &GpsPoint, radius_degrees: f64, angle: f64) -> GpsPoint {
    GpsPoint::new(
        center.latitude + radius_degrees * angle.sin(),
        center.longitude + radius_degrees * angle.cos(),
    )
}

#[inline]
fn to_geo(p: &GpsPoint) -> Point<f64> {
    Point::new(p.longitude, p.latitude)
}

// =============================================================================
// Unit Tests
// =============================================================================
