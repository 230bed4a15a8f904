//! Reconstruct a driving route through an OSRM server.
//!
//! Run with: cargo run --example osrm_route --features http

use route_tracker::{route, DirectionsConfig, GpsPoint, OsrmDirections, RouteConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let base_url = std::env::var("OSRM_URL").unwrap_or_else(|_| DirectionsConfig::default().base_url);
    let directions = match OsrmDirections::new(DirectionsConfig { base_url, ..DirectionsConfig::default() }) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to create directions client: {}", e);
            return;
        }
    };

    // Sparse samples across central Berlin, every ~150 m
    let samples: Vec<GpsPoint> = (0..60)
        .map(|i| GpsPoint::new(52.5200 + i as f64 * 0.0009, 13.4050 + (i % 7) as f64 * 0.0004))
        .collect();

    let config = RouteConfig::default();
    let reduced = route::reduce_waypoints(&samples, config.min_spacing_meters);
    println!("{} samples reduced to {} waypoints", samples.len(), reduced.len());

    let result = route::reconstruct(&samples, &directions, &config).await;
    println!(
        "Route: {} path points, {:.2} km, {:.0} min ({} of {} requests failed)",
        result.path.len(),
        result.total_distance_meters / 1000.0,
        result.total_duration_seconds / 60.0,
        result.batches_failed,
        result.batches_requested
    );
}
