//! Build a map view for one recorded day, entirely offline.
//!
//! Run with: cargo run --example day_map

use async_trait::async_trait;
use chrono::NaiveDate;
use route_tracker::{
    build_map_view, geo_utils, pipeline::MapViewConfig, DirectionsLeg, DirectionsProvider, GpsPoint,
    MapView, Result, SampleSource, TrackPoint, TravelMode,
};

/// Stand-in for the host's day query.
struct RecordedDay(Vec<TrackPoint>);

#[async_trait]
impl SampleSource for RecordedDay {
    async fn fetch_day(&self, _subject_id: &str, _date: NaiveDate) -> Result<Vec<TrackPoint>> {
        Ok(self.0.clone())
    }
}

/// Routes in straight lines at 40 km/h.
struct StraightLines;

#[async_trait]
impl DirectionsProvider for StraightLines {
    async fn route(
        &self,
        origin: GpsPoint,
        destination: GpsPoint,
        waypoints: &[GpsPoint],
        _mode: TravelMode,
    ) -> Result<DirectionsLeg> {
        let mut path = vec![origin];
        path.extend_from_slice(waypoints);
        path.push(destination);
        let distance = geo_utils::polyline_length(&path);
        Ok(DirectionsLeg { path, distance_meters: distance, duration_seconds: distance / 11.1 })
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    // A technician's morning in Riyadh
    let mut day = vec![
        TrackPoint::at(24.7136, 46.6753, 0),
        TrackPoint::at(24.71361, 46.67531, 60),
        TrackPoint::at(24.71359, 46.67529, 120),
        TrackPoint::at(24.7200, 46.6850, 900),
        TrackPoint::at(24.7350, 46.6950, 1500),
        TrackPoint::at(25.3000, 46.6950, 1560), // GPS glitch
        TrackPoint::at(24.7400, 46.7000, 2100),
    ];
    day[3].label = Some("Customer: Al Noor Clinic".to_string());

    let date = NaiveDate::from_ymd_opt(2024, 3, 11).expect("valid date");
    let view = build_map_view(
        &RecordedDay(day),
        &StraightLines,
        "emp-42",
        date,
        &MapViewConfig::default(),
    )
    .await
    .expect("offline sources never fail");

    match view {
        MapView::Empty(reason) => println!("{}", reason.message()),
        MapView::Ready(map) => {
            println!("Day map for {} on {}\n", map.subject_id, map.date);
            for (i, s) in map.samples.iter().enumerate() {
                println!(
                    "  #{} {:.5},{:.5}{}{}",
                    i,
                    s.display_latitude,
                    s.display_longitude,
                    if s.is_jittered { " (jittered)" } else { "" },
                    s.suspicious_reason
                        .as_deref()
                        .map(|r| format!(" SUSPICIOUS: {}", r))
                        .unwrap_or_default(),
                );
            }
            println!(
                "\n{} suspicious, route {:.1} km / {:.0} min over {} requests",
                map.suspicious_count,
                map.route.total_distance_meters / 1000.0,
                map.route.total_duration_seconds / 60.0,
                map.route.batches_requested
            );
        }
    }
}
