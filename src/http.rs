//! HTTP adapters for the directions provider and the remote sample store.
//!
//! - [`OsrmDirections`]: routes batches through an OSRM-compatible
//!   `/route/v1/{profile}/` endpoint, with dispatch rate limiting and retry
//!   with exponential backoff on 429 and transport errors
//! - [`RemoteStore`]: JSON endpoints for the day query and the per-sample write

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Result, TrackerError};
use crate::pipeline::SampleSource;
use crate::route::{DirectionsLeg, DirectionsProvider, TravelMode};
use crate::sync::{PersistOutcome, SampleSink};
use crate::{GpsPoint, GpsSample, TrackPoint};

/// Configuration for [`OsrmDirections`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionsConfig {
    /// Server root, without trailing slash. Default: public OSRM demo server
    pub base_url: String,
    /// Minimum spacing between request starts. Default: 100ms
    pub dispatch_interval: Duration,
    /// Retries on 429 or transport errors. Default: 3
    pub max_retries: u32,
    /// Default: 30 seconds
    pub request_timeout: Duration,
}

impl Default for DirectionsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://router.project-osrm.org".to_string(),
            dispatch_interval: Duration::from_millis(100),
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// API response for the route endpoint
#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// [lng, lat] pairs
    coordinates: Vec<[f64; 2]>,
}

/// Backoff exponents stop growing after this many doublings.
const MAX_BACKOFF_EXPONENT: u32 = 3;

/// `base * 2^attempt`, with the exponent capped.
fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
}

/// Spaces out request starts by a fixed interval and tracks 429 streaks.
struct DispatchRateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
    dispatched: AtomicU32,
    throttled_streak: AtomicU32,
}

impl DispatchRateLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
            dispatched: AtomicU32::new(0),
            throttled_streak: AtomicU32::new(0),
        }
    }

    /// Claim the next free slot and sleep until it opens. Returns the dispatch number.
    async fn acquire(&self) -> u32 {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        let number = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;

        if slot > Instant::now() {
            debug!("[Directions #{}] Waiting {:?} for slot", number, slot.saturating_duration_since(Instant::now()));
            tokio::time::sleep_until(slot).await;
        }
        number
    }

    fn reset_backoff(&self) {
        self.throttled_streak.store(0, Ordering::Relaxed);
    }

    /// Backoff after a 429: 1s, 2s, then 4s while the streak lasts.
    fn throttled(&self) -> Duration {
        let streak = self.throttled_streak.fetch_add(1, Ordering::Relaxed) + 1;
        let backoff = retry_backoff(Duration::from_millis(500), streak);
        warn!("[Directions] Throttled ({} in a row), backing off {:?}", streak, backoff);
        backoff
    }
}

fn osrm_profile(mode: TravelMode) -> &'static str {
    match mode {
        TravelMode::Driving => "driving",
        TravelMode::Walking => "walking",
        TravelMode::Cycling => "cycling",
    }
}

fn build_route_url(base_url: &str, points: &[GpsPoint], mode: TravelMode) -> String {
    let coords: Vec<String> = points
        .iter()
        .map(|p| format!("{:.6},{:.6}", p.longitude, p.latitude))
        .collect();
    format!(
        "{}/route/v1/{}/{}?overview=full&geometries=geojson",
        base_url.trim_end_matches('/'),
        osrm_profile(mode),
        coords.join(";")
    )
}

fn parse_route_response(bytes: &[u8]) -> Result<DirectionsLeg> {
    let data: OsrmResponse = serde_json::from_slice(bytes)
        .map_err(|e| TrackerError::Transport(format!("JSON parse error: {}", e)))?;

    if data.code != "Ok" {
        if let Some(message) = &data.message {
            debug!("[Directions] {}: {}", data.code, message);
        }
        return Err(TrackerError::Provider { status: data.code });
    }

    let Some(route) = data.routes.into_iter().next() else {
        return Err(TrackerError::Provider { status: "NoRoute".to_string() });
    };

    Ok(DirectionsLeg {
        path: route
            .geometry
            .coordinates
            .into_iter()
            .map(|[lng, lat]| GpsPoint::new(lat, lng))
            .collect(),
        distance_meters: route.distance,
        duration_seconds: route.duration,
    })
}

/// Directions client for OSRM-compatible servers.
pub struct OsrmDirections {
    client: Client,
    config: DirectionsConfig,
    rate_limiter: Arc<DispatchRateLimiter>,
}

impl OsrmDirections {
    pub fn new(config: DirectionsConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            rate_limiter: Arc::new(DispatchRateLimiter::new(config.dispatch_interval)),
            config,
        })
    }
}

#[async_trait]
impl DirectionsProvider for OsrmDirections {
    async fn route(
        &self,
        origin: GpsPoint,
        destination: GpsPoint,
        waypoints: &[GpsPoint],
        mode: TravelMode,
    ) -> Result<DirectionsLeg> {
        let mut points = Vec::with_capacity(waypoints.len() + 2);
        points.push(origin);
        points.extend_from_slice(waypoints);
        points.push(destination);
        let url = build_route_url(&self.config.base_url, &points, mode);

        let mut retries = 0;
        let req_start = Instant::now();

        loop {
            let dispatch_num = self.rate_limiter.acquire().await;

            match self.client.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > self.config.max_retries {
                            return Err(TrackerError::Provider {
                                status: "Max retries exceeded (429)".to_string(),
                            });
                        }
                        let wait = self.rate_limiter.throttled();
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    self.rate_limiter.reset_backoff();

                    // OSRM reports NoRoute/InvalidQuery with 400 and a JSON body
                    let bytes = resp.bytes().await?;
                    if !status.is_success() && status != StatusCode::BAD_REQUEST {
                        return Err(TrackerError::Provider { status: format!("HTTP {}", status) });
                    }

                    let leg = parse_route_response(&bytes)?;
                    info!(
                        "[Directions #{}] {} points -> {} path points, {:.0}m in {:?}",
                        dispatch_num,
                        points.len(),
                        leg.path.len(),
                        leg.distance_meters,
                        req_start.elapsed()
                    );
                    return Ok(leg);
                }
                Err(e) => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        return Err(TrackerError::Transport(format!("Request error: {}", e)));
                    }

                    let wait = retry_backoff(Duration::from_millis(200), retries);
                    warn!("[Directions] Error: {}, retry {} after {:?}", e, retries, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

// ============================================================================
// Remote sample store
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct PersistResponse {
    #[serde(default)]
    duplicate: bool,
}

#[derive(Debug, Deserialize)]
struct DayResponse {
    #[serde(default)]
    tracking_disabled: bool,
    #[serde(default)]
    samples: Vec<TrackPoint>,
}

fn parse_persist_response(status: StatusCode, bytes: &[u8]) -> Result<PersistOutcome> {
    if status == StatusCode::CONFLICT {
        return Ok(PersistOutcome::Duplicate);
    }
    if !status.is_success() {
        return Err(TrackerError::Transport(format!("HTTP {}", status)));
    }
    // Empty body is a plain success
    let body: PersistResponse = if bytes.is_empty() {
        PersistResponse::default()
    } else {
        serde_json::from_slice(bytes).map_err(|e| TrackerError::Transport(format!("JSON parse error: {}", e)))?
    };
    Ok(if body.duplicate { PersistOutcome::Duplicate } else { PersistOutcome::Recorded })
}

fn parse_day_response(subject_id: &str, status: StatusCode, bytes: &[u8]) -> Result<Vec<TrackPoint>> {
    if status == StatusCode::FORBIDDEN {
        return Err(TrackerError::TrackingDisabled { subject_id: subject_id.to_string() });
    }
    if !status.is_success() {
        return Err(TrackerError::Transport(format!("HTTP {}", status)));
    }
    let body: DayResponse =
        serde_json::from_slice(bytes).map_err(|e| TrackerError::Transport(format!("JSON parse error: {}", e)))?;
    if body.tracking_disabled {
        return Err(TrackerError::TrackingDisabled { subject_id: subject_id.to_string() });
    }
    Ok(body.samples)
}

/// JSON client for the host's sample store.
///
/// - `POST {base}/api/gps/samples` persists one sample; `409` or
///   `{"duplicate": true}` means it was already recorded
/// - `GET {base}/api/gps/subjects/{id}/samples?date=YYYY-MM-DD` returns
///   `{"samples": [...]}`; `403` or `{"tracking_disabled": true}` means
///   tracking is off for the subject
pub struct RemoteStore {
    client: Client,
    base_url: Url,
    auth_header: Option<String>,
}

impl RemoteStore {
    pub fn new(base_url: &str, api_token: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let parsed = Url::parse(base_url).map_err(|e| TrackerError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(TrackerError::InvalidUrl(format!("{} cannot carry a path", base_url)));
        }

        Ok(Self {
            client,
            base_url: parsed,
            auth_header: api_token.map(|t| format!("Bearer {}", t)),
        })
    }

    /// Base URL extended by `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TrackerError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn day_url(&self, subject_id: &str, date: NaiveDate) -> Result<Url> {
        let mut url = self.endpoint(&["api", "gps", "subjects", subject_id, "samples"])?;
        url.query_pairs_mut()
            .append_pair("date", &date.format("%Y-%m-%d").to_string());
        Ok(url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_header {
            Some(header) => builder.header("Authorization", header),
            None => builder,
        }
    }
}

#[async_trait]
impl SampleSink for RemoteStore {
    async fn persist(&self, sample: &GpsSample) -> Result<PersistOutcome> {
        let url = self.endpoint(&["api", "gps", "samples"])?;
        let resp = self.authed(self.client.post(url)).json(sample).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        parse_persist_response(status, &bytes)
    }
}

#[async_trait]
impl SampleSource for RemoteStore {
    async fn fetch_day(&self, subject_id: &str, date: NaiveDate) -> Result<Vec<TrackPoint>> {
        let url = self.day_url(subject_id, date)?;
        let resp = self.authed(self.client.get(url)).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        parse_day_response(subject_id, status, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_slots_follow_configured_interval() {
        let interval = DirectionsConfig::default().dispatch_interval;
        let limiter = DispatchRateLimiter::new(interval);
        let start = Instant::now();

        assert_eq!(limiter.acquire().await, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert_eq!(limiter.acquire().await, 2);
        assert_eq!(limiter.acquire().await, 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= interval * 2 && elapsed < interval * 2 + Duration::from_millis(5), "{:?}", elapsed);

        // An idle gap longer than the interval leaves the next slot open
        tokio::time::sleep(interval * 5).await;
        let before = Instant::now();
        assert_eq!(limiter.acquire().await, 4);
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        let base = Duration::from_millis(200);
        assert_eq!(retry_backoff(base, 1), Duration::from_millis(400));
        assert_eq!(retry_backoff(base, 3), Duration::from_millis(1600));
        assert_eq!(retry_backoff(base, 58), Duration::from_millis(1600));
        assert_eq!(retry_backoff(base, u32::MAX), Duration::from_millis(1600));
    }

    #[test]
    fn test_throttle_streak_resets() {
        let limiter = DispatchRateLimiter::new(Duration::from_millis(100));
        assert_eq!(limiter.throttled(), Duration::from_secs(1));
        assert_eq!(limiter.throttled(), Duration::from_secs(2));
        assert_eq!(limiter.throttled(), Duration::from_secs(4));
        assert_eq!(limiter.throttled(), Duration::from_secs(4));
        limiter.reset_backoff();
        assert_eq!(limiter.throttled(), Duration::from_secs(1));
    }

    #[test]
    fn test_store_urls_encode_subject_id() {
        let store = RemoteStore::new("https://store.example.com/", None).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();

        let url = store.day_url("team/7#a", date).unwrap();
        assert_eq!(
            url.as_str(),
            "https://store.example.com/api/gps/subjects/team%2F7%23a/samples?date=2024-03-11"
        );
        assert_eq!(url.path_segments().unwrap().count(), 5);

        let url = store.day_url("emp 1?x", date).unwrap();
        assert_eq!(url.query(), Some("date=2024-03-11"));
        assert!(url.fragment().is_none());

        assert_eq!(
            store.endpoint(&["api", "gps", "samples"]).unwrap().as_str(),
            "https://store.example.com/api/gps/samples"
        );
    }

    #[test]
    fn test_store_base_url_with_prefix() {
        let store = RemoteStore::new("https://example.com/tracker", None).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert_eq!(
            store.day_url("emp-1", date).unwrap().as_str(),
            "https://example.com/tracker/api/gps/subjects/emp-1/samples?date=2024-03-11"
        );
        assert!(matches!(RemoteStore::new("not a url", None), Err(TrackerError::InvalidUrl(_))));
    }

    #[test]
    fn test_route_url() {
        let url = build_route_url(
            "https://osrm.example.com/",
            &[GpsPoint::new(24.7, 46.67), GpsPoint::new(24.71, 46.68)],
            TravelMode::Walking,
        );
        assert_eq!(
            url,
            "https://osrm.example.com/route/v1/walking/46.670000,24.700000;46.680000,24.710000?overview=full&geometries=geojson"
        );
    }

    #[test]
    fn test_parse_route_ok() {
        let body = br#"{
            "code": "Ok",
            "routes": [{
                "distance": 1523.4,
                "duration": 210.9,
                "geometry": {"type": "LineString", "coordinates": [[46.67, 24.70], [46.675, 24.705], [46.68, 24.71]]}
            }],
            "waypoints": []
        }"#;
        let leg = parse_route_response(body).unwrap();
        assert_eq!(leg.path.len(), 3);
        assert_eq!(leg.path[0], GpsPoint::new(24.70, 46.67));
        assert_eq!(leg.distance_meters, 1523.4);
        assert_eq!(leg.duration_seconds, 210.9);
    }

    #[test]
    fn test_parse_route_provider_status() {
        let body = br#"{"code": "NoRoute", "message": "Impossible route between points"}"#;
        match parse_route_response(body) {
            Err(TrackerError::Provider { status }) => assert_eq!(status, "NoRoute"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_persist() {
        assert_eq!(parse_persist_response(StatusCode::CREATED, b"").unwrap(), PersistOutcome::Recorded);
        assert_eq!(
            parse_persist_response(StatusCode::OK, br#"{"duplicate": true}"#).unwrap(),
            PersistOutcome::Duplicate
        );
        assert_eq!(parse_persist_response(StatusCode::CONFLICT, b"").unwrap(), PersistOutcome::Duplicate);
        assert!(parse_persist_response(StatusCode::BAD_GATEWAY, b"").unwrap_err().is_retryable());
    }

    #[test]
    fn test_parse_day() {
        let body = br#"{"samples": [
            {"timestamp": "2024-03-11T08:00:00Z", "latitude": 24.7, "longitude": 46.67, "accuracy": 6.0},
            {"timestamp": null, "latitude": 24.71, "longitude": 46.68, "tracking_type": "call_start", "label": "ACME"}
        ]}"#;
        let samples = parse_day_response("emp-1", StatusCode::OK, body).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].timestamp.is_some());
        assert!(samples[1].timestamp.is_none());
        assert_eq!(samples[1].tracking_type, crate::TrackingType::CallStart);
        assert_eq!(samples[1].label.as_deref(), Some("ACME"));
    }

    #[test]
    fn test_parse_day_disabled() {
        assert!(matches!(
            parse_day_response("emp-1", StatusCode::FORBIDDEN, b""),
            Err(TrackerError::TrackingDisabled { .. })
        ));
        assert!(matches!(
            parse_day_response("emp-1", StatusCode::OK, br#"{"tracking_disabled": true}"#),
            Err(TrackerError::TrackingDisabled { .. })
        ));
    }
}
