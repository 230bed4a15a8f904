//! Run a short tracking session against a simulated device and store.
//!
//! Run with: cargo run --example tracking_session

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use route_tracker::{
    GpsSample, LocalBuffer, PersistOutcome, PositionProvider, RawReading, Result, SampleSink,
    SessionConfig, SyncQueue, TrackingSession, TrackingType,
};

/// Drives east ~100 m per fix, with every fourth fix a poor one.
#[derive(Default)]
struct SimulatedDevice {
    fixes: AtomicI64,
}

#[async_trait]
impl PositionProvider for SimulatedDevice {
    async fn current_position(&self) -> Result<RawReading> {
        let n = self.fixes.fetch_add(1, Ordering::SeqCst);
        let accuracy = if n % 4 == 3 { 120.0 } else { 8.0 };
        Ok(RawReading::new(Utc::now(), 24.7136, 46.6753 + n as f64 * 0.001, Some(accuracy)))
    }
}

struct PrintingStore;

#[async_trait]
impl SampleSink for PrintingStore {
    async fn persist(&self, sample: &GpsSample) -> Result<PersistOutcome> {
        println!(
            "  upload {} {:.5},{:.5} ({})",
            sample.id,
            sample.latitude,
            sample.longitude,
            sample.tracking_type.as_str()
        );
        Ok(PersistOutcome::Recorded)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let buffer = Arc::new(LocalBuffer::open_in_memory()?);
    let queue = Arc::new(SyncQueue::new(Arc::clone(&buffer), Arc::new(PrintingStore)));
    let config = SessionConfig {
        sample_interval: Duration::from_millis(200),
        sync_interval: Duration::from_secs(1),
        ..SessionConfig::default()
    };

    let mut session = TrackingSession::new("emp-42", config, queue, Arc::new(SimulatedDevice::default()));
    session.start()?;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    session
        .record_special(
            RawReading::new(Utc::now(), 24.7140, 46.6800, Some(5.0)),
            TrackingType::CallStart,
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let report = session.stop().await?;
    println!(
        "\nFinal flush: {} uploaded, {} failed, {} still pending",
        report.synced(),
        report.failed,
        buffer.pending_count()?
    );
    Ok(())
}
