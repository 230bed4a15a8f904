//! Best-effort upload of buffered samples to the remote store.
//!
//! Uploads are serialized in insertion order within one invocation, so the
//! remote store sees samples in the order the detector expects. A sample that
//! fails to upload stays pending for the next cycle and does not hold back the
//! samples after it. A "duplicate" answer from the sink counts as success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::buffer::{run_blocking, LocalBuffer};
use crate::error::Result;
use crate::GpsSample;

/// How the remote store acknowledged a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Recorded,
    /// Already recorded by an earlier upload
    Duplicate,
}

/// Outbound write: persist one sample remotely. Must be idempotent.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn persist(&self, sample: &GpsSample) -> Result<PersistOutcome>;
}

/// Summary of one [`SyncQueue::sync_batch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: u32,
    pub recorded: u32,
    pub duplicates: u32,
    pub failed: u32,
    /// Another sync was already running; nothing was sent
    pub skipped_in_flight: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self { skipped_in_flight: true, ..Self::default() }
    }

    pub fn synced(&self) -> u32 {
        self.recorded + self.duplicates
    }
}

/// Clears the in-flight flag even if the sync future is dropped mid-way.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sync queue over one local buffer.
pub struct SyncQueue {
    buffer: Arc<LocalBuffer>,
    sink: Arc<dyn SampleSink>,
    in_flight: AtomicBool,
}

impl SyncQueue {
    pub fn new(buffer: Arc<LocalBuffer>, sink: Arc<dyn SampleSink>) -> Self {
        Self {
            buffer,
            sink,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn buffer(&self) -> &Arc<LocalBuffer> {
        &self.buffer
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Upload every pending sample once.
    ///
    /// Transport failures are logged and leave the sample pending; they never
    /// surface as an error. Only a failure to read the local buffer does.
    /// A call made while another is in flight returns immediately with
    /// `skipped_in_flight` set.
    pub async fn sync_batch(&self) -> Result<SyncReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[SyncQueue] Sync already in flight, skipping");
            return Ok(SyncReport::skipped());
        }
        let _guard = InFlightGuard(&self.in_flight);

        let pending = run_blocking(&self.buffer, LocalBuffer::pending).await?;
        if pending.is_empty() {
            return Ok(SyncReport::default());
        }

        let start = Instant::now();
        let mut report = SyncReport::default();

        for sample in &pending {
            report.attempted += 1;
            match self.sink.persist(sample).await {
                Ok(outcome) => {
                    match outcome {
                        PersistOutcome::Recorded => report.recorded += 1,
                        PersistOutcome::Duplicate => {
                            debug!("[SyncQueue] {} already recorded remotely", sample.id);
                            report.duplicates += 1
                        }
                    }
                    let id = sample.id;
                    if let Err(e) = run_blocking(&self.buffer, move |b| b.mark_synced(&id)).await {
                        // Uploaded but not marked: the next cycle gets a duplicate, which is fine
                        warn!("[SyncQueue] Failed to mark {} synced: {}", sample.id, e);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("[SyncQueue] Upload of {} failed, will retry: {}", sample.id, e);
                }
            }
        }

        info!(
            "[SyncQueue] {}/{} synced ({} duplicates, {} failed) in {:?}",
            report.synced(),
            report.attempted,
            report.duplicates,
            report.failed,
            start.elapsed()
        );

        Ok(report)
    }
}
