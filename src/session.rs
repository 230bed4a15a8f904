//! Tracking session lifecycle.
//!
//! A [`TrackingSession`] owns everything that used to be ambient state: the
//! last accepted sample, the periodic sampling and sync timers, and the
//! cancellation handle. `start()` resets the last accepted sample and spawns
//! one task driving both timers; `stop()` cancels it, waits for it to finish
//! and performs a final sync flush.
//!
//! Device position requests are bounded by `position_timeout`. A timed-out or
//! failed request is logged and the next tick tries again.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::buffer::run_blocking;
use crate::error::{Result, TrackerError};
use crate::filter::{evaluate, FilterConfig, RawReading};
use crate::sync::{SyncQueue, SyncReport};
use crate::{GpsSample, TrackingType};

/// Source of device position fixes.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn current_position(&self) -> Result<RawReading>;
}

/// Timers and filter settings for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often a position fix is requested. Default: 60 seconds
    pub sample_interval: Duration,
    /// How often pending samples are uploaded. Default: 300 seconds
    pub sync_interval: Duration,
    /// Upper bound on one position request. Default: 10 seconds
    pub position_timeout: Duration,
    pub filter: FilterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(60),
            sync_interval: Duration::from_secs(300),
            position_timeout: Duration::from_secs(10),
            filter: FilterConfig::default(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    started_at: Option<DateTime<Utc>>,
    last_accepted: Option<GpsSample>,
}

/// State shared between the session handle and its timer task.
struct SessionCore {
    subject_id: String,
    config: SessionConfig,
    queue: Arc<SyncQueue>,
    positions: Arc<dyn PositionProvider>,
    state: Mutex<SessionState>,
    record_lock: AsyncMutex<()>,
}

impl SessionCore {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Filter a reading against the last accepted sample and buffer it.
    ///
    /// `record_lock` is held from the filter decision until `last_accepted`
    /// is updated, so timer and manual readings never race on it.
    async fn record_reading(&self, reading: RawReading) -> Result<Option<GpsSample>> {
        let _serial = self.record_lock.lock().await;
        let decision = {
            let state = self.state();
            if state.started_at.is_none() {
                return Err(TrackerError::SessionInactive);
            }
            evaluate(&reading, state.last_accepted.as_ref(), &self.config.filter)
        };
        if !decision.is_accept() {
            debug!("[TrackingSession] {} dropped reading: {:?}", self.subject_id, decision);
            return Ok(None);
        }

        let sample = GpsSample::new(
            &self.subject_id,
            reading.timestamp,
            reading.point(),
            reading.accuracy,
            TrackingType::Route,
        );
        self.append(&sample).await?;
        debug!("[TrackingSession] {} recorded {} ({:?})", self.subject_id, sample.id, decision);
        self.state().last_accepted = Some(sample.clone());
        Ok(Some(sample))
    }

    async fn record_special(&self, reading: RawReading, tracking_type: TrackingType) -> Result<GpsSample> {
        let _serial = self.record_lock.lock().await;
        if self.state().started_at.is_none() {
            return Err(TrackerError::SessionInactive);
        }

        let sample = GpsSample::new(
            &self.subject_id,
            reading.timestamp,
            reading.point(),
            reading.accuracy,
            tracking_type,
        );
        self.append(&sample).await?;
        info!(
            "[TrackingSession] {} recorded {} point {}",
            self.subject_id,
            tracking_type.as_str(),
            sample.id
        );
        self.state().last_accepted = Some(sample.clone());
        Ok(sample)
    }

    async fn append(&self, sample: &GpsSample) -> Result<bool> {
        let sample = sample.clone();
        run_blocking(self.queue.buffer(), move |buffer| buffer.append(&sample)).await
    }

    async fn sample_once(&self) -> Result<Option<GpsSample>> {
        let timeout = self.config.position_timeout;
        let reading = tokio::time::timeout(timeout, self.positions.current_position())
            .await
            .map_err(|_| TrackerError::PositionTimeout(timeout))??;
        self.record_reading(reading).await
    }
}

async fn tracking_loop(core: Arc<SessionCore>, cancel: CancellationToken) {
    let mut sample_tick = interval(core.config.sample_interval);
    sample_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sync_tick = interval_at(Instant::now() + core.config.sync_interval, core.config.sync_interval);
    sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sample_tick.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = core.sample_once() => {
                        if let Err(e) = result {
                            warn!("[TrackingSession] {} sampling failed: {}", core.subject_id, e);
                        }
                    }
                }
            }
            _ = sync_tick.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = core.queue.sync_batch() => {
                        if let Err(e) = result {
                            warn!("[TrackingSession] {} periodic sync failed: {}", core.subject_id, e);
                        }
                    }
                }
            }
        }
    }

    debug!("[TrackingSession] {} timer task exited", core.subject_id);
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// One subject's tracking session.
pub struct TrackingSession {
    core: Arc<SessionCore>,
    worker: Option<Worker>,
}

impl TrackingSession {
    pub fn new(
        subject_id: &str,
        config: SessionConfig,
        queue: Arc<SyncQueue>,
        positions: Arc<dyn PositionProvider>,
    ) -> Self {
        Self {
            core: Arc::new(SessionCore {
                subject_id: subject_id.to_string(),
                config,
                queue,
                positions,
                state: Mutex::new(SessionState::default()),
                record_lock: AsyncMutex::new(()),
            }),
            worker: None,
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.core.subject_id
    }

    pub fn is_active(&self) -> bool {
        self.core.state().started_at.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.core.state().started_at
    }

    pub fn last_accepted(&self) -> Option<GpsSample> {
        self.core.state().last_accepted.clone()
    }

    /// Start sampling and periodic sync. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(TrackerError::SessionActive);
        }

        {
            let mut state = self.core.state();
            state.started_at = Some(Utc::now());
            state.last_accepted = None;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tracking_loop(Arc::clone(&self.core), cancel.clone()));
        self.worker = Some(Worker { handle, cancel });

        info!(
            "[TrackingSession] {} started (sample every {:?}, sync every {:?})",
            self.core.subject_id, self.core.config.sample_interval, self.core.config.sync_interval
        );
        Ok(())
    }

    /// Feed a reading through the filter. Returns the sample if it was recorded.
    pub async fn record_reading(&self, reading: RawReading) -> Result<Option<GpsSample>> {
        self.core.record_reading(reading).await
    }

    /// Record an event point (call start/end) regardless of the movement filter.
    pub async fn record_special(&self, reading: RawReading, tracking_type: TrackingType) -> Result<GpsSample> {
        self.core.record_special(reading, tracking_type).await
    }

    /// Request one position fix now and feed it through the filter.
    pub async fn sample_now(&self) -> Result<Option<GpsSample>> {
        self.core.sample_once().await
    }

    /// Manual sync trigger.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.core.queue.sync_batch().await
    }

    /// Cancel both timers, wait for the task, then flush pending samples once.
    pub async fn stop(&mut self) -> Result<SyncReport> {
        let Some(worker) = self.worker.take() else {
            return Err(TrackerError::SessionInactive);
        };

        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            warn!("[TrackingSession] {} timer task failed to join: {}", self.core.subject_id, e);
        }

        self.core.state().started_at = None;

        let report = self.core.queue.sync_batch().await?;
        info!(
            "[TrackingSession] {} stopped, final flush synced {}/{}",
            self.core.subject_id,
            report.synced(),
            report.attempted
        );
        Ok(report)
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
        }
    }
}
