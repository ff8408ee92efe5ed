//! Detection State Store
//!
//! Holds the state the pipeline publishes: the last accepted detection batch, the
//! completed-cycle counter and rate, the camera connection status and the coarse
//! error. Every mutation is one critical section, so readers never see a torn record.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Local};

use crate::module::vision::detector::{Detection, DetectionBatch};

/// Camera connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Coarse error kinds exposed outside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("CAMERA_ACCESS_DENIED")]
    CameraAccessDenied,
    #[error("AI_SERVICE_OFFLINE")]
    ServiceUnreachable,
}

/// What happened to a completed detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The outcome was written.
    Applied,
    /// A request with a higher sequence number already completed.
    Stale,
    /// The view was torn down.
    Detached,
}

/// A consistent copy of the store for readers.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub detections: Arc<DetectionBatch>,
    pub completed_cycles: u64,
    pub fps: f64,
    pub status: ConnectionStatus,
    pub error: Option<PipelineError>,
    pub last_seq: u64,
    pub updated_at: Option<DateTime<Local>>,
}

struct StoreInner {
    detections: Arc<DetectionBatch>,
    completed_cycles: u64,
    fps: f64,
    started_at: Instant,
    status: ConnectionStatus,
    error: Option<PipelineError>,
    last_seq: u64,
    updated_at: Option<DateTime<Local>>,
    mounted: bool,
}

/// Shared handle to the store. Clones point at the same record.
///
#[derive(Clone)]
pub struct DetectionStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for DetectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionStore {
    /// Empty store; the rate clock starts now.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                detections: Arc::new(Vec::new()),
                completed_cycles: 0,
                fps: 0.0,
                started_at: Instant::now(),
                status: ConnectionStatus::Disconnected,
                error: None,
                last_seq: 0,
                updated_at: None,
                mounted: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the outcome of detection request `seq`.
    ///
    /// Only a completion with a sequence number above every earlier completion may
    /// write. A success replaces the batch, bumps the counter, recomputes the rate and
    /// clears a service error. A failure keeps the batch and raises `ServiceUnreachable`
    /// unless a camera error is showing.
    pub fn commit(&self, seq: u64, outcome: Result<DetectionBatch, PipelineError>) -> Commit {
        let mut inner = self.lock();
        if !inner.mounted {
            return Commit::Detached;
        }
        if seq <= inner.last_seq {
            return Commit::Stale;
        }
        inner.last_seq = seq;
        match outcome {
            Ok(batch) => {
                inner.detections = Arc::new(batch);
                inner.completed_cycles += 1;
                let elapsed = inner.started_at.elapsed().as_secs_f64();
                inner.fps = frame_rate(inner.completed_cycles, elapsed);
                inner.updated_at = Some(Local::now());
                if inner.error == Some(PipelineError::ServiceUnreachable) {
                    inner.error = None;
                }
            }
            Err(e) => {
                if inner.error != Some(PipelineError::CameraAccessDenied) {
                    inner.error = Some(e);
                }
            }
        }
        Commit::Applied
    }

    /// The capture device was requested.
    pub fn camera_connecting(&self) {
        let mut inner = self.lock();
        inner.status = ConnectionStatus::Connecting;
    }

    /// The first frame was decoded.
    pub fn camera_connected(&self) {
        let mut inner = self.lock();
        if inner.status != ConnectionStatus::Connecting {
            return;
        }
        inner.status = ConnectionStatus::Connected;
        if inner.error == Some(PipelineError::CameraAccessDenied) {
            inner.error = None;
        }
    }

    /// Access was denied or the device failed.
    pub fn camera_failed(&self) {
        let mut inner = self.lock();
        inner.status = ConnectionStatus::Disconnected;
        inner.error = Some(PipelineError::CameraAccessDenied);
    }

    /// Mark the view torn down. Later commits do nothing.
    pub fn detach(&self) {
        self.lock().mounted = false;
    }

    pub fn is_mounted(&self) -> bool {
        self.lock().mounted
    }

    /// Copy the current record.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.lock();
        StoreSnapshot {
            detections: inner.detections.clone(),
            completed_cycles: inner.completed_cycles,
            fps: inner.fps,
            status: inner.status,
            error: inner.error,
            last_seq: inner.last_seq,
            updated_at: inner.updated_at,
        }
    }

    /// Just the current batch, for the renderer.
    pub fn detections(&self) -> Arc<Vec<Detection>> {
        self.lock().detections.clone()
    }
}

/// Completed cycles per elapsed second.
pub fn frame_rate(completed_cycles: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    completed_cycles as f64 / elapsed_secs
}
