//! Latest-result publication and pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::result::DetectionResult;

/// Holds the most recently completed detection result.
///
/// Publishing replaces the whole `Arc`, so readers either see the previous
/// result or the new one, never a partial write.
#[derive(Debug, Default)]
pub struct ResultSlot {
    latest: RwLock<Option<Arc<DetectionResult>>>,
    published: AtomicU64,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current result
    pub fn publish(&self, result: DetectionResult) {
        let result = Arc::new(result);
        *self.latest.write() = Some(result);
        self.published.fetch_add(1, Ordering::Release);
    }

    /// Snapshot of the newest result, `None` until the first publish
    pub fn latest(&self) -> Option<Arc<DetectionResult>> {
        self.latest.read().clone()
    }

    /// Number of results published so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

/// Why a frame was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Another frame is inside the engine call
    Busy,
    /// The pipeline is paused
    Paused,
    /// The worker thread is not running
    WorkerStopped,
}

/// Pipeline counters, updated lock-free from the capture and worker threads
#[derive(Debug, Default)]
pub struct PipelineStats {
    seen: AtomicU64,
    admitted: AtomicU64,
    dropped_busy: AtomicU64,
    dropped_paused: AtomicU64,
    dropped_stopped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl PipelineStats {
    pub fn record_seen(&self) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Busy => &self.dropped_busy,
            DropReason::Paused => &self.dropped_paused,
            DropReason::WorkerStopped => &self.dropped_stopped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// An engine call finished, successfully or not
    pub fn record_processed(&self, success: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            seen: self.seen.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
            dropped_paused: self.dropped_paused.load(Ordering::Relaxed),
            dropped_stopped: self.dropped_stopped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub seen: u64,
    pub admitted: u64,
    pub dropped_busy: u64,
    pub dropped_paused: u64,
    pub dropped_stopped: u64,
    pub processed: u64,
    pub failed: u64,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_busy + self.dropped_paused + self.dropped_stopped
    }
}
