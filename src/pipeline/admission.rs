//! Frame admission
//!
//! Decides per frame whether it goes to the engine or is dropped on the spot.
//! At most one frame is ever inside the engine call; frames arriving
//! meanwhile are released immediately instead of queuing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use super::worker::{BackgroundWorker, PostError};
use crate::capture::frame::{FrameRef, Rotation};
use crate::engine::result::DetectionResult;
use crate::engine::{EngineImage, EngineSession};
use crate::shared::state::{DropReason, PipelineStats, ResultSlot};

/// Outcome of [`FrameAdmission::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Dropped(DropReason),
}

/// Clears the in-flight flag when dropped, whichever way the task ends
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Admission policy in front of the engine worker
pub struct FrameAdmission {
    worker: Arc<BackgroundWorker>,
    session: Arc<EngineSession>,
    results: Arc<ResultSlot>,
    stats: Arc<PipelineStats>,
    in_flight: Arc<AtomicBool>,
    paused: AtomicBool,
}

impl FrameAdmission {
    pub fn new(
        worker: Arc<BackgroundWorker>,
        session: Arc<EngineSession>,
        results: Arc<ResultSlot>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            worker,
            session,
            results,
            stats,
            in_flight: Arc::new(AtomicBool::new(false)),
            paused: AtomicBool::new(false),
        }
    }

    /// Admit `frame` or drop it. Takes over the caller's reference either way.
    pub fn submit(&self, frame: FrameRef, rotation: Rotation) -> Admission {
        self.stats.record_seen();
        let frame_id = frame.id;

        let admission = self.try_admit(frame, rotation);
        match admission {
            Admission::Admitted => {
                self.stats.record_admitted();
                trace!(frame_id, "frame admitted");
            }
            Admission::Dropped(reason) => {
                self.stats.record_dropped(reason);
                trace!(frame_id, ?reason, "frame dropped");
            }
        }
        admission
    }

    fn try_admit(&self, frame: FrameRef, rotation: Rotation) -> Admission {
        if self.paused.load(Ordering::Acquire) {
            return Admission::Dropped(DropReason::Paused);
        }
        if !self.worker.is_running() {
            return Admission::Dropped(DropReason::WorkerStopped);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Admission::Dropped(DropReason::Busy);
        }
        let guard = InFlightGuard(self.in_flight.clone());

        // The task owns the caller's reference; a rejected post drops it with the task
        let session = self.session.clone();
        let results = self.results.clone();
        let stats = self.stats.clone();
        let posted = self.worker.post(Box::new(move || {
            process_frame(frame, guard, rotation, &session, &results, &stats);
        }));

        match posted {
            Ok(()) => Admission::Admitted,
            Err(PostError::Full) => Admission::Dropped(DropReason::Busy),
            Err(PostError::Stopped) => Admission::Dropped(DropReason::WorkerStopped),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Whether a frame is inside the engine call right now
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Worker-side half of an admitted frame
fn process_frame(
    frame: FrameRef,
    guard: InFlightGuard,
    rotation: Rotation,
    session: &EngineSession,
    results: &ResultSlot,
    stats: &PipelineStats,
) {
    let frame_id = frame.id;
    let (width, height) = frame.dimensions();
    let source_image_size = rotation.display_size(width, height);
    let queued_micros = frame.timestamp.elapsed().as_micros() as u64;

    let started = Instant::now();
    let outcome = EngineImage::from_frame(&frame, rotation.exif_orientation())
        .and_then(|image| session.process(&image));
    let duration_millis = started.elapsed().as_millis() as u64;

    frame.release();
    drop(guard);

    let result = match outcome {
        Ok(zones) => DetectionResult {
            frame_id,
            is_success: true,
            zones,
            duration_millis,
            source_image_size,
        },
        Err(e) => {
            if e.is_fatal() {
                error!(frame_id, "Engine unusable: {}", e);
            } else {
                warn!(frame_id, "Frame processing failed: {}", e);
            }
            DetectionResult {
                frame_id,
                is_success: false,
                zones: Vec::new(),
                duration_millis,
                source_image_size,
            }
        }
    };

    stats.record_processed(result.is_success);
    debug!(
        frame_id,
        zones = result.zones.len(),
        duration_millis,
        queued_micros,
        "frame processed"
    );
    results.publish(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FramePool;
    use crate::config::EngineConfig;
    use crate::engine::replay::ReplayEngine;
    use std::time::Duration;

    fn setup(engine: ReplayEngine) -> (FrameAdmission, Arc<BackgroundWorker>, Arc<ResultSlot>) {
        let worker = Arc::new(BackgroundWorker::new());
        let session =
            Arc::new(EngineSession::init(Box::new(engine), &EngineConfig::default()).unwrap());
        let results = Arc::new(ResultSlot::new());
        let admission = FrameAdmission::new(
            worker.clone(),
            session,
            results.clone(),
            Arc::new(PipelineStats::default()),
        );
        (admission, worker, results)
    }

    fn wait_published(results: &ResultSlot, count: u64) {
        for _ in 0..1000 {
            if results.published() >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("no result published");
    }

    #[test]
    fn test_drops_while_worker_stopped() {
        let (admission, _worker, _results) = setup(ReplayEngine::demo());
        let pool = FramePool::new(1, 8, 8);

        let frame = pool.next_frame().unwrap().acquire().unwrap();
        let verdict = admission.submit(frame, Rotation::Deg0);

        assert_eq!(verdict, Admission::Dropped(DropReason::WorkerStopped));
        assert_eq!(pool.stats().outstanding, 0);
        assert!(!admission.is_in_flight());
    }

    #[test]
    fn test_drops_while_paused() {
        let (admission, worker, _results) = setup(ReplayEngine::demo());
        worker.start("admission-test").unwrap();
        admission.set_paused(true);
        let pool = FramePool::new(1, 8, 8);

        let frame = pool.next_frame().unwrap().acquire().unwrap();
        assert_eq!(
            admission.submit(frame, Rotation::Deg0),
            Admission::Dropped(DropReason::Paused)
        );
        assert_eq!(pool.stats().recycled, 1);
    }

    #[test]
    fn test_admitted_frame_is_processed_and_released() {
        let (admission, worker, results) = setup(ReplayEngine::demo());
        worker.start("admission-test").unwrap();
        let pool = FramePool::new(1, 640, 480);

        let frame = pool.next_frame().unwrap().acquire().unwrap();
        assert_eq!(admission.submit(frame, Rotation::Deg90), Admission::Admitted);
        wait_published(&results, 1);
        worker.stop();

        let result = results.latest().unwrap();
        assert!(result.is_success);
        assert_eq!(result.frame_id, 0);
        assert_eq!(result.source_image_size, (480, 640));
        assert!(!admission.is_in_flight());
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_failed_call_releases_everything() {
        let (admission, worker, results) = setup(ReplayEngine::demo().with_failure_every(1));
        worker.start("admission-test").unwrap();
        let pool = FramePool::new(2, 16, 16);

        let frame = pool.next_frame().unwrap().acquire().unwrap();
        assert_eq!(admission.submit(frame, Rotation::Deg0), Admission::Admitted);
        wait_published(&results, 1);

        let result = results.latest().unwrap();
        assert!(!result.is_success);
        assert!(result.zones.is_empty());
        assert!(!admission.is_in_flight());
        assert_eq!(pool.stats().outstanding, 0);

        let frame = pool.next_frame().unwrap().acquire().unwrap();
        assert_eq!(admission.submit(frame, Rotation::Deg0), Admission::Admitted);
        wait_published(&results, 2);
        worker.stop();
        assert_eq!(pool.stats().recycled, 2);
    }

    #[test]
    fn test_malformed_document_is_no_detection() {
        let engine = ReplayEngine::new(vec!["{\"zones\": 5}".to_string()]);
        let (admission, worker, results) = setup(engine);
        worker.start("admission-test").unwrap();
        let pool = FramePool::new(1, 16, 16);

        let frame = pool.next_frame().unwrap().acquire().unwrap();
        admission.submit(frame, Rotation::Deg0);
        wait_published(&results, 1);
        worker.stop();

        let result = results.latest().unwrap();
        assert!(!result.is_success);
        assert!(!result.has_zones());
    }

    #[test]
    fn test_every_frame_released_exactly_once() {
        let engine = ReplayEngine::demo().with_latency(Duration::from_millis(3));
        let (admission, worker, results) = setup(engine);
        worker.start("admission-test").unwrap();
        let pool = FramePool::new(4, 32, 32);

        let mut admitted = 0;
        let mut submitted = 0;
        while submitted < 200 {
            let Some(handle) = pool.next_frame() else {
                std::thread::sleep(Duration::from_micros(200));
                continue;
            };
            let frame = handle.acquire().unwrap();
            submitted += 1;
            if admission.submit(frame, Rotation::Deg0) == Admission::Admitted {
                admitted += 1;
            }
            std::thread::sleep(Duration::from_micros(300));
        }
        worker.stop();

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.recycled, 200);
        assert_eq!(results.published(), admitted);
        assert!(admitted > 0 && admitted < 200);
    }
}
