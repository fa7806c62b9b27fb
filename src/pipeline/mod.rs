//! Frame Pipeline
//!
//! Ties the engine session, the single-slot worker and the admission policy
//! together behind one lifecycle:
//!
//! ```text
//! Idle -> Running <-> Paused -> Stopped
//! ```
//!
//! Stopping joins the worker before the engine is de-initialized, so no engine
//! call can overlap teardown. A stopped pipeline cannot be restarted.

pub mod admission;
pub mod worker;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::capture::frame::{FrameRef, Rotation};
use crate::config::{EngineConfig, PipelineSettings};
use crate::engine::{EngineSession, MrzEngine};
use crate::errors::MrzResult;
use crate::shared::state::{PipelineStats, ResultSlot, StatsSnapshot};
pub use admission::Admission;
use admission::FrameAdmission;
use worker::BackgroundWorker;

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Real-time frame pipeline in front of one engine instance
pub struct Pipeline {
    settings: PipelineSettings,
    state: Mutex<PipelineState>,
    worker: Arc<BackgroundWorker>,
    session: Arc<EngineSession>,
    admission: FrameAdmission,
    results: Arc<ResultSlot>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    /// Initialize the engine. Configuration errors abort before `init` is called.
    pub fn new(
        engine: Box<dyn MrzEngine>,
        engine_config: &EngineConfig,
        settings: PipelineSettings,
    ) -> MrzResult<Self> {
        let session = Arc::new(EngineSession::init(engine, engine_config)?);
        let worker = Arc::new(BackgroundWorker::new());
        let results = Arc::new(ResultSlot::new());
        let stats = Arc::new(PipelineStats::default());
        let admission = FrameAdmission::new(
            worker.clone(),
            session.clone(),
            results.clone(),
            stats.clone(),
        );

        Ok(Self {
            settings,
            state: Mutex::new(PipelineState::Idle),
            worker,
            session,
            admission,
            results,
            stats,
        })
    }

    /// Start admitting frames. Resumes a paused pipeline.
    ///
    /// # Panics
    /// When the pipeline has been stopped.
    pub fn start(&self) -> MrzResult<()> {
        let mut state = self.state.lock();
        match *state {
            PipelineState::Running => return Ok(()),
            PipelineState::Stopped => panic!("pipeline cannot be started after stop"),
            PipelineState::Idle | PipelineState::Paused => {}
        }

        self.worker.start(&self.settings.worker_name)?;
        self.admission.set_paused(false);
        info!(from = ?*state, "Pipeline running");
        *state = PipelineState::Running;
        Ok(())
    }

    /// Stop admitting frames and park the worker. Blocks until an in-flight
    /// engine call has finished.
    ///
    /// # Panics
    /// When the pipeline has been stopped.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        match *state {
            PipelineState::Running => {}
            PipelineState::Idle | PipelineState::Paused => return,
            PipelineState::Stopped => panic!("pipeline cannot be paused after stop"),
        }

        self.admission.set_paused(true);
        self.worker.stop();
        *state = PipelineState::Paused;
        info!("Pipeline paused");
    }

    /// Resume a paused pipeline
    pub fn resume(&self) -> MrzResult<()> {
        self.start()
    }

    /// Drain the worker, then de-initialize the engine. Repeated calls are no-ops.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state == PipelineState::Stopped {
            return;
        }

        self.admission.set_paused(true);
        self.worker.stop();
        if let Err(e) = self.session.deinit() {
            warn!("Engine deInit failed: {}", e);
        }
        *state = PipelineState::Stopped;
        info!(stats = ?self.stats.snapshot(), "Pipeline stopped");
    }

    /// Offer a frame from the capture thread. Never blocks.
    pub fn submit(&self, frame: FrameRef, rotation: Rotation) -> Admission {
        self.admission.submit(frame, rotation)
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn is_in_flight(&self) -> bool {
        self.admission.is_in_flight()
    }

    /// Slot the display reads results from
    pub fn results(&self) -> Arc<ResultSlot> {
        self.results.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FramePool;
    use crate::engine::replay::ReplayEngine;
    use crate::engine::EngineImage;
    use crate::errors::MrzError;
    use crate::shared::state::DropReason;
    use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Engine whose `process` blocks until the test opens the gate
    struct GatedEngine {
        entered: Sender<()>,
        gate: Receiver<()>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MrzEngine for GatedEngine {
        fn init(&mut self, _config_json: &str) -> MrzResult<()> {
            self.log.lock().push("init");
            Ok(())
        }

        fn process(&mut self, _image: &EngineImage<'_>) -> MrzResult<String> {
            self.log.lock().push("process");
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            self.log.lock().push("process-done");
            Ok(r#"{"zones":[{"warpedBox":[0,0,8,0,8,4,0,4],"lines":[]}]}"#.to_string())
        }

        fn deinit(&mut self) -> MrzResult<()> {
            self.log.lock().push("deinit");
            Ok(())
        }
    }

    struct Harness {
        pipeline: Arc<Pipeline>,
        entered: Receiver<()>,
        gate: Sender<()>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    fn gated_pipeline() -> Harness {
        let (entered_tx, entered) = unbounded();
        let (gate, gate_rx) = bounded(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = GatedEngine {
            entered: entered_tx,
            gate: gate_rx,
            log: log.clone(),
        };
        let pipeline =
            Pipeline::new(Box::new(engine), &EngineConfig::default(), PipelineSettings::default())
                .unwrap();
        Harness {
            pipeline: Arc::new(pipeline),
            entered,
            gate,
            log,
        }
    }

    fn wait_published(results: &ResultSlot, count: u64) {
        for _ in 0..2500 {
            if results.published() >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("result {count} never published");
    }

    #[test]
    fn test_busy_frames_are_dropped_then_admission_resumes() {
        let h = gated_pipeline();
        h.pipeline.start().unwrap();
        let pool = FramePool::new(3, 64, 32);
        let results = h.pipeline.results();

        let a = pool.next_frame().unwrap().acquire().unwrap();
        assert!(!h.pipeline.is_in_flight());
        assert_eq!(h.pipeline.submit(a, Rotation::Deg0), Admission::Admitted);
        assert!(h.pipeline.is_in_flight());
        h.entered.recv_timeout(TIMEOUT).unwrap();

        let b_handle = pool.next_frame().unwrap();
        let b = b_handle.acquire().unwrap();
        assert_eq!(b_handle.id(), 1);
        assert_eq!(
            h.pipeline.submit(b, Rotation::Deg0),
            Admission::Dropped(DropReason::Busy)
        );
        assert!(b_handle.is_released());
        assert!(h.pipeline.is_in_flight());
        assert_eq!(pool.stats().outstanding, 1);

        h.gate.send(()).unwrap();
        wait_published(&results, 1);
        assert!(!h.pipeline.is_in_flight());
        let result = results.latest().unwrap();
        assert_eq!(result.frame_id, 0);
        assert_eq!(result.zones.len(), 1);
        assert_eq!(pool.stats().outstanding, 0);

        let c = pool.next_frame().unwrap().acquire().unwrap();
        assert_eq!(h.pipeline.submit(c, Rotation::Deg0), Admission::Admitted);
        h.entered.recv_timeout(TIMEOUT).unwrap();
        h.gate.send(()).unwrap();
        wait_published(&results, 2);
        assert_eq!(results.latest().unwrap().frame_id, 2);

        let stats = h.pipeline.stats();
        assert_eq!(stats.seen, 3);
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.dropped_busy, 1);
    }

    #[test]
    fn test_stop_waits_for_in_flight_frame() {
        let h = gated_pipeline();
        h.pipeline.start().unwrap();
        let pool = FramePool::new(1, 16, 16);

        let a = pool.next_frame().unwrap().acquire().unwrap();
        assert_eq!(h.pipeline.submit(a, Rotation::Deg0), Admission::Admitted);
        h.entered.recv_timeout(TIMEOUT).unwrap();

        let stopped = Arc::new(AtomicBool::new(false));
        let stopper = {
            let pipeline = h.pipeline.clone();
            let stopped = stopped.clone();
            std::thread::spawn(move || {
                pipeline.stop();
                stopped.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!stopped.load(Ordering::SeqCst));
        assert_eq!(pool.stats().outstanding, 1);

        h.gate.send(()).unwrap();
        stopper.join().unwrap();

        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(h.pipeline.state(), PipelineState::Stopped);
        assert_eq!(
            *h.log.lock(),
            vec!["init", "process", "process-done", "deinit"]
        );
    }

    #[test]
    fn test_lifecycle_transitions() {
        let pipeline = Pipeline::new(
            Box::new(ReplayEngine::demo()),
            &EngineConfig::default(),
            PipelineSettings::default(),
        )
        .unwrap();
        let pool = FramePool::new(1, 16, 16);
        let submit = |p: &Pipeline| {
            p.submit(pool.next_frame().unwrap().acquire().unwrap(), Rotation::Deg0)
        };

        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(submit(&pipeline), Admission::Dropped(DropReason::WorkerStopped));

        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);

        pipeline.pause();
        assert_eq!(pipeline.state(), PipelineState::Paused);
        assert_eq!(submit(&pipeline), Admission::Dropped(DropReason::Paused));

        pipeline.resume().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert_eq!(submit(&pipeline), Admission::Admitted);

        pipeline.stop();
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(submit(&pipeline), Admission::Dropped(DropReason::Paused));
    }

    #[test]
    #[should_panic(expected = "cannot be started after stop")]
    fn test_restart_after_stop_panics() {
        let pipeline = Pipeline::new(
            Box::new(ReplayEngine::demo()),
            &EngineConfig::default(),
            PipelineSettings::default(),
        )
        .unwrap();
        pipeline.stop();
        let _ = pipeline.start();
    }

    #[test]
    fn test_configuration_error_aborts_construction() {
        let h_log = Arc::new(Mutex::new(Vec::new()));
        let (entered, _entered_rx) = unbounded();
        let (_gate, gate) = bounded(0);
        let engine = GatedEngine {
            entered,
            gate,
            log: h_log.clone(),
        };
        let mut config = EngineConfig::default();
        config.min_num_lines = 0;

        let err = Pipeline::new(Box::new(engine), &config, PipelineSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, MrzError::Configuration(_)));
        assert!(h_log.lock().is_empty());
    }

    #[test]
    fn test_worker_thread_named_from_settings() {
        let (tx, rx) = unbounded();
        struct ThreadNameEngine(Sender<Option<String>>);
        impl MrzEngine for ThreadNameEngine {
            fn init(&mut self, _config_json: &str) -> MrzResult<()> {
                Ok(())
            }
            fn process(&mut self, _image: &EngineImage<'_>) -> MrzResult<String> {
                let _ = self.0.send(std::thread::current().name().map(str::to_string));
                Ok("{}".to_string())
            }
            fn deinit(&mut self) -> MrzResult<()> {
                Ok(())
            }
        }

        let settings = PipelineSettings {
            worker_name: "mrz-test-worker".to_string(),
        };
        let pipeline = Pipeline::new(Box::new(ThreadNameEngine(tx)), &EngineConfig::default(), settings)
            .unwrap();
        pipeline.start().unwrap();
        let pool = FramePool::new(1, 8, 8);
        pipeline.submit(pool.next_frame().unwrap().acquire().unwrap(), Rotation::Deg0);

        let name = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(name.as_deref(), Some("mrz-test-worker"));
    }
}
