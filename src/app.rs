//! Application Coordinator
//!
//! Wires the camera, the frame pipeline and the overlay display together and
//! tears them down in order: capture first, then display, then the engine.

use anyhow::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::capture::frame::Rotation;
use crate::capture::{CameraConfig, PoolStats, SyntheticCamera};
use crate::config::AppConfig;
use crate::engine::result::DetectionResult;
use crate::engine::MrzEngine;
use crate::overlay::{OverlayRenderer, OverlayView};
use crate::pipeline::{Pipeline, PipelineState};
use crate::shared::StatsSnapshot;

/// Display refresh interval
const DISPLAY_INTERVAL: Duration = Duration::from_millis(33);

/// What the display thread saw
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayReport {
    pub refreshes: u64,
    /// Refreshes that had a result to draw
    pub ready_refreshes: u64,
    /// Distinct results drawn
    pub results_drawn: u64,
    pub zones_drawn: u64,
}

/// Summary returned by [`MrzApp::shutdown`]
#[derive(Debug, Clone)]
pub struct AppReport {
    pub frames_delivered: u64,
    pub pool: PoolStats,
    pub stats: StatsSnapshot,
    pub display: DisplayReport,
    pub last_result: Option<DetectionResult>,
}

struct DisplayLoop {
    shutdown: Sender<()>,
    handle: JoinHandle<DisplayReport>,
}

/// Main application coordinator
pub struct MrzApp {
    config: AppConfig,
    rotation: Rotation,
    pipeline: Arc<Pipeline>,
    camera: SyntheticCamera,
    display: Option<DisplayLoop>,
}

impl MrzApp {
    /// Validate the configuration and initialize the engine
    pub fn new(config: AppConfig, engine: Box<dyn MrzEngine>, frame_limit: Option<u64>) -> Result<Self> {
        config.validate()?;
        let rotation = config.capture.rotation()?;

        let pipeline = Arc::new(Pipeline::new(
            engine,
            &config.engine,
            config.pipeline.clone(),
        )?);

        let camera = SyntheticCamera::new(CameraConfig {
            frame_limit,
            ..CameraConfig::from(&config.capture)
        });

        Ok(Self {
            config,
            rotation,
            pipeline,
            camera,
            display: None,
        })
    }

    /// Start the pipeline, the display and the camera, in that order
    pub fn start(&mut self) -> Result<()> {
        self.pipeline.start()?;
        self.start_display()?;

        let pipeline = self.pipeline.clone();
        let rotation = self.rotation;
        self.camera.start(Arc::new(move |frame| {
            pipeline.submit(frame, rotation);
        }))?;

        info!(rotation = rotation.degrees(), "MRZ preview started");
        Ok(())
    }

    fn start_display(&mut self) -> Result<()> {
        if self.display.is_some() {
            return Ok(());
        }

        let surface = self
            .rotation
            .display_size(self.config.capture.width, self.config.capture.height);
        let mut view = OverlayView::new(
            OverlayRenderer::from_config(&self.config),
            self.pipeline.results(),
            (surface.0 as f32, surface.1 as f32),
        );
        let results = self.pipeline.results();
        let (shutdown, shutdown_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("overlay-display".to_string())
            .spawn(move || {
                let mut report = DisplayReport::default();
                let mut last_published = 0;
                loop {
                    let summary = view.refresh();
                    report.refreshes += 1;
                    if summary.ready {
                        report.ready_refreshes += 1;
                    }

                    let published = results.published();
                    if published != last_published && summary.ready {
                        last_published = published;
                        report.results_drawn += 1;
                        report.zones_drawn += summary.zones as u64;
                        debug!(
                            zones = summary.zones,
                            plausible = summary.plausible_zones,
                            lines = summary.lines,
                            baselines = summary.baselines,
                            roi = summary.roi_drawn,
                            confidence = ?summary.confidence_labels,
                            timing = summary.timing_label.as_deref().unwrap_or_default(),
                            shapes = view.last_shape_count(),
                            "overlay updated"
                        );
                    }

                    match shutdown_rx.recv_timeout(DISPLAY_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                report
            })?;

        self.display = Some(DisplayLoop { shutdown, handle });
        Ok(())
    }

    fn stop_display(&mut self) -> DisplayReport {
        let Some(display) = self.display.take() else {
            return DisplayReport::default();
        };
        drop(display.shutdown);
        display.handle.join().unwrap_or_default()
    }

    /// Stop admitting frames. Waits for the frame inside the engine, if any.
    pub fn pause(&self) {
        let in_flight = self.pipeline.is_in_flight();
        self.pipeline.pause();
        info!(in_flight, stats = ?self.pipeline.stats(), "MRZ preview paused");
    }

    pub fn resume(&self) -> Result<()> {
        self.pipeline.resume()?;
        Ok(())
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats()
    }

    /// Block until the camera has stopped on its own or `timeout` elapses.
    /// Returns whether the camera finished.
    pub fn wait_for_camera(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.camera.is_running() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Stop everything and report what happened
    pub fn shutdown(mut self) -> AppReport {
        self.camera.stop();
        let display = self.stop_display();
        self.pipeline.stop();

        let report = AppReport {
            frames_delivered: self.camera.delivered(),
            pool: self.camera.pool().stats(),
            stats: self.pipeline.stats(),
            display,
            last_result: self.pipeline.results().latest().map(|r| (*r).clone()),
        };
        info!(stats = ?report.stats, display = ?report.display, "MRZ preview shut down");
        report
    }
}

impl Drop for MrzApp {
    fn drop(&mut self) {
        self.camera.stop();
        self.stop_display();
        self.pipeline.stop();
    }
}
