//! Engine throughput benchmark
//!
//! Runs a fixed number of `process` calls back to back through an
//! [`EngineSession`], a share of them on frames that carry an MRZ, and
//! reports the wall time per call.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::replay::ReplayEngine;
use super::result::Zone;
use super::{EngineImage, EngineSession};
use crate::capture::frame::{CapturedFrame, PixelFormat, Rotation};
use crate::config::EngineConfig;
use crate::errors::{MrzError, MrzResult};

/// Document returned for frames without an MRZ
const NEGATIVE_RESPONSE: &str = "{}";

#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Number of `process` calls, at least 1
    pub loops: usize,
    /// Share of calls on a positive frame, in [0.0, 1.0]
    pub rate: f64,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Simulated engine latency per call
    pub latency: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            loops: 100,
            rate: 0.2,
            format: PixelFormat::Yuv420p,
            width: 1280,
            height: 720,
            rotation: Rotation::Deg0,
            latency: Duration::ZERO,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> MrzResult<()> {
        if self.loops < 1 {
            return Err(MrzError::Configuration(
                "loops must be 1 or greater".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rate) {
            return Err(MrzError::Configuration(format!(
                "rate must be within [0.0, 1.0], got {}",
                self.rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BenchReport {
    pub loops: usize,
    pub positives: usize,
    pub elapsed: Duration,
    /// Calls the engine itself counted
    pub engine_calls: u64,
    /// Zones decoded over all calls
    pub zones_found: usize,
    /// Zones of the last positive call
    pub last_positive: Vec<Zone>,
}

impl BenchReport {
    pub fn millis_per_call(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0 / self.loops as f64
    }

    pub fn estimated_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.loops as f64 / secs
        } else {
            f64::INFINITY
        }
    }
}

/// Which calls get a positive frame. At least one call is positive and the
/// positives are spread evenly over the run.
pub fn positive_plan(loops: usize, rate: f64) -> Vec<bool> {
    let positives = ((loops as f64 * rate) as usize).clamp(1, loops.max(1));
    (0..loops)
        .map(|i| (i + 1) * positives / loops != i * positives / loops)
        .collect()
}

/// Run the benchmark against a replay engine answering `positive` on MRZ frames
pub fn run_bench(
    positive: &str,
    engine_config: &EngineConfig,
    config: &BenchConfig,
) -> MrzResult<BenchReport> {
    config.validate()?;

    let plan = positive_plan(config.loops, config.rate);
    let responses = plan
        .iter()
        .map(|&hit| String::from(if hit { positive } else { NEGATIVE_RESPONSE }))
        .collect();
    let engine = ReplayEngine::new(responses).with_latency(config.latency);
    let calls = engine.call_counter();
    let session = EngineSession::init(Box::new(engine), engine_config)?;

    // Both kinds of frame share one buffer; only the replayed answer differs
    let frame = CapturedFrame::blank(0, config.format, config.width, config.height, 0);
    let image = EngineImage::from_frame(&frame, config.rotation.exif_orientation())?;

    info!(loops = config.loops, rate = config.rate, "Starting benchmark");
    let mut zones_found = 0;
    let mut last_positive = Vec::new();
    let started = Instant::now();
    for &hit in &plan {
        let zones = session.process(&image)?;
        zones_found += zones.len();
        if hit {
            last_positive = zones;
        }
    }
    let elapsed = started.elapsed();
    session.deinit()?;

    let report = BenchReport {
        loops: config.loops,
        positives: plan.iter().filter(|&&hit| hit).count(),
        elapsed,
        engine_calls: calls.load(Ordering::SeqCst),
        zones_found,
        last_positive,
    };
    debug!(
        elapsed = ?report.elapsed,
        zones = report.zones_found,
        "Benchmark finished"
    );
    Ok(report)
}
