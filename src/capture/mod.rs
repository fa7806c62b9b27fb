//! Camera Capture Layer
//!
//! Frames come out of a bounded buffer pool and must go back to it. The
//! synthetic camera stands in for a device callback: one producer thread
//! delivering frames at a fixed rate to a sink that never blocks it.

pub mod frame;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::config::CaptureSettings;
use frame::{CapturedFrame, FrameHandle, FrameRef, PixelFormat};

/// Owner of frame buffers. Receives each frame back exactly once.
pub trait FrameSource: Send + Sync {
    fn recycle(&self, frame: &CapturedFrame);
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Frames currently handed out
    pub outstanding: usize,
    /// Frames returned so far
    pub recycled: u64,
    /// Requests refused because every buffer was out
    pub exhausted: u64,
}

/// Fixed-size pool of camera buffers
pub struct FramePool {
    capacity: usize,
    format: PixelFormat,
    width: u32,
    height: u32,
    next_id: AtomicU64,
    outstanding: Mutex<HashSet<u64>>,
    recycled: AtomicU64,
    exhausted: AtomicU64,
}

impl FramePool {
    pub fn new(capacity: usize, width: u32, height: u32) -> Arc<Self> {
        Self::with_format(capacity, PixelFormat::Yuv420p, width, height)
    }

    pub fn with_format(capacity: usize, format: PixelFormat, width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            format,
            width,
            height,
            next_id: AtomicU64::new(0),
            outstanding: Mutex::new(HashSet::with_capacity(capacity)),
            recycled: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        })
    }

    /// Hand out the next frame, or `None` while every buffer is in use
    pub fn next_frame(self: &Arc<Self>) -> Option<FrameHandle> {
        let id = {
            let mut outstanding = self.outstanding.lock();
            if outstanding.len() >= self.capacity {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            outstanding.insert(id);
            id
        };

        let luma = (id % 256) as u8;
        let frame = CapturedFrame::blank(id, self.format, self.width, self.height, luma);
        let source: Arc<dyn FrameSource> = self.clone();
        Some(FrameHandle::new(frame, source))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding: self.outstanding.lock().len(),
            recycled: self.recycled.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl FrameSource for FramePool {
    fn recycle(&self, frame: &CapturedFrame) {
        let removed = self.outstanding.lock().remove(&frame.id);
        assert!(removed, "frame {} returned to the pool twice", frame.id);
        self.recycled.fetch_add(1, Ordering::Relaxed);
    }
}

/// Receives every delivered frame. Called on the capture thread.
pub type FrameSink = Arc<dyn Fn(FrameRef) + Send + Sync>;

/// Synthetic camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Number of buffers in the pool
    pub pool_size: usize,
    /// Stop on its own after this many frames
    pub frame_limit: Option<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig::from(&CaptureSettings::default())
    }
}

impl From<&CaptureSettings> for CameraConfig {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            format: settings.pixel_format,
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            pool_size: settings.pool_size,
            frame_limit: None,
        }
    }
}

/// Camera that produces blank frames on its own thread
pub struct SyntheticCamera {
    config: CameraConfig,
    pool: Arc<FramePool>,
    delivered: Arc<AtomicU64>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Self {
        let pool = FramePool::with_format(
            config.pool_size,
            config.format,
            config.width,
            config.height,
        );
        Self {
            config,
            pool,
            delivered: Arc::new(AtomicU64::new(0)),
            shutdown: None,
            handle: None,
        }
    }

    pub fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }

    /// Frames handed to the sink so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Start delivering frames to `sink`
    pub fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.config.fps.max(1)));
        let limit = self.config.frame_limit;
        let pool = self.pool.clone();
        let delivered = self.delivered.clone();

        let handle = std::thread::Builder::new()
            .name("synthetic-camera".to_string())
            .spawn(move || {
                debug!(?interval, "capture thread starting");
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if limit.is_some_and(|limit| delivered.load(Ordering::Relaxed) >= limit) {
                        break;
                    }

                    let Some(handle) = pool.next_frame() else {
                        trace!("buffer pool exhausted, skipping frame");
                        continue;
                    };
                    if let Some(frame) = handle.acquire() {
                        delivered.fetch_add(1, Ordering::Relaxed);
                        trace!(frame_id = handle.id(), "frame delivered");
                        sink(frame);
                    }
                }
                debug!("capture thread exiting");
            })?;

        self.shutdown = Some(shutdown_tx);
        self.handle = Some(handle);
        info!(
            format = ?self.config.format,
            width = self.config.width,
            height = self.config.height,
            fps = self.config.fps,
            buffers = self.pool.capacity(),
            "Synthetic camera started"
        );
        Ok(())
    }

    /// Stop delivering frames and join the capture thread
    pub fn stop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!(delivered = self.delivered(), "Synthetic camera stopped");
        }
    }

    /// Check if the capture thread is alive
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}
