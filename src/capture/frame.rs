//! Frame data structures and the shared frame handle
//!
//! A camera frame is owned by its [`FrameSource`] until handed out. Every
//! component that needs the frame holds a [`FrameRef`]; the buffer goes back
//! to the source exactly once, when the last reference is dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::FrameSource;
use crate::engine::ExifOrientation;

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Bgra32,
    Bgr24,
    /// Y plane followed by interleaved UV
    Nv12,
    /// Y plane followed by interleaved VU
    Nv21,
    #[default]
    Yuv420p,
    Yvu420p,
    Yuv422p,
    Yuv444p,
    /// Grayscale
    Y,
}

impl PixelFormat {
    /// Number of planes a frame of this format carries
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Rgb24
            | PixelFormat::Rgba32
            | PixelFormat::Bgra32
            | PixelFormat::Bgr24
            | PixelFormat::Y => 1,
            PixelFormat::Nv12 | PixelFormat::Nv21 => 2,
            PixelFormat::Yuv420p
            | PixelFormat::Yvu420p
            | PixelFormat::Yuv422p
            | PixelFormat::Yuv444p => 3,
        }
    }

    /// Bytes per pixel for packed formats, `None` for planar ones
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => Some(4),
            PixelFormat::Y => Some(1),
            _ => None,
        }
    }
}

/// One image plane with its strides
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of two rows
    pub row_stride: usize,
    /// Bytes between two horizontally adjacent samples
    pub pixel_stride: usize,
}

/// Sensor rotation relative to the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// EXIF orientation code the engine expects for this rotation
    pub fn exif_orientation(&self) -> ExifOrientation {
        let code = match self {
            Rotation::Deg0 => 1,
            Rotation::Deg90 => 6,
            Rotation::Deg180 => 3,
            Rotation::Deg270 => 8,
        };
        ExifOrientation::new(code).unwrap_or_default()
    }

    /// Image size as seen on the display. Quarter turns swap the axes.
    pub fn display_size(&self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Rotation::Deg90 | Rotation::Deg270 => (height, width),
            Rotation::Deg0 | Rotation::Deg180 => (width, height),
        }
    }
}

/// A captured camera frame
#[derive(Debug)]
pub struct CapturedFrame {
    /// Sequence number assigned by the source
    pub id: u64,
    pub format: PixelFormat,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    pub planes: Vec<Plane>,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(id: u64, format: PixelFormat, width: u32, height: u32, planes: Vec<Plane>) -> Self {
        Self {
            id,
            format,
            width,
            height,
            planes,
            timestamp: Instant::now(),
        }
    }

    /// A tightly packed frame of uniform brightness `luma` and neutral chroma
    pub fn blank(id: u64, format: PixelFormat, width: u32, height: u32, luma: u8) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
        let packed = |bytes: usize| Plane {
            data: vec![luma; w * h * bytes],
            row_stride: w * bytes,
            pixel_stride: bytes,
        };
        let chroma = |cols: usize, rows: usize, pixel_stride: usize| Plane {
            data: vec![128; cols * rows * pixel_stride],
            row_stride: cols * pixel_stride,
            pixel_stride,
        };

        let planes = match format {
            PixelFormat::Rgb24
            | PixelFormat::Rgba32
            | PixelFormat::Bgra32
            | PixelFormat::Bgr24
            | PixelFormat::Y => vec![packed(format.bytes_per_pixel().unwrap_or(1))],
            PixelFormat::Nv12 | PixelFormat::Nv21 => vec![packed(1), chroma(cw, ch, 2)],
            PixelFormat::Yuv420p | PixelFormat::Yvu420p => {
                vec![packed(1), chroma(cw, ch, 1), chroma(cw, ch, 1)]
            }
            PixelFormat::Yuv422p => vec![packed(1), chroma(cw, h, 1), chroma(cw, h, 1)],
            PixelFormat::Yuv444p => vec![packed(1), chroma(w, h, 1), chroma(w, h, 1)],
        };
        Self::new(id, format, width, height, planes)
    }

    /// A tightly packed YUV 4:2:0 planar frame filled with `luma`
    pub fn yuv420p(id: u64, width: u32, height: u32, luma: u8) -> Self {
        Self::blank(id, PixelFormat::Yuv420p, width, height, luma)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Count value once the frame went back to its source
const RELEASED: usize = usize::MAX;

struct HandleInner {
    frame: CapturedFrame,
    refcount: AtomicUsize,
    source: Arc<dyn FrameSource>,
}

/// Shared-ownership wrapper around one source-owned frame.
///
/// The count starts at zero. The first [`acquire`](Self::acquire) brings it to
/// one; once it drops back to zero the frame is handed back to its source and
/// the handle can never be acquired again.
#[derive(Clone)]
pub struct FrameHandle {
    inner: Arc<HandleInner>,
}

impl FrameHandle {
    pub fn new(frame: CapturedFrame, source: Arc<dyn FrameSource>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                frame,
                refcount: AtomicUsize::new(0),
                source,
            }),
        }
    }

    /// Take a new reference. `None` once the frame went back to its source.
    pub fn acquire(&self) -> Option<FrameRef> {
        let mut current = self.inner.refcount.load(Ordering::Acquire);
        loop {
            if current == RELEASED {
                return None;
            }
            match self.inner.refcount.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(FrameRef {
                        handle: self.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Live references
    pub fn refcount(&self) -> usize {
        match self.inner.refcount.load(Ordering::Acquire) {
            RELEASED => 0,
            count => count,
        }
    }

    /// Whether the frame has been handed back to its source
    pub fn is_released(&self) -> bool {
        self.inner.refcount.load(Ordering::Acquire) == RELEASED
    }

    pub fn id(&self) -> u64 {
        self.inner.frame.id
    }

    /// Drop one reference. The only place the count goes down.
    fn release_one(&self) {
        let mut current = self.inner.refcount.load(Ordering::Acquire);
        loop {
            assert!(
                current != 0 && current != RELEASED,
                "frame {} released more times than it was acquired",
                self.inner.frame.id
            );
            let next = if current == 1 { RELEASED } else { current - 1 };
            match self.inner.refcount.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == 1 {
            trace!(frame_id = self.inner.frame.id, "frame returned to source");
            self.inner.source.recycle(&self.inner.frame);
        }
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("id", &self.inner.frame.id)
            .field("refcount", &self.refcount())
            .field("released", &self.is_released())
            .finish()
    }
}

/// One counted reference to a frame. Dropping it releases the reference.
pub struct FrameRef {
    handle: FrameHandle,
}

impl FrameRef {
    /// Release explicitly. Same as dropping.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for FrameRef {
    type Target = CapturedFrame;

    fn deref(&self) -> &CapturedFrame {
        &self.handle.inner.frame
    }
}

impl Drop for FrameRef {
    fn drop(&mut self) {
        self.handle.release_one();
    }
}

impl fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FrameRef").field(&self.handle).finish()
    }
}
