//! Engine Boundary
//!
//! The recognition engine is an opaque component reached through [`MrzEngine`].
//! [`EngineSession`] owns an engine instance and enforces its calling rules:
//! one `init` before anything else, no concurrent calls, nothing after `deinit`.

pub mod bench;
pub mod replay;
pub mod result;

use std::fmt;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::capture::frame::{CapturedFrame, PixelFormat, Plane};
use crate::config::EngineConfig;
use crate::errors::{MrzError, MrzResult};
use result::{parse_zones, Zone};

/// EXIF orientation code, 1 through 8
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExifOrientation(u8);

impl ExifOrientation {
    pub fn new(code: u8) -> Option<Self> {
        (1..=8).contains(&code).then_some(Self(code))
    }

    pub fn code(&self) -> u8 {
        self.0
    }
}

impl Default for ExifOrientation {
    fn default() -> Self {
        Self(1)
    }
}

/// Pixel buffers as the engine receives them
#[derive(Debug, Clone, Copy)]
pub enum ImageData<'a> {
    /// One interleaved buffer
    Packed { data: &'a [u8], stride: usize },
    /// Separate luma and chroma buffers, each with its own stride
    Planar {
        y: &'a [u8],
        u: &'a [u8],
        v: &'a [u8],
        y_stride: usize,
        uv_stride: usize,
        uv_pixel_stride: usize,
    },
}

/// A borrowed view of one frame, ready for [`MrzEngine::process`]
#[derive(Debug, Clone, Copy)]
pub struct EngineImage<'a> {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: ImageData<'a>,
    pub orientation: ExifOrientation,
}

impl<'a> EngineImage<'a> {
    /// Borrow the planes of `frame`, checking they can hold the declared size
    pub fn from_frame(frame: &'a CapturedFrame, orientation: ExifOrientation) -> MrzResult<Self> {
        if frame.width == 0 || frame.height == 0 {
            return Err(MrzError::InvalidFrame(format!(
                "frame {} has an empty size",
                frame.id
            )));
        }
        if frame.planes.len() != frame.format.plane_count() {
            return Err(MrzError::InvalidFrame(format!(
                "{:?} needs {} planes, frame {} has {}",
                frame.format,
                frame.format.plane_count(),
                frame.id,
                frame.planes.len()
            )));
        }

        let (width, height) = (frame.width as usize, frame.height as usize);
        let luma = &frame.planes[0];
        let bytes_per_pixel = frame.format.bytes_per_pixel().unwrap_or(1);
        check_plane(frame, "luma", luma, bytes_per_pixel, bytes_per_pixel, width, height)?;

        let data = match frame.format {
            PixelFormat::Rgb24
            | PixelFormat::Rgba32
            | PixelFormat::Bgra32
            | PixelFormat::Bgr24
            | PixelFormat::Y => ImageData::Packed {
                data: &luma.data,
                stride: luma.row_stride,
            },
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let uv = &frame.planes[1];
                let (cols, rows) = ((width + 1) / 2, (height + 1) / 2);
                check_plane(frame, "chroma", uv, 2, 2, cols, rows)?;

                let (first, second) = (&uv.data[..], &uv.data[1..]);
                let (u, v) = if frame.format == PixelFormat::Nv12 {
                    (first, second)
                } else {
                    (second, first)
                };
                ImageData::Planar {
                    y: &luma.data,
                    u,
                    v,
                    y_stride: luma.row_stride,
                    uv_stride: uv.row_stride,
                    uv_pixel_stride: 2,
                }
            }
            PixelFormat::Yuv420p
            | PixelFormat::Yvu420p
            | PixelFormat::Yuv422p
            | PixelFormat::Yuv444p => {
                let (first, second) = (&frame.planes[1], &frame.planes[2]);
                let (u, v) = if frame.format == PixelFormat::Yvu420p {
                    (second, first)
                } else {
                    (first, second)
                };
                if u.row_stride != v.row_stride || u.pixel_stride != v.pixel_stride {
                    return Err(MrzError::InvalidFrame(format!(
                        "frame {} chroma planes have different strides",
                        frame.id
                    )));
                }

                let (cols, rows) = match frame.format {
                    PixelFormat::Yuv444p => (width, height),
                    PixelFormat::Yuv422p => ((width + 1) / 2, height),
                    _ => ((width + 1) / 2, (height + 1) / 2),
                };
                check_plane(frame, "u", u, u.pixel_stride, 1, cols, rows)?;
                check_plane(frame, "v", v, v.pixel_stride, 1, cols, rows)?;

                ImageData::Planar {
                    y: &luma.data,
                    u: &u.data,
                    v: &v.data,
                    y_stride: luma.row_stride,
                    uv_stride: u.row_stride,
                    uv_pixel_stride: u.pixel_stride,
                }
            }
        };

        Ok(Self {
            format: frame.format,
            width: frame.width,
            height: frame.height,
            data,
            orientation,
        })
    }
}

/// Reject `plane` unless it holds `rows` rows of `cols` samples of `sample_bytes`
/// each, `pixel_stride` bytes apart.
fn check_plane(
    frame: &CapturedFrame,
    name: &str,
    plane: &Plane,
    pixel_stride: usize,
    sample_bytes: usize,
    cols: usize,
    rows: usize,
) -> MrzResult<()> {
    let row_bytes = pixel_stride * (cols - 1) + sample_bytes;
    let fits = pixel_stride >= sample_bytes
        && plane.row_stride >= row_bytes
        && plane.data.len() >= plane.row_stride * (rows - 1) + row_bytes;
    if fits {
        Ok(())
    } else {
        Err(MrzError::InvalidFrame(format!(
            "frame {} {} plane too small for {}x{} samples ({} bytes, stride {}/{})",
            frame.id,
            name,
            cols,
            rows,
            plane.data.len(),
            plane.row_stride,
            pixel_stride
        )))
    }
}

/// Contract of the external recognition engine
///
/// Implementations are never called concurrently; [`EngineSession`] serializes
/// every call.
pub trait MrzEngine: Send {
    /// Initialize with the flat JSON configuration document
    fn init(&mut self, config_json: &str) -> MrzResult<()>;

    /// Run detection and recognition, returning the result document
    fn process(&mut self, image: &EngineImage<'_>) -> MrzResult<String>;

    /// Release engine resources
    fn deinit(&mut self) -> MrzResult<()>;
}

struct SessionState {
    engine: Box<dyn MrzEngine>,
    active: bool,
}

/// An initialized engine
pub struct EngineSession {
    state: Mutex<SessionState>,
}

impl EngineSession {
    /// Validate `config` and initialize `engine` with it
    pub fn init(mut engine: Box<dyn MrzEngine>, config: &EngineConfig) -> MrzResult<Self> {
        let json = config.to_json()?;
        engine.init(&json)?;
        info!(
            segmenter_accuracy = ?config.segmenter_accuracy,
            num_threads = config.num_threads,
            "Engine initialized"
        );
        Ok(Self {
            state: Mutex::new(SessionState {
                engine,
                active: true,
            }),
        })
    }

    /// Process one image and decode the zones it contains.
    ///
    /// # Panics
    /// When called after [`deinit`](Self::deinit).
    pub fn process(&self, image: &EngineImage<'_>) -> MrzResult<Vec<Zone>> {
        let mut state = self.state.lock();
        assert!(state.active, "engine process called after deInit");
        let document = state.engine.process(image)?;
        drop(state);
        parse_zones(&document)
    }

    /// Tear the engine down. Waits for an in-flight `process`; repeated calls succeed.
    pub fn deinit(&self) -> MrzResult<()> {
        let mut state = self.state.lock();
        if !state.active {
            return Ok(());
        }
        state.active = false;
        let outcome = state.engine.deinit();
        info!(ok = outcome.is_ok(), "Engine de-initialized");
        outcome
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        if let Err(e) = self.deinit() {
            warn!("Engine deInit on drop failed: {}", e);
        }
    }
}
