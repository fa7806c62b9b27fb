//! Detection result model and wire decoding

use serde::{Deserialize, Serialize};

use crate::errors::MrzResult;

/// Lines below this confidence make a zone look implausible
pub const PLAUSIBLE_CONFIDENCE: f32 = 30.0;

/// Value the engine puts in place of the last baseline coordinate in restricted mode
pub const RESTRICTED_MARKER: f32 = -1.0;

/// Four corner points, image space, clockwise from top-left:
/// `[x0, y0, x1, y1, x2, y2, x3, y3]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarpedBox(pub [f32; 8]);

impl WarpedBox {
    /// Corner `index` (0 = top-left, 1 = top-right, 2 = bottom-right, 3 = bottom-left)
    pub fn corner(&self, index: usize) -> (f32, f32) {
        (self.0[index * 2], self.0[index * 2 + 1])
    }

    pub fn corners(&self) -> [(f32, f32); 4] {
        [self.corner(0), self.corner(1), self.corner(2), self.corner(3)]
    }

    /// Whether real baseline coordinates are present
    pub fn has_baseline(&self) -> bool {
        self.0[7] != RESTRICTED_MARKER
    }
}

/// One recognized line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    #[serde(default)]
    pub text: String,
    /// Confidence in [0, 100]
    pub confidence: f32,
    #[serde(rename = "warpedBox")]
    pub warped_box: WarpedBox,
}

/// A detected MRZ block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    #[serde(rename = "warpedBox")]
    pub warped_box: WarpedBox,
    #[serde(default)]
    pub lines: Vec<Line>,
}

impl Zone {
    /// Display-only heuristic: every line confident enough and as long as the first.
    /// Not a validation of the MRZ content.
    pub fn looks_plausible(&self) -> bool {
        let Some(first) = self.lines.first() else {
            return true;
        };
        let expected = first.text.chars().count();
        self.lines.iter().all(|line| {
            line.confidence >= PLAUSIBLE_CONFIDENCE && line.text.chars().count() == expected
        })
    }

    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }
}

#[derive(Deserialize)]
struct ResultDocument {
    #[serde(default)]
    zones: Vec<Zone>,
}

/// Decode the engine's result document. A missing `zones` key means no detection.
pub fn parse_zones(json: &str) -> MrzResult<Vec<Zone>> {
    let document: ResultDocument = serde_json::from_str(json)?;
    Ok(document.zones)
}

/// Outcome of processing one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub frame_id: u64,
    /// False when the engine call failed
    pub is_success: bool,
    pub zones: Vec<Zone>,
    /// Time spent in the engine call
    pub duration_millis: u64,
    /// Image size in display orientation
    pub source_image_size: (u32, u32),
}

impl DetectionResult {
    pub fn has_zones(&self) -> bool {
        !self.zones.is_empty()
    }
}
