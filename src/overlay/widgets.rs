//! Colors and sizes used by the result overlay

use egui::Color32;

use crate::config::OverlaySettings;

/// Style configuration for the zone overlay
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    /// Zone border stroke width
    pub stroke_width: f32,
    /// Recognized text size
    pub text_size: f32,
    /// Confidence label text size
    pub confidence_text_size: f32,
    /// Processing time label text size
    pub timing_text_size: f32,
    /// Border and background color for plausible zones
    pub plausible: Color32,
    /// Border and background color for implausible zones
    pub implausible: Color32,
    pub text_color: Color32,
    pub confidence_text_color: Color32,
    pub timing_text_color: Color32,
    pub timing_background: Color32,
    /// Baseline stroke width
    pub baseline_width: f32,
    /// Baseline (dash, gap) lengths
    pub baseline_dash: (f32, f32),
    /// Detection region outline
    pub roi_color: Color32,
    /// Detection region (dash, gap) lengths
    pub roi_dash: (f32, f32),
    /// Vertical advance between stacked lines, as a multiple of the text height
    pub line_spacing: f32,
    /// Outline drawn around recognized text glyphs
    pub text_stroke_width: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_width: 3.0,
            text_size: 12.0,
            confidence_text_size: 10.0,
            timing_text_size: 10.0,
            plausible: Color32::GREEN,
            implausible: Color32::RED,
            text_color: Color32::BLACK,
            confidence_text_color: Color32::BLUE,
            timing_text_color: Color32::BLACK,
            timing_background: Color32::WHITE,
            baseline_width: 2.0,
            baseline_dash: (5.0, 10.0),
            roi_color: Color32::RED,
            roi_dash: (10.0, 20.0),
            line_spacing: 1.3,
            text_stroke_width: 1.0,
        }
    }
}

impl OverlayStyle {
    pub fn from_settings(settings: &OverlaySettings) -> Self {
        Self {
            stroke_width: settings.stroke_width,
            text_size: settings.text_size,
            confidence_text_size: settings.confidence_text_size,
            timing_text_size: settings.timing_text_size,
            ..Default::default()
        }
    }

    /// Zone color for the plausibility verdict
    pub fn zone_color(&self, plausible: bool) -> Color32 {
        if plausible {
            self.plausible
        } else {
            self.implausible
        }
    }

    /// Distance from one text line's anchor to the next one up
    pub fn line_advance(&self, text_height: f32) -> f32 {
        text_height * self.line_spacing + self.text_stroke_width
    }

    /// Outward margin between a zone and its border, so the stroke never covers the text
    pub fn border_margin(&self) -> f32 {
        self.stroke_width * 0.5 * 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_advance_includes_text_stroke() {
        let style = OverlayStyle::default();
        assert!((style.line_advance(10.0) - 14.0).abs() < 1e-5);

        let thin = OverlayStyle {
            text_stroke_width: 0.0,
            ..Default::default()
        };
        assert!((thin.line_advance(10.0) - 13.0).abs() < 1e-5);
    }

    #[test]
    fn test_border_margin() {
        let style = OverlayStyle {
            stroke_width: 4.0,
            ..Default::default()
        };
        assert!((style.border_margin() - 6.0).abs() < 1e-5);
    }
}
