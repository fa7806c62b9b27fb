//! Overlay Presentation Layer
//!
//! Projects the latest detection result onto the display surface: zone
//! borders, recognized text, per-line baselines, confidence labels and the
//! processing time. Painting only reads an immutable result snapshot, so it
//! can run on the display thread while the worker publishes the next one.

pub mod transform;
pub mod widgets;

use std::sync::Arc;

use egui::emath::Rot2;
use egui::epaint::TextShape;
use egui::{pos2, vec2, FontId, LayerId, Painter, Pos2, RawInput, Rect, Rounding, Shape, Stroke, Vec2};
use tracing::trace;

use crate::config::AppConfig;
use crate::engine::result::{DetectionResult, Zone};
use crate::shared::state::ResultSlot;
use transform::ViewTransform;
use widgets::OverlayStyle;

/// What a single paint call drew
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlaySummary {
    /// False until a result has been published
    pub ready: bool,
    pub zones: usize,
    pub plausible_zones: usize,
    pub lines: usize,
    pub baselines: usize,
    pub roi_drawn: bool,
    pub confidence_labels: Vec<String>,
    pub timing_label: Option<String>,
}

/// Image-to-screen projection for one paint call
struct Projection {
    transform: ViewTransform,
    origin: Pos2,
}

impl Projection {
    fn to_screen(&self, point: (f32, f32)) -> Pos2 {
        let (x, y) = self.transform.point(point);
        pos2(self.origin.x + x, self.origin.y + y)
    }
}

/// Paints detection results with an egui [`Painter`]
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
    /// Detection region as [left, right, top, bottom] in image space
    roi: Option<[f32; 4]>,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle, roi: Option<[f32; 4]>) -> Self {
        Self { style, roi }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let roi = (config.overlay.draw_roi && config.engine.has_roi()).then_some(config.engine.roi);
        Self::new(OverlayStyle::from_settings(&config.overlay), roi)
    }

    /// Paint `result` onto `surface`. Without a result only a "not ready"
    /// marker is drawn.
    pub fn paint(
        &self,
        painter: &Painter,
        surface: Rect,
        result: Option<&DetectionResult>,
    ) -> OverlaySummary {
        let Some(result) = result else {
            trace!("Not initialized yet");
            self.paint_label(painter, surface.min, "Not ready".to_string());
            return OverlaySummary::default();
        };

        let mut summary = OverlaySummary {
            ready: true,
            ..Default::default()
        };

        let timing = format!("Total processing time: {} ms", result.duration_millis);
        self.paint_label(painter, surface.min, timing.clone());
        summary.timing_label = Some(timing);

        let surface_size = (surface.width().max(0.0) as u32, surface.height().max(0.0) as u32);
        let Some(transform) = ViewTransform::new(result.source_image_size, surface_size) else {
            return summary;
        };
        trace!(
            scale = transform.scale(),
            offset = ?transform.offset(),
            scaled = ?transform.scaled_size(),
            "projecting result"
        );
        let projection = Projection {
            transform,
            origin: surface.min,
        };

        if let Some(roi) = self.roi {
            self.paint_roi(painter, &projection, roi);
            summary.roi_drawn = true;
        }

        for zone in &result.zones {
            self.paint_zone(painter, &projection, zone, &mut summary);
        }
        summary
    }

    /// Text on a filled box, top-left at `pos`
    fn paint_label(&self, painter: &Painter, pos: Pos2, text: String) {
        let galley = painter.layout_no_wrap(
            text,
            FontId::proportional(self.style.timing_text_size),
            self.style.timing_text_color,
        );
        let rect = Rect::from_min_size(pos, galley.size());
        painter.rect_filled(rect, Rounding::ZERO, self.style.timing_background);
        painter.galley(pos, galley, self.style.timing_text_color);
    }

    fn paint_roi(&self, painter: &Painter, projection: &Projection, roi: [f32; 4]) {
        let [left, right, top, bottom] = roi;
        let corners = [
            projection.to_screen((left, top)),
            projection.to_screen((right, top)),
            projection.to_screen((right, bottom)),
            projection.to_screen((left, bottom)),
            projection.to_screen((left, top)),
        ];
        let (dash, gap) = self.style.roi_dash;
        painter.extend(Shape::dashed_line(
            &corners,
            Stroke::new(self.style.stroke_width, self.style.roi_color),
            dash,
            gap,
        ));
    }

    fn paint_zone(
        &self,
        painter: &Painter,
        projection: &Projection,
        zone: &Zone,
        summary: &mut OverlaySummary,
    ) {
        let plausible = zone.looks_plausible();
        let color = self.style.zone_color(plausible);

        // Push the border outward so it does not cover the text
        let m = self.style.border_margin();
        let [a, b, c, d] = zone.warped_box.corners().map(|p| projection.to_screen(p));
        let (a, b, c, d) = (
            a + vec2(-m, -m),
            b + vec2(m, -m),
            c + vec2(m, m),
            d + vec2(-m, m),
        );
        painter.add(Shape::closed_line(
            vec![a, b, c, d],
            Stroke::new(self.style.stroke_width, color),
        ));

        let top_angle = edge_angle(a, b);
        let mut anchor = a;
        for line in zone.lines.iter().rev() {
            let galley = painter.layout_no_wrap(
                line.text.clone(),
                FontId::monospace(self.style.text_size),
                self.style.text_color,
            );
            let size = galley.size();
            let origin = anchor + Rot2::from_angle(top_angle) * vec2(0.0, -size.y);
            painter.add(Shape::convex_polygon(
                rotated_box(origin, size, top_angle),
                color,
                Stroke::NONE,
            ));
            painter.add(Shape::Text(
                TextShape::new(origin, galley, self.style.text_color).with_angle(top_angle),
            ));

            if line.warped_box.has_baseline() {
                let from = projection.to_screen(line.warped_box.corner(3));
                let to = projection.to_screen(line.warped_box.corner(2));
                let (dash, gap) = self.style.baseline_dash;
                painter.extend(Shape::dashed_line(
                    &[from, to],
                    Stroke::new(self.style.baseline_width, color),
                    dash,
                    gap,
                ));
                summary.baselines += 1;
            }

            anchor.y -= self.style.line_advance(size.y);
            summary.lines += 1;
        }

        let label = confidence_label(zone);
        if !label.is_empty() {
            let angle = edge_angle(d, c);
            let galley = painter.layout_no_wrap(
                label.clone(),
                FontId::proportional(self.style.confidence_text_size),
                self.style.confidence_text_color,
            );
            painter.add(Shape::convex_polygon(
                rotated_box(d, galley.size(), angle),
                color,
                Stroke::NONE,
            ));
            painter.add(Shape::Text(
                TextShape::new(d, galley, self.style.confidence_text_color).with_angle(angle),
            ));
            summary.confidence_labels.push(label);
        }

        summary.zones += 1;
        if plausible {
            summary.plausible_zones += 1;
        }
    }
}

/// Each line's confidence as a percentage, joined with " - "
pub fn confidence_label(zone: &Zone) -> String {
    zone.lines
        .iter()
        .map(|line| format!("{:.2}%", line.confidence))
        .collect::<Vec<_>>()
        .join(" - ")
}

/// Angle of the edge from `from` to `to`, in radians
fn edge_angle(from: Pos2, to: Pos2) -> f32 {
    let delta = to - from;
    delta.y.atan2(delta.x)
}

/// Corners of a `size` box whose top-left sits at `origin`, rotated about it
fn rotated_box(origin: Pos2, size: Vec2, angle: f32) -> Vec<Pos2> {
    let rot = Rot2::from_angle(angle);
    [
        vec2(0.0, 0.0),
        vec2(size.x, 0.0),
        vec2(size.x, size.y),
        vec2(0.0, size.y),
    ]
    .into_iter()
    .map(|corner| origin + rot * corner)
    .collect()
}

/// Display-side driver: owns an egui context and repaints the newest result
/// on every refresh.
pub struct OverlayView {
    ctx: egui::Context,
    renderer: OverlayRenderer,
    results: Arc<ResultSlot>,
    surface: Vec2,
    last_shape_count: usize,
}

impl OverlayView {
    pub fn new(renderer: OverlayRenderer, results: Arc<ResultSlot>, surface: (f32, f32)) -> Self {
        Self {
            ctx: egui::Context::default(),
            renderer,
            results,
            surface: vec2(surface.0, surface.1),
            last_shape_count: 0,
        }
    }

    /// Run one display frame against the latest published result
    pub fn refresh(&mut self) -> OverlaySummary {
        let latest = self.results.latest();
        let input = RawInput {
            screen_rect: Some(Rect::from_min_size(Pos2::ZERO, self.surface)),
            ..Default::default()
        };

        let mut summary = OverlaySummary::default();
        let renderer = &self.renderer;
        let output = self.ctx.run(input, |ctx| {
            let painter = ctx.layer_painter(LayerId::background());
            summary = renderer.paint(&painter, ctx.screen_rect(), latest.as_deref());
        });
        self.last_shape_count = output.shapes.len();
        summary
    }

    /// Shapes emitted by the last refresh
    pub fn last_shape_count(&self) -> usize {
        self.last_shape_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::replay::DEMO_RESPONSES;
    use crate::engine::result::parse_zones;

    fn render(renderer: &OverlayRenderer, result: Option<&DetectionResult>) -> (OverlaySummary, usize) {
        let ctx = egui::Context::default();
        let input = RawInput {
            screen_rect: Some(Rect::from_min_size(Pos2::ZERO, vec2(720.0, 1280.0))),
            ..Default::default()
        };
        let mut summary = OverlaySummary::default();
        let output = ctx.run(input, |ctx| {
            let painter = ctx.layer_painter(LayerId::background());
            summary = renderer.paint(&painter, ctx.screen_rect(), result);
        });
        (summary, output.shapes.len())
    }

    fn demo_result() -> DetectionResult {
        let mut zones = parse_zones(DEMO_RESPONSES[1]).unwrap();
        zones.extend(parse_zones(DEMO_RESPONSES[2]).unwrap());
        DetectionResult {
            frame_id: 3,
            is_success: true,
            zones,
            duration_millis: 42,
            source_image_size: (1280, 720),
        }
    }

    #[test]
    fn test_not_ready_without_result() {
        let (summary, shapes) = render(&OverlayRenderer::default(), None);
        assert!(!summary.ready);
        assert_eq!(summary.zones, 0);
        assert!(summary.timing_label.is_none());
        assert!(shapes > 0);
    }

    #[test]
    fn test_zones_are_classified_and_drawn() {
        let result = demo_result();
        let (summary, shapes) = render(&OverlayRenderer::default(), Some(&result));

        assert!(summary.ready);
        assert_eq!(summary.zones, 2);
        assert_eq!(summary.plausible_zones, 1);
        assert_eq!(summary.lines, 4);
        // The last line of the second zone carries the restricted marker
        assert_eq!(summary.baselines, 3);
        assert_eq!(
            summary.confidence_labels,
            vec!["94.20% - 91.70%".to_string(), "63.00% - 18.40%".to_string()]
        );
        assert_eq!(
            summary.timing_label.as_deref(),
            Some("Total processing time: 42 ms")
        );
        assert!(shapes > 10);
    }

    #[test]
    fn test_empty_result_still_shows_timing() {
        let result = DetectionResult {
            frame_id: 0,
            is_success: false,
            zones: Vec::new(),
            duration_millis: 7,
            source_image_size: (640, 480),
        };
        let (summary, _) = render(&OverlayRenderer::default(), Some(&result));
        assert!(summary.ready);
        assert_eq!(summary.zones, 0);
        assert_eq!(summary.timing_label.as_deref(), Some("Total processing time: 7 ms"));
    }

    #[test]
    fn test_zero_sized_image_draws_no_zones() {
        let mut result = demo_result();
        result.source_image_size = (0, 0);
        let (summary, _) = render(&OverlayRenderer::default(), Some(&result));
        assert!(summary.timing_label.is_some());
        assert_eq!(summary.zones, 0);
    }

    #[test]
    fn test_roi_drawn_when_configured() {
        let mut config = AppConfig::default();
        let result = demo_result();

        let (summary, _) = render(&OverlayRenderer::from_config(&config), Some(&result));
        assert!(!summary.roi_drawn);

        config.engine.roi = [100.0, 1180.0, 300.0, 650.0];
        let (summary, _) = render(&OverlayRenderer::from_config(&config), Some(&result));
        assert!(summary.roi_drawn);

        config.overlay.draw_roi = false;
        let (summary, _) = render(&OverlayRenderer::from_config(&config), Some(&result));
        assert!(!summary.roi_drawn);
    }

    #[test]
    fn test_confidence_label_format() {
        let zones = parse_zones(
            r#"{"zones":[{"warpedBox":[0,0,1,0,1,1,0,1],"lines":[
                {"text":"A","confidence":99.999,"warpedBox":[0,0,1,0,1,1,0,1]},
                {"text":"B","confidence":5,"warpedBox":[0,0,1,0,1,1,0,1]}]}]}"#,
        )
        .unwrap();
        assert_eq!(confidence_label(&zones[0]), "100.00% - 5.00%");
    }

    #[test]
    fn test_rotated_box_geometry() {
        let corners = rotated_box(pos2(10.0, 10.0), vec2(4.0, 2.0), std::f32::consts::FRAC_PI_2);
        assert!((corners[1] - pos2(10.0, 14.0)).length() < 1e-4);
        assert!((corners[3] - pos2(8.0, 10.0)).length() < 1e-4);
        assert!((edge_angle(pos2(0.0, 0.0), pos2(0.0, 5.0)) - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_view_follows_newest_result() {
        let slot = Arc::new(ResultSlot::new());
        let mut view = OverlayView::new(OverlayRenderer::default(), slot.clone(), (720.0, 1280.0));

        assert!(!view.refresh().ready);

        slot.publish(demo_result());
        let summary = view.refresh();
        assert_eq!(summary.zones, 2);
        assert!(view.last_shape_count() > 0);

        slot.publish(DetectionResult {
            zones: Vec::new(),
            ..demo_result()
        });
        assert_eq!(view.refresh().zones, 0);
    }
}
