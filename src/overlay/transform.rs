//! Image-to-surface letterbox transform

/// Maps image pixel coordinates onto an aspect-fit, centered display surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    scale: f32,
    scaled_width: u32,
    scaled_height: u32,
    x_offset: i32,
    y_offset: i32,
}

impl ViewTransform {
    /// `image` must already be in display orientation (width and height
    /// swapped for quarter-turn rotations). `None` for an empty image.
    pub fn new(image: (u32, u32), surface: (u32, u32)) -> Option<Self> {
        let (image_width, image_height) = image;
        let (surface_width, surface_height) = surface;
        if image_width == 0 || image_height == 0 {
            return None;
        }

        let scale = (surface_width as f32 / image_width as f32)
            .min(surface_height as f32 / image_height as f32);
        let scaled_width = (image_width as f32 * scale).round() as u32;
        let scaled_height = (image_height as f32 * scale).round() as u32;
        let x_offset = (surface_width as i32 - scaled_width as i32) >> 1;
        let y_offset = (surface_height as i32 - scaled_height as i32) >> 1;

        Some(Self {
            scale,
            scaled_width,
            scaled_height,
            x_offset,
            y_offset,
        })
    }

    pub fn x(&self, px: f32) -> f32 {
        px * self.scale + self.x_offset as f32
    }

    pub fn y(&self, py: f32) -> f32 {
        py * self.scale + self.y_offset as f32
    }

    pub fn point(&self, (px, py): (f32, f32)) -> (f32, f32) {
        (self.x(px), self.y(py))
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn scaled_size(&self) -> (u32, u32) {
        (self.scaled_width, self.scaled_height)
    }

    pub fn offset(&self) -> (i32, i32) {
        (self.x_offset, self.y_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_letterboxed(image: (u32, u32), surface: (u32, u32)) {
        let t = ViewTransform::new(image, surface).unwrap();
        let (w, h) = (image.0 as f32, image.1 as f32);
        let (sw, sh) = surface;
        let (scaled_w, scaled_h) = t.scaled_size();

        assert!(scaled_w <= sw && scaled_h <= sh, "{image:?} on {surface:?}");

        let (left, top) = t.point((0.0, 0.0));
        let (right, bottom) = t.point((w, h));
        assert_eq!(t.point((w, 0.0)), (right, top));
        assert_eq!(t.point((0.0, h)), (left, bottom));

        let left_margin = left;
        let right_margin = sw as f32 - right;
        let top_margin = top;
        let bottom_margin = sh as f32 - bottom;
        assert!((left_margin - right_margin).abs() <= 1.5, "{image:?} on {surface:?}");
        assert!((top_margin - bottom_margin).abs() <= 1.5, "{image:?} on {surface:?}");
        assert!(left_margin >= 0.0 && top_margin >= 0.0);
        // One axis is filled edge to edge
        assert!(left_margin.min(top_margin) < 1.0);
    }

    #[test]
    fn test_wide_image_on_tall_surface() {
        let t = ViewTransform::new((1280, 720), (720, 1280)).unwrap();
        assert!((t.scale() - 0.5625).abs() < 1e-6);
        assert_eq!(t.scaled_size(), (720, 405));
        assert_eq!(t.offset(), (0, 437));
        assert_eq!(t.point((640.0, 360.0)), (360.0, 639.5));
    }

    #[test]
    fn test_exact_fit_has_no_offset() {
        let t = ViewTransform::new((640, 480), (1280, 960)).unwrap();
        assert_eq!(t.scale(), 2.0);
        assert_eq!(t.offset(), (0, 0));
        assert_eq!(t.point((10.0, 20.0)), (20.0, 40.0));
    }

    #[test]
    fn test_offset_floors_odd_margins() {
        let t = ViewTransform::new((100, 100), (201, 100)).unwrap();
        assert_eq!(t.scaled_size(), (100, 100));
        assert_eq!(t.offset(), (50, 0));
    }

    #[test]
    fn test_rotated_frame_dimensions() {
        // Sensor 1280x720 rotated by 90 degrees is displayed as 720x1280
        let t = ViewTransform::new((720, 1280), (1080, 1920)).unwrap();
        assert_eq!(t.scaled_size(), (1080, 1920));
        assert_eq!(t.offset(), (0, 0));
    }

    #[test]
    fn test_letterbox_margins_are_even() {
        let sizes = [(640, 480), (1280, 720), (720, 1280), (333, 777), (1, 1), (4000, 3)];
        let surfaces = [(800, 600), (1080, 1920), (1921, 1079), (17, 5)];
        for image in sizes {
            for surface in surfaces {
                assert_letterboxed(image, surface);
            }
        }
    }

    #[test]
    fn test_empty_image() {
        assert!(ViewTransform::new((0, 480), (800, 600)).is_none());
        assert!(ViewTransform::new((640, 0), (800, 600)).is_none());
    }
}
