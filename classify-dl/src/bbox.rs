//! Bounding box types for annotated classification crops.

use crate::common::*;

/// A bounding box in normalized center format, as stored in annotation
/// sidecar files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCxCyWH {
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
}

/// Pixel corners in top-left-bottom-right order, clamped to image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelTlbr {
    pub t: i64,
    pub l: i64,
    pub b: i64,
    pub r: i64,
}

impl BoxCxCyWH {
    pub fn new(cx: f64, cy: f64, w: f64, h: f64) -> Result<Self> {
        ensure!(
            [cx, cy, w, h].iter().all(|value| value.is_finite()),
            "box components must be finite"
        );
        ensure!(w >= 0.0 && h >= 0.0, "box size must not be negative");
        Ok(Self { cx, cy, w, h })
    }

    /// The whole-image box.
    pub fn full() -> Self {
        Self {
            cx: 0.5,
            cy: 0.5,
            w: 1.0,
            h: 1.0,
        }
    }

    pub fn to_pixel_tlbr(&self, image_width: u32, image_height: u32) -> PixelTlbr {
        let width = image_width as f64;
        let height = image_height as f64;

        let clamp_x = |value: f64| (value.round() as i64).clamp(0, image_width as i64 - 1);
        let clamp_y = |value: f64| (value.round() as i64).clamp(0, image_height as i64 - 1);

        PixelTlbr {
            t: clamp_y((self.cy - self.h / 2.0) * height),
            l: clamp_x((self.cx - self.w / 2.0) * width),
            b: clamp_y((self.cy + self.h / 2.0) * height),
            r: clamp_x((self.cx + self.w / 2.0) * width),
        }
    }
}
