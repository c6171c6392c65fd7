//! Bounding-box guided image cropping.

use crate::{bbox::BoxCxCyWH, common::*};

/// Cropping options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropperInit {
    /// When unset, the whole image is used and the bounding box is ignored.
    pub use_bbox: bool,
    /// Expands the crop window by `padding_size` pixels on every side.
    pub padding: bool,
    pub padding_size: i64,
    /// Randomly shifts the crop window by up to `padding_size` pixels.
    pub use_shift: bool,
}

impl Default for CropperInit {
    fn default() -> Self {
        Self {
            use_bbox: true,
            padding: false,
            padding_size: 0,
            use_shift: false,
        }
    }
}

impl CropperInit {
    pub fn build(self) -> Cropper {
        Cropper {
            init: self,
            rng: StdRng::from_entropy(),
        }
    }
}

pub struct Cropper {
    init: CropperInit,
    rng: StdRng,
}

impl Debug for Cropper {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cropper").field("init", &self.init).finish()
    }
}

impl Cropper {
    pub fn crop(&mut self, image: &DynamicImage, bbox: &BoxCxCyWH) -> Result<DynamicImage> {
        use image::GenericImageView as _;

        let CropperInit {
            use_bbox,
            padding,
            padding_size,
            use_shift,
        } = self.init;

        if !use_bbox {
            return Ok(image.clone());
        }

        let (width, height) = image.dimensions();
        let corners = bbox.to_pixel_tlbr(width, height);
        let (mut top, mut left, mut bottom, mut right) =
            (corners.t, corners.l, corners.b, corners.r);

        if padding && padding_size > 0 {
            top = (top - padding_size).max(0);
            left = (left - padding_size).max(0);
            bottom = (bottom + padding_size).min(height as i64 - 1);
            right = (right + padding_size).min(width as i64 - 1);
        }

        if use_shift && padding_size > 0 {
            let shift_x = self
                .rng
                .gen_range(-padding_size..=padding_size)
                .clamp(-left, width as i64 - 1 - right);
            let shift_y = self
                .rng
                .gen_range(-padding_size..=padding_size)
                .clamp(-top, height as i64 - 1 - bottom);
            top += shift_y;
            bottom += shift_y;
            left += shift_x;
            right += shift_x;
        }

        ensure!(
            top <= bottom && left <= right,
            "degenerate crop window t={} l={} b={} r={}",
            top,
            left,
            bottom,
            right
        );

        Ok(image.crop_imm(
            left as u32,
            top as u32,
            (right - left + 1) as u32,
            (bottom - top + 1) as u32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView as _;

    fn blank(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
    }

    #[test]
    fn whole_image_when_bbox_disabled() {
        let mut cropper = CropperInit {
            use_bbox: false,
            ..Default::default()
        }
        .build();

        let image = blank(64, 48);
        let bbox = BoxCxCyWH::new(0.5, 0.5, 0.1, 0.1).unwrap();
        let out = cropper.crop(&image, &bbox).unwrap();
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn bbox_crop_matches_pixel_window() {
        let mut cropper = CropperInit::default().build();
        let image = blank(100, 100);
        let bbox = BoxCxCyWH::new(0.5, 0.5, 0.5, 0.3).unwrap();

        let out = cropper.crop(&image, &bbox).unwrap();
        assert_eq!(out.dimensions(), (51, 31));
    }

    #[test]
    fn padding_expands_but_stays_inside() {
        let mut cropper = CropperInit {
            padding: true,
            padding_size: 30,
            ..Default::default()
        }
        .build();
        let image = blank(100, 100);
        let bbox = BoxCxCyWH::new(0.1, 0.1, 0.2, 0.2).unwrap();

        let out = cropper.crop(&image, &bbox).unwrap();
        let (width, height) = out.dimensions();
        assert!(width <= 100 && height <= 100);
        assert!(width > 21 && height > 21);
    }
}
