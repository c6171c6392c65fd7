//! Image annotation for evaluation artifacts.

use crate::{
    bbox::{BoxCxCyWH, PixelTlbr},
    common::*,
};
use image::Rgb;

pub const CORRECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const CORRECT_STROKE: i64 = 2;
pub const WRONG_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const WRONG_STROKE: i64 = 1;

/// Draws an axis-aligned rectangle outline. The stroke grows inward and
/// out-of-bounds pixels are discarded.
pub fn draw_rect(
    canvas: &mut RgbImage,
    top: i64,
    left: i64,
    bottom: i64,
    right: i64,
    stroke: i64,
    color: Rgb<u8>,
) {
    let (width, height) = canvas.dimensions();
    let mut put = |x: i64, y: i64| {
        if (0..width as i64).contains(&x) && (0..height as i64).contains(&y) {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    };

    for inset in 0..stroke {
        let (t, l, b, r) = (top + inset, left + inset, bottom - inset, right - inset);
        if t > b || l > r {
            break;
        }
        for x in l..=r {
            put(x, t);
            put(x, b);
        }
        for y in t..=b {
            put(l, y);
            put(r, y);
        }
    }
}

/// Writes an annotated copy of `source` to `dest`, with the bounding box
/// outlined in the correct/wrong style of the evaluation artifacts.
pub fn annotate_prediction(
    source: &Path,
    bbox: &BoxCxCyWH,
    correct: bool,
    dest: &Path,
) -> Result<()> {
    let image = image::open(source)
        .with_context(|| format!("failed to read image '{}'", source.display()))?;
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();
    let PixelTlbr { t, l, b, r } = bbox.to_pixel_tlbr(width, height);

    let (color, stroke) = if correct {
        (CORRECT_COLOR, CORRECT_STROKE)
    } else {
        (WRONG_COLOR, WRONG_STROKE)
    };
    draw_rect(&mut canvas, t - 1, l - 1, b, r, stroke, color);

    canvas
        .save(dest)
        .with_context(|| format!("failed to write image '{}'", dest.display()))?;
    Ok(())
}
