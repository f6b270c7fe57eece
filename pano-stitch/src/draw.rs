//! Frame preprocessing and annotation helpers.

use image::imageops;
use panocam::prelude::v1::*;

/// Gaussian blur of a single channel frame.
pub fn gaussian_blur(gray: &Frame, sigma: f32) -> Result<Frame> {
    ensure!(gray.channels() == 1, "only single channel frames are blurred");

    if sigma <= 0.0 {
        return Ok(gray.clone());
    }

    let image = gray.to_image()?.to_luma8();

    Ok(imageops::blur(&image, sigma).into())
}

/// Draw a rectangle outline centered on the edges of `rect`.
///
/// Channels without a matching `color` entry are set to 255. Parts outside the frame are
/// clipped.
pub fn draw_rect(frame: &mut Frame, rect: Rect, color: &[u8], thickness: usize) {
    if thickness == 0 || rect.width == 0 || rect.height == 0 || frame.is_empty() {
        return;
    }

    let (w, h) = (frame.width() as isize, frame.height() as isize);
    let t = thickness as isize;
    let half = t / 2;

    let (left, top) = (rect.x as isize, rect.y as isize);
    let (right, bottom) = (rect.right() as isize - 1, rect.bottom() as isize - 1);

    // Inclusive bounds of the outline and of the untouched area inside it.
    let outer = (left - half, top - half, right + half, bottom + half);
    let inner = (outer.0 + t, outer.1 + t, outer.2 - t, outer.3 - t);

    for y in outer.1.max(0)..=outer.3.min(h - 1) {
        for x in outer.0.max(0)..=outer.2.min(w - 1) {
            if x >= inner.0 && x <= inner.2 && y >= inner.1 && y <= inner.3 {
                continue;
            }

            for (c, v) in frame.pixel_mut(x as usize, y as usize).iter_mut().enumerate() {
                *v = color.get(c).copied().unwrap_or(255);
            }
        }
    }
}
