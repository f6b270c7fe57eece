//! FAST-9 corner detection with 3x3 non-maximum suppression.

use panocam::prelude::v1::*;

/// Bresenham circle of radius 3, clockwise starting from the top.
const CIRCLE: [(isize, isize); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Minimum number of contiguous circle pixels that must be brighter or darker than the center.
const ARC_LEN: usize = 9;

/// Detected corner with its strength.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Corner {
    pub x: usize,
    pub y: usize,
    pub score: u32,
}

/// Detect corners of a single channel frame.
///
/// # Arguments
///
/// * `gray` - single channel input.
/// * `threshold` - minimum intensity difference between center and circle pixels.
/// * `border` - corners closer than this to the frame edge are not reported. Clamped to at least
///   the circle radius.
///
/// Corners are returned in raster order.
pub fn detect(gray: &Frame, threshold: u8, border: usize) -> Vec<Corner> {
    let (w, h) = gray.dim();
    let border = border.max(3);

    if w <= 2 * border || h <= 2 * border {
        return vec![];
    }

    let mut scores = vec![0u32; w * h];

    for y in border..(h - border) {
        for x in border..(w - border) {
            scores[y * w + x] = corner_score(gray, x, y, threshold);
        }
    }

    let mut corners = vec![];

    for y in border..(h - border) {
        for x in border..(w - border) {
            let idx = y * w + x;
            let score = scores[idx];

            if score == 0 {
                continue;
            }

            // Ties go to the first pixel in raster order.
            let is_max = (y - 1..=y + 1)
                .flat_map(|ny| (x - 1..=x + 1).map(move |nx| ny * w + nx))
                .filter(|&n| n != idx)
                .all(|n| score > scores[n] || (score == scores[n] && n > idx));

            if is_max {
                corners.push(Corner { x, y, score });
            }
        }
    }

    corners
}

/// Score a single pixel, 0 if it is not a corner.
///
/// The score is the summed excess difference over the threshold of the brighter or the darker
/// circle pixels, whichever is larger.
fn corner_score(gray: &Frame, x: usize, y: usize, threshold: u8) -> u32 {
    let center = gray.get(x, y, 0) as i32;
    let t = threshold as i32;

    let mut ring = [0i32; 16];

    for (v, (ox, oy)) in ring.iter_mut().zip(CIRCLE) {
        *v = gray.get((x as isize + ox) as usize, (y as isize + oy) as usize, 0) as i32 - center;
    }

    let bright = has_arc(&ring, |d| d > t);
    let dark = has_arc(&ring, |d| d < -t);

    if !bright && !dark {
        return 0;
    }

    let bright_sum = ring.iter().filter(|&&d| d > t).map(|&d| d - t).sum::<i32>();
    let dark_sum = ring.iter().filter(|&&d| d < -t).map(|&d| -d - t).sum::<i32>();

    match (bright, dark) {
        (true, false) => bright_sum as u32,
        (false, true) => dark_sum as u32,
        _ => bright_sum.max(dark_sum) as u32,
    }
}

fn has_arc(ring: &[i32; 16], pred: impl Fn(i32) -> bool) -> bool {
    let mut run = 0;

    for i in 0..(ring.len() + ARC_LEN - 1) {
        if pred(ring[i % ring.len()]) {
            run += 1;
            if run >= ARC_LEN {
                return true;
            }
        } else {
            run = 0;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(w: usize, h: usize, x0: usize, y0: usize, side: usize, val: u8) -> Frame {
        let mut frame = Frame::new(w, h, 1);
        for y in y0..(y0 + side) {
            for x in x0..(x0 + side) {
                frame.set(x, y, 0, val);
            }
        }
        frame
    }

    #[test]
    fn square_has_four_corners() {
        let frame = square(40, 40, 15, 15, 10, 200);
        let corners = detect(&frame, 20, 3);

        let positions = corners.iter().map(|c| (c.x, c.y)).collect::<Vec<_>>();

        assert_eq!(positions, vec![(15, 15), (24, 15), (15, 24), (24, 24)]);
        assert!(corners.iter().all(|c| c.score == corners[0].score));
    }

    #[test]
    fn flat_and_low_contrast_images() {
        assert!(detect(&Frame::filled(32, 32, 1, 90u8), 20, 3).is_empty());
        assert!(detect(&square(40, 40, 15, 15, 10, 15), 20, 3).is_empty());
    }

    #[test]
    fn border_is_respected() {
        let frame = square(40, 40, 15, 15, 10, 200);
        assert!(detect(&frame, 20, 16).is_empty());
        assert!(detect(&Frame::new(6, 6, 1), 20, 3).is_empty());
    }
}
