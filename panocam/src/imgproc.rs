//! # Pure image processing primitives
//!
//! Pixel-wise arithmetic, thresholding, morphology, warping and contour extraction over
//! [`Frame`] buffers. None of these functions keep state.

use crate::frame::{Frame, Pixel};
use crate::geometry::{Contour, Homography};
use anyhow::{ensure, Result};
use nalgebra as na;

/// Blend `frame` into the running average `background`.
///
/// Every element becomes `(1 - alpha) * background + alpha * frame`.
pub fn accumulate_weighted(background: &mut Frame<f64>, frame: &Frame, alpha: f32) -> Result<()> {
    ensure!(
        background.same_shape(frame),
        "cannot accumulate a {:?}x{} frame into a {:?}x{} average",
        frame.dim(),
        frame.channels(),
        background.dim(),
        background.channels()
    );

    let alpha = alpha as f64;

    background
        .as_mut_slice()
        .iter_mut()
        .zip(frame.as_slice())
        .for_each(|(bg, &px)| *bg = (1.0 - alpha) * *bg + alpha * px as f64);

    Ok(())
}

/// Take the absolute value of every element and saturate it to 8 bits.
///
/// Values are rounded to the nearest integer, ties go to the even one.
pub fn convert_scale_abs(frame: &Frame<f64>) -> Frame {
    frame.map(|v| round_half_even(v.abs()).min(255.0) as u8)
}

fn round_half_even(v: f64) -> f64 {
    let r = v.round();
    if (r - v).abs() == 0.5 {
        2.0 * (v / 2.0).round()
    } else {
        r
    }
}

/// Per-element absolute difference of two equally shaped frames.
pub fn abs_diff(a: &Frame, b: &Frame) -> Result<Frame> {
    ensure!(a.same_shape(b), "cannot diff frames of different shapes");

    let data = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&a, &b)| a.abs_diff(b))
        .collect();

    Frame::from_vec(a.width(), a.height(), a.channels(), data)
}

/// Binary threshold: elements strictly above `thresh` become `max`, the rest become 0.
pub fn threshold_binary(frame: &Frame, thresh: u8, max: u8) -> Frame {
    frame.map(|v| if v > thresh { max } else { 0 })
}

/// Dilate with a 3x3 rectangular structuring element, `iterations` times.
///
/// Pixels outside the frame never contribute to the maximum.
pub fn dilate(mask: &Frame, iterations: usize) -> Frame {
    (0..iterations).fold(mask.clone(), |acc, _| dilate_once(&acc))
}

fn dilate_once(src: &Frame) -> Frame {
    let (w, h) = src.dim();
    let c = src.channels();

    // The rectangular kernel is separable: horizontal pass, then vertical pass.
    let mut horiz = Frame::new(w, h, c);
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                let lo = x.saturating_sub(1);
                let hi = (x + 1).min(w - 1);
                let m = (lo..=hi).map(|sx| src.get(sx, y, ch)).max().unwrap_or(0);
                horiz.set(x, y, ch, m);
            }
        }
    }

    let mut out = Frame::new(w, h, c);
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                let lo = y.saturating_sub(1);
                let hi = (y + 1).min(h - 1);
                let m = (lo..=hi).map(|sy| horiz.get(x, sy, ch)).max().unwrap_or(0);
                out.set(x, y, ch, m);
            }
        }
    }

    out
}

/// Warp `frame` onto a `width` by `height` canvas.
///
/// Every canvas pixel is mapped back through the inverse homography and sampled bilinearly.
/// Samples that fall outside the source take the value 0. A singular homography produces a
/// blank canvas.
pub fn warp_perspective(
    frame: &Frame,
    homography: &Homography,
    width: usize,
    height: usize,
) -> Frame {
    let channels = frame.channels();
    let mut out = Frame::new(width, height, channels);

    let inv = match homography.inverse() {
        Some(inv) => inv,
        None => return out,
    };

    let (sw, sh) = (frame.width() as isize, frame.height() as isize);

    let sample = |x: isize, y: isize, c: usize| -> f32 {
        if x < 0 || y < 0 || x >= sw || y >= sh {
            0.0
        } else {
            frame.get(x as usize, y as usize, c) as f32
        }
    };

    for v in 0..height {
        for u in 0..width {
            let src = match inv.transform_point(na::Point2::new(u as f64, v as f64)) {
                Some(src) => src,
                None => continue,
            };

            if src.x <= -1.0 || src.y <= -1.0 || src.x >= sw as f64 || src.y >= sh as f64 {
                continue;
            }

            let x0 = src.x.floor();
            let y0 = src.y.floor();
            let fx = (src.x - x0) as f32;
            let fy = (src.y - y0) as f32;
            let (x0, y0) = (x0 as isize, y0 as isize);

            let px = out.pixel_mut(u, v);

            for (c, dst) in px.iter_mut().enumerate() {
                let top = sample(x0, y0, c) * (1.0 - fx) + sample(x0 + 1, y0, c) * fx;
                let bottom = sample(x0, y0 + 1, c) * (1.0 - fx) + sample(x0 + 1, y0 + 1, c) * fx;
                *dst = u8::from_f64((top * (1.0 - fy) + bottom * fy) as f64);
            }
        }
    }

    out
}

/// Clockwise neighbour offsets (y axis pointing down), starting east.
const RING: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

fn ring_index(d: na::Vector2<i32>) -> usize {
    RING.iter()
        .position(|&(x, y)| x == d.x && y == d.y)
        .unwrap_or(4)
}

/// Extract the outer boundaries of every 8-connected non-zero region of a single channel mask.
///
/// Regions that sit inside a hole of another region are skipped. Boundaries are compressed so
/// that straight horizontal, vertical and diagonal runs only keep their end points.
pub fn find_external_contours(mask: &Frame) -> Result<Vec<Contour>> {
    ensure!(
        mask.channels() == 1,
        "contours need a single channel mask, got {} channels",
        mask.channels()
    );

    let (w, h) = mask.dim();
    let outside = outside_background(mask);
    let mut visited = vec![false; w * h];
    let mut contours = vec![];

    let fg = |x: i32, y: i32| {
        x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h && mask.get(x as usize, y as usize, 0) != 0
    };

    for y in 0..h {
        for x in 0..w {
            if visited[y * w + x] || mask.get(x, y, 0) == 0 {
                continue;
            }

            // Flood fill the whole region so it is traced only once, and find out whether any of
            // its pixels borders the background connected to the frame edge.
            let mut external = false;
            visited[y * w + x] = true;
            let mut to_fill = vec![(x, y)];

            while let Some((cx, cy)) = to_fill.pop() {
                if cx == 0 || cy == 0 || cx == w - 1 || cy == h - 1 {
                    external = true;
                }

                for (ox, oy) in RING {
                    let (nx, ny) = (cx as i32 + ox, cy as i32 + oy);

                    if nx < 0 || ny < 0 || nx as usize >= w || ny as usize >= h {
                        continue;
                    }

                    let (nx, ny) = (nx as usize, ny as usize);
                    let idx = ny * w + nx;

                    if mask.get(nx, ny, 0) != 0 {
                        if !visited[idx] {
                            visited[idx] = true;
                            to_fill.push((nx, ny));
                        }
                    } else if (ox == 0 || oy == 0) && outside[idx] {
                        external = true;
                    }
                }
            }

            if external {
                let start = na::Point2::new(x as i32, y as i32);
                contours.push(Contour::new(compress_chain(trace_boundary(&fg, start))));
            }
        }
    }

    Ok(contours)
}

/// Mark background pixels 4-connected to the frame edge.
fn outside_background(mask: &Frame) -> Vec<bool> {
    let (w, h) = mask.dim();
    let mut outside = vec![false; w * h];
    let mut to_fill = vec![];

    let border = (0..w)
        .flat_map(|x| [(x, 0), (x, h.saturating_sub(1))])
        .chain((0..h).flat_map(|y| [(0, y), (w.saturating_sub(1), y)]));

    for (x, y) in border {
        if w > 0 && h > 0 && mask.get(x, y, 0) == 0 && !outside[y * w + x] {
            outside[y * w + x] = true;
            to_fill.push((x, y));
        }
    }

    while let Some((x, y)) = to_fill.pop() {
        let neighbors = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];

        for (nx, ny) in neighbors {
            if nx < w && ny < h && mask.get(nx, ny, 0) == 0 && !outside[ny * w + nx] {
                outside[ny * w + nx] = true;
                to_fill.push((nx, ny));
            }
        }
    }

    outside
}

/// Moore neighbour tracing of the region containing `start`.
///
/// `start` must be the first region pixel in raster order, so that its west neighbour is
/// background. Tracing stops once `start` is left towards the second boundary pixel again.
fn trace_boundary(fg: impl Fn(i32, i32) -> bool, start: na::Point2<i32>) -> Vec<na::Point2<i32>> {
    let mut points = vec![start];
    let mut cur = start;
    let mut back = start + na::Vector2::new(-1, 0);
    let mut second = None;

    loop {
        let first = ring_index(back - cur);
        let mut next = None;

        for k in 0..RING.len() {
            let (ox, oy) = RING[(first + k) % RING.len()];
            let candidate = cur + na::Vector2::new(ox, oy);

            if fg(candidate.x, candidate.y) {
                next = Some(candidate);
                break;
            }

            back = candidate;
        }

        // Isolated pixel.
        let next = match next {
            Some(next) => next,
            None => break,
        };

        match second {
            None => second = Some(next),
            Some(second) if cur == start && next == second => break,
            _ => {}
        }

        points.push(next);
        cur = next;
    }

    if points.len() > 1 && points.last() == points.first() {
        points.pop();
    }

    points
}

/// Drop points lying in the middle of straight runs of a closed chain.
fn compress_chain(points: Vec<na::Point2<i32>>) -> Vec<na::Point2<i32>> {
    let n = points.len();

    if n < 3 {
        return points;
    }

    (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let cur = points[i];
            let next = points[(i + 1) % n];
            cur - prev != next - cur
        })
        .map(|i| points[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use assert_approx_eq::assert_approx_eq;

    fn mask_with(w: usize, h: usize, rects: &[Rect]) -> Frame {
        let mut mask = Frame::new(w, h, 1);
        for r in rects {
            for y in r.y..r.bottom() {
                for x in r.x..r.right() {
                    mask.set(x, y, 0, 255);
                }
            }
        }
        mask
    }

    #[test]
    fn accumulate_blends() {
        let mut bg = Frame::<f64>::filled(2, 2, 1, 100.0);
        let frame = Frame::filled(2, 2, 1, 200u8);

        accumulate_weighted(&mut bg, &frame, 0.25).unwrap();
        assert!(bg.as_slice().iter().all(|&v| (v - 125.0).abs() < 1e-4));

        assert!(accumulate_weighted(&mut bg, &Frame::new(3, 2, 1), 0.5).is_err());
    }

    #[test]
    fn threshold_is_strict() {
        let frame = Frame::from_vec(3, 1, 1, vec![4u8, 5, 6]).unwrap();
        assert_eq!(threshold_binary(&frame, 5, 255).as_slice(), &[0, 0, 255]);
    }

    #[test]
    fn convert_rounds_and_saturates() {
        let frame = Frame::from_vec(4, 1, 1, vec![1.4f64, 1.6, -3.0, 300.0]).unwrap();
        assert_eq!(convert_scale_abs(&frame).as_slice(), &[1, 2, 3, 255]);
    }

    #[test]
    fn convert_rounds_ties_to_even() {
        let frame = Frame::from_vec(5, 1, 1, vec![0.5f64, 1.5, 2.5, 106.5, 107.5]).unwrap();
        assert_eq!(convert_scale_abs(&frame).as_slice(), &[0, 2, 2, 106, 108]);
    }

    #[test]
    fn dilate_grows_by_iterations() {
        let mask = mask_with(11, 11, &[Rect::new(5, 5, 1, 1)]);

        let once = dilate(&mask, 1);
        assert_eq!(once.as_slice().iter().filter(|&&v| v != 0).count(), 9);

        let twice = dilate(&mask, 2);
        assert_eq!(twice.as_slice().iter().filter(|&&v| v != 0).count(), 25);
        assert_eq!(twice.get(3, 3, 0), 255);
        assert_eq!(twice.get(2, 3, 0), 0);

        // Border pixels only grow inwards.
        let corner = dilate(&mask_with(4, 4, &[Rect::new(0, 0, 1, 1)]), 1);
        assert_eq!(corner.as_slice().iter().filter(|&&v| v != 0).count(), 4);
    }

    #[test]
    fn block_contour() {
        let mask = mask_with(20, 20, &[Rect::new(3, 4, 6, 5)]);
        let contours = find_external_contours(&mask).unwrap();

        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].points.len(), 4);
        assert_approx_eq!(contours[0].area(), 20.0);
        assert_eq!(contours[0].bounding_rect(), Rect::new(3, 4, 6, 5));
    }

    #[test]
    fn separate_and_diagonal_regions() {
        let mask = mask_with(
            30,
            30,
            &[
                Rect::new(1, 1, 3, 3),
                Rect::new(4, 4, 3, 3),
                Rect::new(20, 20, 5, 2),
            ],
        );
        let contours = find_external_contours(&mask).unwrap();

        // The first two touch diagonally and form one 8-connected region.
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[0].bounding_rect(), Rect::new(1, 1, 6, 6));
        assert_eq!(contours[1].bounding_rect(), Rect::new(20, 20, 5, 2));
    }

    #[test]
    fn nested_regions_are_skipped() {
        // Ring with a blob in its hole.
        let mut mask = mask_with(20, 20, &[Rect::new(2, 2, 12, 12)]);
        for y in 4..12 {
            for x in 4..12 {
                mask.set(x, y, 0, 0);
            }
        }
        mask.set(7, 7, 0, 255);
        mask.set(8, 7, 0, 255);

        let contours = find_external_contours(&mask).unwrap();

        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].bounding_rect(), Rect::new(2, 2, 12, 12));
    }

    #[test]
    fn thin_shapes() {
        let mask = mask_with(10, 10, &[Rect::new(2, 5, 4, 1), Rect::new(8, 8, 1, 1)]);
        let contours = find_external_contours(&mask).unwrap();

        assert_eq!(contours.len(), 2);
        assert_eq!(
            contours[0].points,
            vec![na::Point2::new(2, 5), na::Point2::new(5, 5)]
        );
        assert_eq!(contours[0].area(), 0.0);
        assert_eq!(contours[1].points, vec![na::Point2::new(8, 8)]);
    }

    #[test]
    fn contours_need_single_channel() {
        assert!(find_external_contours(&Frame::new(4, 4, 3)).is_err());
    }

    #[test]
    fn warp_translation() {
        let mut frame = Frame::new(4, 3, 1);
        for y in 0..3 {
            for x in 0..4 {
                frame.set(x, y, 0, (10 * (y * 4 + x) + 1) as u8);
            }
        }

        let out = warp_perspective(&frame, &Homography::translation(3.0, 1.0), 8, 4);

        assert_eq!(out.get(3, 1, 0), frame.get(0, 0, 0));
        assert_eq!(out.get(6, 3, 0), frame.get(3, 2, 0));
        assert_eq!(out.get(0, 0, 0), 0);
        assert_eq!(out.get(7, 1, 0), 0);
    }
}
