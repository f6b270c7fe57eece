//! Robust homography estimation.
//!
//! Minimal samples are fitted with the normalized direct linear transform, and the best
//! hypothesis of RANSAC is refined by fitting all of its inliers.

use nalgebra as na;
use rand::seq::SliceRandom;
use rand::Rng;

/// Number of correspondences in a minimal sample.
const SAMPLE_SIZE: usize = 4;

/// Twice the triangle area below which three points are considered collinear.
const COLLINEAR_EPS: f64 = 1e-3;

/// RANSAC configuration.
#[derive(Clone, Copy, Debug)]
pub struct Ransac {
    pub max_iters: usize,
    pub confidence: f64,
}

impl Default for Ransac {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            confidence: 0.995,
        }
    }
}

impl Ransac {
    /// Estimate a homography mapping `a` onto `b`.
    ///
    /// Returns the homography and the inlier mask, or `None` if fewer than 4 correspondences
    /// agree on any hypothesis.
    pub fn estimate(
        &self,
        a: &[na::Point2<f64>],
        b: &[na::Point2<f64>],
        thresh: f64,
        rng: &mut impl Rng,
    ) -> Option<(na::Matrix3<f64>, Vec<bool>)> {
        let n = a.len().min(b.len());

        if n < SAMPLE_SIZE {
            return None;
        }

        let indices = (0..n).collect::<Vec<_>>();

        let mut best: Option<(na::Matrix3<f64>, usize)> = None;
        let mut iters = self.max_iters;
        let mut iter = 0;

        while iter < iters {
            iter += 1;

            let sample = indices
                .choose_multiple(rng, SAMPLE_SIZE)
                .copied()
                .collect::<Vec<_>>();

            let sa = sample.iter().map(|&i| a[i]).collect::<Vec<_>>();
            let sb = sample.iter().map(|&i| b[i]).collect::<Vec<_>>();

            if is_degenerate(&sa) || is_degenerate(&sb) {
                continue;
            }

            let h = match fit(&sa, &sb) {
                Some(h) => h,
                None => continue,
            };

            let count = count_inliers(&h, a, b, thresh);

            if best.map(|(_, c)| count > c).unwrap_or(true) {
                best = Some((h, count));
                iters = iters.min(required_iters(
                    self.confidence,
                    count as f64 / n as f64,
                    self.max_iters,
                ));
            }
        }

        let (h, count) = best?;

        if count < SAMPLE_SIZE {
            return None;
        }

        let mask = inlier_mask(&h, a, b, thresh);

        // Refine on the whole consensus set, keeping it only if it does not lose support.
        let (ia, ib): (Vec<_>, Vec<_>) = mask
            .iter()
            .zip(a.iter().zip(b))
            .filter(|(m, _)| **m)
            .map(|(_, (a, b))| (*a, *b))
            .unzip();

        let h = match fit(&ia, &ib) {
            Some(refined) if count_inliers(&refined, a, b, thresh) >= count => refined,
            _ => h,
        };

        let mask = inlier_mask(&h, a, b, thresh);

        Some((h, mask))
    }
}

/// Least squares fit of a homography with the normalized direct linear transform.
///
/// At least 4 correspondences are required. The result is scaled so that its bottom-right
/// element is 1.
pub fn fit(a: &[na::Point2<f64>], b: &[na::Point2<f64>]) -> Option<na::Matrix3<f64>> {
    if a.len() < SAMPLE_SIZE || a.len() != b.len() {
        return None;
    }

    let (na_pts, ta) = normalize(a)?;
    let (nb_pts, tb) = normalize(b)?;

    let mut ata = na::SMatrix::<f64, 9, 9>::zeros();

    for (p, q) in na_pts.iter().zip(&nb_pts) {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);

        let r1 = na::SVector::<f64, 9>::from_column_slice(&[
            -x,
            -y,
            -1.0,
            0.0,
            0.0,
            0.0,
            u * x,
            u * y,
            u,
        ]);
        let r2 = na::SVector::<f64, 9>::from_column_slice(&[
            0.0,
            0.0,
            0.0,
            -x,
            -y,
            -1.0,
            v * x,
            v * y,
            v,
        ]);

        ata += r1 * r1.transpose() + r2 * r2.transpose();
    }

    let eigen = ata.symmetric_eigen();
    let h = eigen.eigenvectors.column(eigen.eigenvalues.imin());

    // The vector holds the matrix in row-major order.
    let hn = na::Matrix3::from_iterator(h.iter().copied()).transpose();

    let h = tb.try_inverse()? * hn * ta;
    let s = h[(2, 2)];

    if s.abs() <= f64::EPSILON || h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(h / s)
}

/// Hartley normalization: move the centroid to the origin and scale the mean distance to √2.
fn normalize(points: &[na::Point2<f64>]) -> Option<(Vec<na::Point2<f64>>, na::Matrix3<f64>)> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(na::Vector2::zeros(), |acc, p| acc + p.coords) / n;

    let mean_dist = points
        .iter()
        .map(|p| (p.coords - centroid).norm())
        .sum::<f64>()
        / n;

    if mean_dist <= f64::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;

    let t = na::matrix![
        s, 0.0, -s * centroid.x;
        0.0, s, -s * centroid.y;
        0.0, 0.0, 1.0
    ];

    let normalized = points
        .iter()
        .map(|p| na::Point2::from((p.coords - centroid) * s))
        .collect();

    Some((normalized, t))
}

/// Check whether any three points of a sample are collinear.
fn is_degenerate(points: &[na::Point2<f64>]) -> bool {
    let n = points.len();

    (0..n).any(|i| {
        (i + 1..n).any(|j| {
            (j + 1..n).any(|k| {
                let (p, q, r) = (points[i], points[j], points[k]);
                let cross = (q - p).perp(&(r - p));
                cross.abs() <= COLLINEAR_EPS
            })
        })
    })
}

/// Distance between the projection of `a` and `b`, infinite if `a` maps to infinity.
pub fn reprojection_error(h: &na::Matrix3<f64>, a: &na::Point2<f64>, b: &na::Point2<f64>) -> f64 {
    let v = h * na::Vector3::new(a.x, a.y, 1.0);

    if v.z.abs() <= f64::EPSILON {
        f64::INFINITY
    } else {
        (na::Point2::new(v.x / v.z, v.y / v.z) - b).norm()
    }
}

fn inlier_mask(
    h: &na::Matrix3<f64>,
    a: &[na::Point2<f64>],
    b: &[na::Point2<f64>],
    thresh: f64,
) -> Vec<bool> {
    a.iter()
        .zip(b)
        .map(|(a, b)| reprojection_error(h, a, b) <= thresh)
        .collect()
}

fn count_inliers(
    h: &na::Matrix3<f64>,
    a: &[na::Point2<f64>],
    b: &[na::Point2<f64>],
    thresh: f64,
) -> usize {
    a.iter()
        .zip(b)
        .filter(|(a, b)| reprojection_error(h, a, b) <= thresh)
        .count()
}

/// Number of iterations needed to draw an all-inlier sample with the given confidence.
fn required_iters(confidence: f64, inlier_ratio: f64, max_iters: usize) -> usize {
    let p = inlier_ratio.powi(SAMPLE_SIZE as i32);

    if p >= 1.0 {
        return 1;
    }

    if p <= 0.0 {
        return max_iters;
    }

    let iters = (1.0 - confidence).ln() / (1.0 - p).ln();

    if iters.is_finite() {
        (iters.ceil().max(1.0) as usize).min(max_iters)
    } else {
        max_iters
    }
}
