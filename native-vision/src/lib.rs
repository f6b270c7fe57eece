//! # Pure Rust vision backend
//!
//! Implements the [`Vision`] capability without any native libraries:
//!
//! * FAST-9 corners with non-maximum suppression.
//! * BRIEF-256 descriptors sampled from a box-smoothed image.
//! * Brute-force Hamming k-NN matching.
//! * RANSAC over the normalized direct linear transform, refined on the consensus set.
//!
//! Every step is deterministic. RANSAC draws its samples from a generator seeded on each call.

use log::*;
use nalgebra as na;
use panocam::prelude::v1::*;
use rand::{rngs::StdRng, SeedableRng};

pub mod brief;
pub mod fast;
pub mod homography;
pub mod matcher;

pub use brief::Descriptor;

/// Keypoints closer than this to the frame edge are not described, so that every BRIEF sample
/// lies within the frame.
pub const BORDER: usize = brief::PATCH_RADIUS as usize + brief::SMOOTH_RADIUS + 2;

/// Vision backend written entirely in Rust.
pub struct NativeVision {
    fast_threshold: u8,
    max_keypoints: usize,
    ransac: homography::Ransac,
    seed: u64,
    pattern: brief::Pattern,
}

impl Default for NativeVision {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 2000,
            ransac: Default::default(),
            seed: 0,
            pattern: Default::default(),
        }
    }
}

impl NativeVision {
    /// Minimum intensity difference for FAST corner detection.
    pub fn fast_threshold(self, fast_threshold: u8) -> Self {
        Self {
            fast_threshold,
            ..self
        }
    }

    /// Keep only this many of the strongest corners per frame.
    pub fn max_keypoints(self, max_keypoints: usize) -> Self {
        Self {
            max_keypoints,
            ..self
        }
    }

    pub fn max_iters(self, max_iters: usize) -> Self {
        Self {
            ransac: homography::Ransac {
                max_iters,
                ..self.ransac
            },
            ..self
        }
    }

    pub fn desired_confidence(self, confidence: f64) -> Self {
        Self {
            ransac: homography::Ransac {
                confidence,
                ..self.ransac
            },
            ..self
        }
    }

    /// Seed of the RANSAC sampler.
    pub fn seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
}

impl Vision for NativeVision {
    type Descriptors = Vec<Descriptor>;

    fn detect_and_describe(&self, frame: &Frame) -> Result<Features<Vec<Descriptor>>> {
        ensure!(!frame.is_empty(), "cannot detect features in an empty frame");

        let gray = frame.to_gray();

        let mut corners = fast::detect(&gray, self.fast_threshold, BORDER);
        let total = corners.len();

        // Stable sort keeps raster order among equally strong corners.
        corners.sort_by(|a, b| b.score.cmp(&a.score));
        corners.truncate(self.max_keypoints);

        let smoothed = brief::box_blur(&gray, brief::SMOOTH_RADIUS);

        let features = Features {
            keypoints: corners
                .iter()
                .map(|c| Keypoint::new(c.x as f32, c.y as f32))
                .collect(),
            descriptors: corners
                .iter()
                .map(|c| self.pattern.describe(&smoothed, c.x, c.y))
                .collect(),
        };

        trace!(
            "{} of {} corners described in {:?} frame",
            features.keypoints.len(),
            total,
            frame.dim()
        );

        Ok(features)
    }

    fn knn_match(
        &self,
        query: &Vec<Descriptor>,
        train: &Vec<Descriptor>,
        k: usize,
    ) -> Result<Vec<Vec<KnnMatch>>> {
        Ok(matcher::knn(query, train, k))
    }

    fn find_homography(
        &self,
        points_a: &[Keypoint],
        points_b: &[Keypoint],
        reproj_thresh: f64,
    ) -> Result<Option<(Homography, Vec<bool>)>> {
        ensure!(
            points_a.len() == points_b.len(),
            "point sets differ in length: {} vs {}",
            points_a.len(),
            points_b.len()
        );
        ensure!(
            reproj_thresh > 0.0,
            "reprojection threshold must be positive"
        );

        let to_f64 = |p: &Keypoint| na::Point2::new(p.x as f64, p.y as f64);
        let a = points_a.iter().map(to_f64).collect::<Vec<_>>();
        let b = points_b.iter().map(to_f64).collect::<Vec<_>>();

        let mut rng = StdRng::seed_from_u64(self.seed);

        let ret = self.ransac.estimate(&a, &b, reproj_thresh, &mut rng);

        match &ret {
            Some((_, mask)) => debug!(
                "RANSAC kept {} of {} correspondences",
                mask.iter().filter(|&&m| m).count(),
                mask.len()
            ),
            None => debug!("RANSAC found no consensus in {} correspondences", a.len()),
        }

        Ok(ret.map(|(h, mask)| (Homography::from_matrix(h), mask)))
    }
}
