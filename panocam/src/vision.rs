//! # Vision capability interface

use crate::frame::Frame;
use crate::geometry::{Contour, Features, Homography, KnnMatch, Keypoint};
use crate::imgproc;
use anyhow::Result;

/// Primitive vision services consumed by the stitcher and the motion detector.
///
/// Each implementation wraps one underlying vision library (or library version). The stitching
/// and motion logic only talks to this trait, so it never needs to know which one is in use.
///
/// Warping and contour extraction have pure Rust defaults from [`imgproc`], implementations only
/// need to override them if their library does the job better.
pub trait Vision {
    /// Descriptor set of a single image. Only ever compared through [`Vision::knn_match`].
    type Descriptors;

    /// Detect keypoints and compute a descriptor for each of them.
    ///
    /// Must be deterministic for a given configuration.
    fn detect_and_describe(&self, frame: &Frame) -> Result<Features<Self::Descriptors>>;

    /// Find the `k` nearest train descriptors of every query descriptor.
    ///
    /// The outer vector is indexed by query descriptor. Each inner vector is sorted by ascending
    /// distance and contains at most `k` entries.
    fn knn_match(
        &self,
        query: &Self::Descriptors,
        train: &Self::Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<KnnMatch>>>;

    /// Robustly estimate a homography mapping `points_a` onto `points_b`.
    ///
    /// # Arguments
    ///
    /// * `points_a` - source points.
    /// * `points_b` - destination points, same length as `points_a`.
    /// * `reproj_thresh` - maximum reprojection error (in pixels) for a pair to count as an inlier.
    ///
    /// Returns `Ok(None)` if no consistent transform could be found. Otherwise, the homography
    /// is returned together with the per-correspondence inlier mask.
    fn find_homography(
        &self,
        points_a: &[Keypoint],
        points_b: &[Keypoint],
        reproj_thresh: f64,
    ) -> Result<Option<(Homography, Vec<bool>)>>;

    /// Warp `frame` by `homography` onto a `width` by `height` canvas.
    fn warp_perspective(
        &self,
        frame: &Frame,
        homography: &Homography,
        width: usize,
        height: usize,
    ) -> Result<Frame> {
        Ok(imgproc::warp_perspective(frame, homography, width, height))
    }

    /// Extract the outermost contours of the non-zero regions of a single channel mask.
    fn find_external_contours(&self, mask: &Frame) -> Result<Vec<Contour>> {
        imgproc::find_external_contours(mask)
    }
}

impl<V: Vision + ?Sized> Vision for &V {
    type Descriptors = V::Descriptors;

    fn detect_and_describe(&self, frame: &Frame) -> Result<Features<Self::Descriptors>> {
        (**self).detect_and_describe(frame)
    }

    fn knn_match(
        &self,
        query: &Self::Descriptors,
        train: &Self::Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<KnnMatch>>> {
        (**self).knn_match(query, train, k)
    }

    fn find_homography(
        &self,
        points_a: &[Keypoint],
        points_b: &[Keypoint],
        reproj_thresh: f64,
    ) -> Result<Option<(Homography, Vec<bool>)>> {
        (**self).find_homography(points_a, points_b, reproj_thresh)
    }

    fn warp_perspective(
        &self,
        frame: &Frame,
        homography: &Homography,
        width: usize,
        height: usize,
    ) -> Result<Frame> {
        (**self).warp_perspective(frame, homography, width, height)
    }

    fn find_external_contours(&self, mask: &Frame) -> Result<Vec<Contour>> {
        (**self).find_external_contours(mask)
    }
}
