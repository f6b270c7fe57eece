//! # Incremental panorama stitcher
//!
//! The stitcher estimates the geometry between the two cameras once, on the first pair of frames
//! that produces a homography, and reuses it for the rest of its lifetime. The rig is assumed to
//! be static, so re-estimating per frame would only add cost and jitter.

use crate::frame::Frame;
use crate::geometry::{Features, Homography, KnnMatch, Match};
use crate::vision::Vision;
use anyhow::{ensure, Result};
use log::*;
use nalgebra as na;
use std::fmt;

/// Minimum number of ratio-test survivors needed to attempt homography estimation.
///
/// Four correspondences determine a homography exactly, which leaves nothing for the robust
/// estimator to reject outliers with, so strictly more than four are required.
pub const MIN_MATCHES: usize = 5;

/// Tunables of the stitcher.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StitchParams {
    /// Lowe's ratio, in `(0; 1]`. Lower values accept fewer, less ambiguous matches.
    pub ratio: f32,
    /// Maximum reprojection error (in pixels) of a RANSAC inlier.
    pub reproj_thresh: f64,
    /// Crop the canvas to the warped extent of image A instead of the sum of widths.
    pub crop: bool,
}

impl Default for StitchParams {
    fn default() -> Self {
        Self {
            ratio: 0.75,
            reproj_thresh: 4.0,
            crop: false,
        }
    }
}

impl StitchParams {
    pub fn ratio(self, ratio: f32) -> Self {
        Self { ratio, ..self }
    }

    pub fn reproj_thresh(self, reproj_thresh: f64) -> Self {
        Self {
            reproj_thresh,
            ..self
        }
    }

    pub fn crop(self, crop: bool) -> Self {
        Self { crop, ..self }
    }
}

/// Reason why no homography could be produced for a frame pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoHomography {
    /// Not enough matches survived the ratio test.
    InsufficientMatches { found: usize },
    /// The robust estimator did not converge on a consistent transform.
    EstimationFailed,
}

impl fmt::Display for NoHomography {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InsufficientMatches { found } => write!(
                f,
                "failed to compute homography matrix: {} matches, need at least {}",
                found, MIN_MATCHES
            ),
            Self::EstimationFailed => {
                write!(f, "failed to compute homography matrix: estimation failed")
            }
        }
    }
}

impl std::error::Error for NoHomography {}

/// Outcome of a successful keypoint matching and homography estimation.
#[derive(Clone, Debug)]
pub struct MatchResult {
    /// Correspondences that passed the ratio test.
    pub matches: Vec<Match>,
    /// Transform from image A to image B.
    pub homography: Homography,
    /// Inlier flag of every entry in `matches`.
    pub status: Vec<bool>,
}

impl MatchResult {
    pub fn inliers(&self) -> usize {
        self.status.iter().filter(|&&s| s).count()
    }
}

/// Apply Lowe's ratio test to raw k-NN results.
///
/// A query is kept only if it has two neighbours and the nearest one is closer than `ratio`
/// times the distance to the second nearest.
pub fn ratio_test(raw_matches: &[Vec<KnnMatch>], ratio: f32) -> Vec<Match> {
    raw_matches
        .iter()
        .filter_map(|m| match m.as_slice() {
            [best, second, ..] if best.distance < second.distance * ratio => Some(Match {
                a: best.query,
                b: best.train,
            }),
            _ => None,
        })
        .collect()
}

/// Two-camera panorama stitcher with a lazily cached homography.
pub struct Stitcher<V> {
    vision: V,
    params: StitchParams,
    cached: Option<Homography>,
}

impl<V: Vision> Stitcher<V> {
    /// Create a new stitcher with default parameters.
    pub fn new(vision: V) -> Self {
        Self::with_params(vision, Default::default())
    }

    pub fn with_params(vision: V, params: StitchParams) -> Self {
        Self {
            vision,
            params,
            cached: None,
        }
    }

    pub fn params(&self) -> &StitchParams {
        &self.params
    }

    pub fn vision(&self) -> &V {
        &self.vision
    }

    /// Get the cached homography, if it has been estimated already.
    pub fn homography(&self) -> Option<&Homography> {
        self.cached.as_ref()
    }

    /// Stitch a frame pair using the configured ratio and reprojection threshold.
    ///
    /// See [`Stitcher::stitch_with`].
    pub fn stitch(&mut self, image_a: &Frame, image_b: &Frame) -> Result<Frame> {
        let StitchParams {
            ratio,
            reproj_thresh,
            ..
        } = self.params;
        self.stitch_with(image_a, image_b, ratio, reproj_thresh)
    }

    /// Stitch a frame pair into a panorama.
    ///
    /// The first call that succeeds estimates and caches the homography, every later call
    /// reuses it and never looks at features again.
    ///
    /// # Arguments
    ///
    /// * `image_a` - the new (right) frame, warped into the plane of `image_b`.
    /// * `image_b` - the reference (left) frame, pasted unmodified at the origin.
    /// * `ratio` - Lowe's ratio test threshold.
    /// * `reproj_thresh` - RANSAC inlier tolerance in pixels.
    ///
    /// # Errors
    ///
    /// If no homography is cached and none can be estimated, the error wraps a [`NoHomography`]
    /// which can be recovered with `downcast_ref`. Frames that are empty or whose heights or
    /// channel counts differ are rejected before any work is done.
    pub fn stitch_with(
        &mut self,
        image_a: &Frame,
        image_b: &Frame,
        ratio: f32,
        reproj_thresh: f64,
    ) -> Result<Frame> {
        ensure!(
            !image_a.is_empty() && !image_b.is_empty(),
            "cannot stitch empty frames"
        );
        ensure!(
            image_a.height() == image_b.height(),
            "frame heights differ: {} vs {}",
            image_a.height(),
            image_b.height()
        );
        ensure!(
            image_a.channels() == image_b.channels(),
            "frame channel counts differ: {} vs {}",
            image_a.channels(),
            image_b.channels()
        );
        check_thresholds(ratio, reproj_thresh)?;

        let homography = match self.cached {
            Some(homography) => homography,
            None => {
                let features_a = self.vision.detect_and_describe(image_a)?;
                let features_b = self.vision.detect_and_describe(image_b)?;

                let result =
                    self.match_keypoints(&features_a, &features_b, ratio, reproj_thresh)?;

                info!(
                    "homography estimated from {} matches ({} inliers): {}",
                    result.matches.len(),
                    result.inliers(),
                    result.homography
                );

                *self.cached.insert(result.homography)
            }
        };

        self.compose(image_a, image_b, &homography)
    }

    /// Match descriptors of A against B and estimate the homography between them.
    ///
    /// Only the A to B nearest neighbour direction is used.
    pub fn match_keypoints(
        &self,
        features_a: &Features<V::Descriptors>,
        features_b: &Features<V::Descriptors>,
        ratio: f32,
        reproj_thresh: f64,
    ) -> Result<MatchResult> {
        check_thresholds(ratio, reproj_thresh)?;

        let raw_matches =
            self.vision
                .knn_match(&features_a.descriptors, &features_b.descriptors, 2)?;
        let matches = ratio_test(&raw_matches, ratio);

        debug!(
            "{} keypoints in A, {} in B, {} of {} raw matches passed the ratio test",
            features_a.keypoints.len(),
            features_b.keypoints.len(),
            matches.len(),
            raw_matches.len()
        );

        if matches.len() < MIN_MATCHES {
            warn!("only {} matches, not estimating homography", matches.len());
            return Err(NoHomography::InsufficientMatches {
                found: matches.len(),
            }
            .into());
        }

        let points_a = matches
            .iter()
            .map(|m| features_a.keypoints[m.a])
            .collect::<Vec<_>>();
        let points_b = matches
            .iter()
            .map(|m| features_b.keypoints[m.b])
            .collect::<Vec<_>>();

        match self
            .vision
            .find_homography(&points_a, &points_b, reproj_thresh)?
        {
            Some((homography, status)) => Ok(MatchResult {
                matches,
                homography,
                status,
            }),
            None => {
                warn!("homography estimation did not converge");
                Err(NoHomography::EstimationFailed.into())
            }
        }
    }

    /// Warp A into B's plane and paste B over it.
    fn compose(&self, image_a: &Frame, image_b: &Frame, homography: &Homography) -> Result<Frame> {
        let full_width = image_a.width() + image_b.width();

        let width = if self.params.crop {
            warped_extent(image_a, homography)
                .max(image_b.width())
                .min(full_width)
        } else {
            full_width
        };

        let mut panorama =
            self.vision
                .warp_perspective(image_a, homography, width, image_a.height())?;

        panorama.paste(image_b, 0, 0)?;

        Ok(panorama)
    }
}

fn check_thresholds(ratio: f32, reproj_thresh: f64) -> Result<()> {
    ensure!(
        ratio > 0.0 && ratio <= 1.0,
        "ratio must be in (0; 1], got {}",
        ratio
    );
    ensure!(
        reproj_thresh > 0.0,
        "reprojection threshold must be positive, got {}",
        reproj_thresh
    );
    Ok(())
}

/// Exclusive right edge of image A's corners once warped.
fn warped_extent(image: &Frame, homography: &Homography) -> usize {
    let (w, h) = (image.width() as f64 - 1.0, image.height() as f64 - 1.0);

    [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
        .iter()
        .filter_map(|&(x, y)| homography.transform_point(na::Point2::new(x, y)))
        .map(|p| p.x.round().max(-1.0) as i64 + 1)
        .max()
        .unwrap_or(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Keypoint;
    use std::cell::Cell;

    /// Backend where every non-zero pixel is a keypoint, described by its own intensity.
    #[derive(Default)]
    struct PixelVision {
        detections: Cell<usize>,
        estimations: Cell<usize>,
    }

    impl Vision for PixelVision {
        type Descriptors = Vec<f32>;

        fn detect_and_describe(&self, frame: &Frame) -> Result<Features<Vec<f32>>> {
            self.detections.set(self.detections.get() + 1);

            let gray = frame.to_gray();
            let mut features = Features::<Vec<f32>>::default();

            for y in 0..gray.height() {
                for x in 0..gray.width() {
                    let v = gray.get(x, y, 0);
                    if v != 0 {
                        features.keypoints.push(Keypoint::new(x as f32, y as f32));
                        features.descriptors.push(v as f32);
                    }
                }
            }

            Ok(features)
        }

        fn knn_match(
            &self,
            query: &Vec<f32>,
            train: &Vec<f32>,
            k: usize,
        ) -> Result<Vec<Vec<KnnMatch>>> {
            Ok(query
                .iter()
                .enumerate()
                .map(|(qi, q)| {
                    let mut m = train
                        .iter()
                        .enumerate()
                        .map(|(ti, t)| KnnMatch {
                            query: qi,
                            train: ti,
                            distance: (q - t).abs(),
                        })
                        .collect::<Vec<_>>();
                    m.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                    m.truncate(k);
                    m
                })
                .collect())
        }

        fn find_homography(
            &self,
            points_a: &[Keypoint],
            points_b: &[Keypoint],
            _: f64,
        ) -> Result<Option<(Homography, Vec<bool>)>> {
            self.estimations.set(self.estimations.get() + 1);

            if points_a.len() < 4 {
                return Ok(None);
            }

            let n = points_a.len() as f64;
            let (tx, ty) = points_a
                .iter()
                .zip(points_b)
                .fold((0.0, 0.0), |(tx, ty), (a, b)| {
                    (tx + (b.x - a.x) as f64 / n, ty + (b.y - a.y) as f64 / n)
                });

            Ok(Some((
                Homography::translation(tx, ty),
                vec![true; points_a.len()],
            )))
        }
    }

    /// Frame pair with `count` marked pixels, where A's marks sit 10 pixels left of B's.
    fn marked_pair(count: usize) -> (Frame, Frame) {
        let mut a = Frame::new(20, 10, 1);
        let mut b = Frame::new(20, 10, 1);

        for i in 0..count {
            let v = 10 + 40 * i as u8;
            let (x, y) = (i, 2 + i);
            a.set(x, y, 0, v);
            b.set(x + 10, y, 0, v);
        }

        (a, b)
    }

    #[test]
    fn four_matches_are_not_enough() {
        let (a, b) = marked_pair(4);
        let mut stitcher = Stitcher::new(PixelVision::default());

        let err = stitcher.stitch(&a, &b).unwrap_err();

        assert_eq!(
            err.downcast_ref::<NoHomography>(),
            Some(&NoHomography::InsufficientMatches { found: 4 })
        );
        assert_eq!(stitcher.vision().estimations.get(), 0);
        assert!(stitcher.homography().is_none());
    }

    #[test]
    fn five_matches_succeed() {
        let (a, b) = marked_pair(5);
        let mut stitcher = Stitcher::new(PixelVision::default());

        let panorama = stitcher.stitch(&a, &b).unwrap();

        assert_eq!(panorama.dim(), (40, 10));
        assert_eq!(
            stitcher.homography(),
            Some(&Homography::translation(10.0, 0.0))
        );
        assert_eq!(stitcher.vision().estimations.get(), 1);
    }

    #[test]
    fn failed_estimation_caches_nothing() {
        let (a, b) = marked_pair(5);
        let mut stitcher = Stitcher::new(PixelVision::default());

        // Nothing in A resembles B.
        let blank = Frame::new(20, 10, 1);
        assert!(stitcher.stitch(&blank, &b).is_err());
        assert!(stitcher.homography().is_none());

        assert!(stitcher.stitch(&a, &b).is_ok());
        assert!(stitcher.homography().is_some());
    }

    #[test]
    fn homography_is_estimated_once() {
        let (a, b) = marked_pair(5);
        let mut stitcher = Stitcher::new(PixelVision::default());
        stitcher.stitch(&a, &b).unwrap();

        let detections = stitcher.vision().detections.get();
        let cached = *stitcher.homography().unwrap();

        // Content with entirely different geometry, and no features at all in A.
        let a2 = Frame::filled(20, 10, 1, 7u8);
        let mut b2 = Frame::new(20, 10, 1);
        b2.set(0, 0, 0, 200);

        let panorama = stitcher.stitch(&a2, &b2).unwrap();

        assert_eq!(stitcher.vision().detections.get(), detections);
        assert_eq!(stitcher.vision().estimations.get(), 1);
        assert_eq!(stitcher.homography(), Some(&cached));

        // B pasted verbatim, A shifted by the cached translation.
        assert_eq!(panorama.crop(0, 0, 20, 10).unwrap(), b2);
        assert_eq!(panorama.get(25, 5, 0), 7);
        assert_eq!(panorama.get(29, 9, 0), 7);
        assert_eq!(panorama.get(30, 5, 0), 0);
    }

    #[test]
    fn cropped_canvas() {
        let (a, b) = marked_pair(5);
        let mut stitcher =
            Stitcher::with_params(PixelVision::default(), StitchParams::default().crop(true));

        let panorama = stitcher.stitch(&a, &b).unwrap();

        assert_eq!(panorama.dim(), (30, 10));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let mut stitcher = Stitcher::new(PixelVision::default());

        let err = stitcher
            .stitch(&Frame::new(20, 10, 1), &Frame::new(20, 11, 1))
            .unwrap_err();
        assert!(err.downcast_ref::<NoHomography>().is_none());

        assert!(stitcher
            .stitch(&Frame::new(20, 10, 3), &Frame::new(20, 10, 1))
            .is_err());
        assert!(stitcher
            .stitch(&Frame::new(0, 0, 1), &Frame::new(20, 10, 1))
            .is_err());
        assert!(stitcher
            .stitch_with(&Frame::new(20, 10, 1), &Frame::new(20, 10, 1), 1.5, 4.0)
            .is_err());

        assert_eq!(stitcher.vision().detections.get(), 0);
    }

    #[test]
    fn ratio_test_is_monotonic() {
        // Deterministic spread of nearest/second-nearest distance pairs.
        let raw = (0..200)
            .map(|i| {
                let d0 = ((i * 37) % 101) as f32;
                let d1 = d0 + ((i * 53) % 67) as f32;
                vec![
                    KnnMatch {
                        query: i,
                        train: i % 13,
                        distance: d0,
                    },
                    KnnMatch {
                        query: i,
                        train: (i + 1) % 13,
                        distance: d1,
                    },
                ]
            })
            .collect::<Vec<_>>();

        let counts = (1..=20)
            .map(|r| ratio_test(&raw, r as f32 / 20.0).len())
            .collect::<Vec<_>>();

        assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{:?}", counts);
        assert!(counts[19] > counts[0]);
    }

    #[test]
    fn ratio_test_needs_two_neighbours() {
        let single = vec![vec![KnnMatch {
            query: 0,
            train: 0,
            distance: 0.0,
        }]];
        assert!(ratio_test(&single, 1.0).is_empty());
    }
}
