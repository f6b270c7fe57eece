//! # OpenCV vision backend
//!
//! SIFT features, brute-force L2 matching, RANSAC homography estimation, perspective warping
//! and external contour extraction, all provided by OpenCV.

use log::*;
use nalgebra as na;
use opencv::calib3d::{find_homography_ext, LMEDS, RANSAC};
use opencv::core::{
    no_array, DMatch, Point, Point2f, Scalar, Size, Vector, BORDER_CONSTANT, CV_8U, CV_8UC1,
    CV_8UC3, CV_8UC4, NORM_L2,
};
use opencv::features2d::{BFMatcher, SIFT};
use opencv::imgproc::{
    find_contours, warp_perspective, CHAIN_APPROX_SIMPLE, INTER_LINEAR, RETR_EXTERNAL,
};
use opencv::prelude::*;
use opencv::types::{VectorOfKeyPoint, VectorOfVectorOfPoint};
use panocam::prelude::v1::{Result, *};

/// OpenCV based vision backend.
pub struct CvVision {
    max_features: usize,
    desired_confidence: f64,
    max_iters: usize,
    use_ransac: bool,
}

impl Default for CvVision {
    fn default() -> Self {
        Self {
            max_features: 0,
            desired_confidence: 0.995,
            max_iters: 2000,
            use_ransac: true,
        }
    }
}

impl CvVision {
    /// Limit the number of SIFT features, 0 keeps all of them.
    pub fn max_features(self, max_features: usize) -> Self {
        Self {
            max_features,
            ..self
        }
    }

    pub fn desired_confidence(self, desired_confidence: f64) -> Self {
        Self {
            desired_confidence,
            ..self
        }
    }

    pub fn max_iters(self, max_iters: usize) -> Self {
        Self { max_iters, ..self }
    }

    /// Use RANSAC for homography estimation. Least median of squares is used otherwise.
    pub fn use_ransac(self, use_ransac: bool) -> Self {
        Self { use_ransac, ..self }
    }
}

/// Copy a frame into a new 8-bit matrix.
pub fn frame_to_mat(frame: &Frame) -> Result<Mat> {
    let typ = match frame.channels() {
        1 => CV_8UC1,
        3 => CV_8UC3,
        4 => CV_8UC4,
        c => return Err(anyhow!("{} channel frames are not supported", c)),
    };

    let mut mat = Mat::new_rows_cols_with_default(
        frame.height() as _,
        frame.width() as _,
        typ,
        Scalar::all(0.0),
    )?;

    mat.data_bytes_mut()?.copy_from_slice(frame.as_slice());

    Ok(mat)
}

/// Copy an 8-bit matrix into a new frame.
pub fn mat_to_frame(mat: &Mat) -> Result<Frame> {
    ensure!(mat.depth() == CV_8U, "only 8-bit matrices can become frames");

    let data = if mat.is_continuous() {
        mat.data_bytes()?.to_vec()
    } else {
        mat.try_clone()?.data_bytes()?.to_vec()
    };

    Frame::from_vec(mat.cols() as _, mat.rows() as _, mat.channels() as _, data)
}

fn matrix_to_mat(m: &na::Matrix3<f64>) -> Result<Mat> {
    // Columns of the transpose are rows of the original.
    let t = m.transpose();

    Ok(Mat::from_slice_2d(&[
        t.column(0).as_slice(),
        t.column(1).as_slice(),
        t.column(2).as_slice(),
    ])?)
}

fn mat_to_matrix(mat: &Mat) -> Result<na::Matrix3<f64>> {
    ensure!(
        mat.rows() == 3 && mat.cols() == 3,
        "expected a 3x3 matrix, got {}x{}",
        mat.rows(),
        mat.cols()
    );

    // OpenCV stores rows contiguously, nalgebra fills columns first.
    Ok(na::Matrix3::from_iterator(mat.iter::<f64>()?.map(|(_, v)| v)).transpose())
}

impl Vision for CvVision {
    type Descriptors = Mat;

    fn detect_and_describe(&self, frame: &Frame) -> Result<Features<Mat>> {
        let gray = frame_to_mat(&frame.to_gray())?;

        let mut sift = <dyn SIFT>::create(self.max_features as _, 3, 0.04, 10.0, 1.6)?;

        let mut keypoints = VectorOfKeyPoint::new();
        let mut descriptors = Mat::default();

        sift.detect_and_compute(&gray, &no_array(), &mut keypoints, &mut descriptors, false)?;

        trace!("SIFT found {} keypoints", keypoints.len());

        Ok(Features {
            keypoints: keypoints
                .iter()
                .map(|kp| {
                    let pt = kp.pt();
                    Keypoint::new(pt.x, pt.y)
                })
                .collect(),
            descriptors,
        })
    }

    fn knn_match(&self, query: &Mat, train: &Mat, k: usize) -> Result<Vec<Vec<KnnMatch>>> {
        // The matcher refuses empty sets.
        if query.empty() || train.empty() || k == 0 {
            return Ok(vec![vec![]; query.rows().max(0) as usize]);
        }

        let matcher = BFMatcher::new(NORM_L2, false)?;
        let mut matches = Vector::<Vector<DMatch>>::new();

        matcher.knn_train_match(query, train, &mut matches, k as _, &no_array(), false)?;

        Ok(matches
            .iter()
            .map(|m| {
                m.iter()
                    .map(|m| KnnMatch {
                        query: m.query_idx as _,
                        train: m.train_idx as _,
                        distance: m.distance,
                    })
                    .collect()
            })
            .collect())
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

        if points_a.len() < 4 {
            return Ok(None);
        }

        let p1 = points_a
            .iter()
            .map(|p| Point2f::new(p.x, p.y))
            .collect::<Vec<_>>();
        let p2 = points_b
            .iter()
            .map(|p| Point2f::new(p.x, p.y))
            .collect::<Vec<_>>();

        let p1 = Mat::from_slice(&*p1)?;
        let p2 = Mat::from_slice(&*p2)?;

        let mut inliers = Mat::default();

        let method = if self.use_ransac { RANSAC } else { LMEDS };

        let homography = find_homography_ext(
            &p1,
            &p2,
            method,
            reproj_thresh,
            &mut inliers,
            self.max_iters as _,
            self.desired_confidence,
        )?;

        if homography.empty() {
            debug!("OpenCV found no homography");
            return Ok(None);
        }

        let mask = inliers.data_bytes()?.iter().map(|&v| v != 0).collect();

        Ok(Some((
            Homography::from_matrix(mat_to_matrix(&homography)?),
            mask,
        )))
    }

    fn warp_perspective(
        &self,
        frame: &Frame,
        homography: &Homography,
        width: usize,
        height: usize,
    ) -> Result<Frame> {
        let src = frame_to_mat(frame)?;
        let h = matrix_to_mat(homography.as_matrix())?;
        let mut dst = Mat::default();

        warp_perspective(
            &src,
            &mut dst,
            &h,
            Size::new(width as _, height as _),
            INTER_LINEAR,
            BORDER_CONSTANT,
            Scalar::default(),
        )?;

        mat_to_frame(&dst)
    }

    fn find_external_contours(&self, mask: &Frame) -> Result<Vec<Contour>> {
        ensure!(
            mask.channels() == 1,
            "contours need a single channel mask, got {} channels",
            mask.channels()
        );

        let mut mat = frame_to_mat(mask)?;
        let mut contours = VectorOfVectorOfPoint::new();

        find_contours(
            &mut mat,
            &mut contours,
            RETR_EXTERNAL,
            CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        Ok(contours
            .iter()
            .map(|c| Contour::new(c.iter().map(|p| na::Point2::new(p.x, p.y)).collect()))
            .collect())
    }
}
