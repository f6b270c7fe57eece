//! # Running average motion detection

use crate::frame::Frame;
use crate::geometry::{Contour, Rect};
use crate::imgproc;
use crate::vision::Vision;
use anyhow::{ensure, Result};
use log::*;

/// Number of 3x3 dilation passes applied to the thresholded delta.
pub const DILATE_ITERATIONS: usize = 2;

/// Tunables of the motion detector.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MotionParams {
    /// Weight of the newest frame in the running average, in `(0; 1]`.
    pub accum_weight: f32,
    /// Minimum intensity difference for a pixel to count as changed.
    pub delta_thresh: u8,
    /// Minimum contour area for a region to be reported.
    pub min_area: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            accum_weight: 0.5,
            delta_thresh: 5,
            min_area: 5000.0,
        }
    }
}

impl MotionParams {
    pub fn accum_weight(self, accum_weight: f32) -> Self {
        Self {
            accum_weight,
            ..self
        }
    }

    pub fn delta_thresh(self, delta_thresh: u8) -> Self {
        Self {
            delta_thresh,
            ..self
        }
    }

    pub fn min_area(self, min_area: f64) -> Self {
        Self { min_area, ..self }
    }
}

/// Background subtraction motion detector.
///
/// The detector keeps an exponentially weighted running average of the frames it has seen and
/// reports regions that differ from it. The average is created from the first frame and never
/// reset.
pub struct MotionDetector<V> {
    vision: V,
    params: MotionParams,
    background: Option<Frame<f64>>,
}

impl<V: Vision> MotionDetector<V> {
    /// Create a new detector with default parameters.
    pub fn new(vision: V) -> Self {
        Self::with_params(vision, Default::default())
    }

    pub fn with_params(vision: V, params: MotionParams) -> Self {
        Self {
            vision,
            params,
            background: None,
        }
    }

    pub fn params(&self) -> &MotionParams {
        &self.params
    }

    /// Get the background model, once the first frame has been seen.
    pub fn background(&self) -> Option<&Frame<f64>> {
        self.background.as_ref()
    }

    pub fn is_tracking(&self) -> bool {
        self.background.is_some()
    }

    /// Process the next frame and return regions with motion.
    ///
    /// The frame should be single channel and preferably blurred, to keep sensor noise from
    /// showing up as motion. The very first frame only initialises the background model, so no
    /// regions are returned for it.
    ///
    /// # Errors
    ///
    /// Fails if the frame is empty, has more than one channel, or its size differs from the
    /// frames seen before. An accumulation weight outside `(0; 1]` is rejected as well.
    pub fn update(&mut self, frame: &Frame) -> Result<Vec<Contour>> {
        ensure!(
            self.params.accum_weight > 0.0 && self.params.accum_weight <= 1.0,
            "accumulation weight must be in (0; 1], got {}",
            self.params.accum_weight
        );
        ensure!(!frame.is_empty(), "cannot detect motion in an empty frame");
        ensure!(
            frame.channels() == 1,
            "motion detection needs a single channel frame, got {} channels",
            frame.channels()
        );

        let background = match self.background.as_mut() {
            Some(background) => background,
            None => {
                debug!("initialising background model from {:?} frame", frame.dim());
                self.background = Some(frame.convert());
                return Ok(vec![]);
            }
        };

        ensure!(
            background.same_shape(frame),
            "frame of {:?} does not match the {:?} background model",
            frame.dim(),
            background.dim()
        );

        imgproc::accumulate_weighted(background, frame, self.params.accum_weight)?;

        let delta = imgproc::abs_diff(frame, &imgproc::convert_scale_abs(background))?;
        let mask = imgproc::threshold_binary(&delta, self.params.delta_thresh, 255);
        let mask = imgproc::dilate(&mask, DILATE_ITERATIONS);

        let contours = self.vision.find_external_contours(&mask)?;
        let total = contours.len();

        let regions = contours
            .into_iter()
            .filter(|c| c.area() > self.params.min_area)
            .collect::<Vec<_>>();

        debug!("{} of {} regions pass the area filter", regions.len(), total);

        Ok(regions)
    }
}

/// Compute a single bounding box around all regions.
///
/// Returns `None` if there are no regions.
pub fn aggregate_bounds<'a>(regions: impl IntoIterator<Item = &'a Contour>) -> Option<Rect> {
    regions
        .into_iter()
        .map(Contour::bounding_rect)
        .reduce(|acc, r| acc.union(&r))
}
