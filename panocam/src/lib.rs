//! # Two-camera Panorama Library
//!
//! This library stitches frames of a fixed two-camera rig into a single panorama and highlights
//! regions of motion within it. Both components are synchronous, single-owner state machines
//! that are driven frame-by-frame by an external loop.
//!
//! The primitive vision services (feature detection, matching, homography estimation) are
//! consumed through the [`Vision`](vision::Vision) trait, so the stitching and detection logic
//! is independent of the library backing them.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use panocam::prelude::v1::*;
//! ```
//!
//! You may need [`nalgebra`](https://crates.io/crates/nalgebra) to make use of the functionality.

pub mod frame;
pub mod geometry;
pub mod imgproc;
pub mod motion;
pub mod stitcher;
pub mod vision;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            frame::{Frame, FrameSource, Pixel},
            geometry::*,
            motion::{aggregate_bounds, MotionDetector, MotionParams},
            stitcher::{MatchResult, NoHomography, StitchParams, Stitcher, MIN_MATCHES},
            vision::Vision,
        };
        pub use anyhow::{anyhow, ensure, Error, Result};
    }
}
