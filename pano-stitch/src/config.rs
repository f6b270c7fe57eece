//! Run configuration, loaded from JSON and overridden from the command line.

use panocam::prelude::v1::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Vision backend to drive the pipeline with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Native,
    Opencv,
}

impl Default for Backend {
    fn default() -> Self {
        Self::Native
    }
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(Self::Native),
            "opencv" => Ok(Self::Opencv),
            _ => Err(anyhow!("unknown backend {}, expected native or opencv", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Width every camera frame is resized to before stitching.
    pub width: usize,
    /// Number of frames processed before motion gets highlighted.
    pub warmup: usize,
    /// Standard deviation of the blur applied before motion detection.
    pub blur_sigma: f32,
    /// RGB colour of the motion box.
    pub box_color: [u8; 3],
    pub box_thickness: usize,
    pub backend: Backend,
    pub stitch: StitchParams,
    pub motion: MotionParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: 400,
            warmup: 32,
            // Roughly equivalent to a 21x21 Gaussian kernel.
            blur_sigma: 3.5,
            box_color: [255, 0, 0],
            box_thickness: 3,
            backend: Backend::Native,
            stitch: StitchParams::default(),
            motion: MotionParams::default().min_area(500.0),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Check that the values can drive the pipeline.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.width > 0, "width must be positive");
        ensure!(self.blur_sigma >= 0.0, "blur sigma can not be negative");
        ensure!(
            self.motion.accum_weight > 0.0 && self.motion.accum_weight <= 1.0,
            "accumulation weight must be in (0; 1], got {}",
            self.motion.accum_weight
        );
        ensure!(
            self.stitch.ratio > 0.0 && self.stitch.ratio <= 1.0,
            "ratio must be in (0; 1], got {}",
            self.stitch.ratio
        );
        ensure!(
            self.stitch.reproj_thresh > 0.0,
            "reprojection threshold must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_demo() {
        let cfg = Config::default();

        assert_eq!(cfg.width, 400);
        assert_eq!(cfg.warmup, 32);
        assert_eq!(cfg.motion.min_area, 500.0);
        assert_eq!(cfg.motion.accum_weight, 0.5);
        assert_eq!(cfg.stitch.ratio, 0.75);
        assert_eq!(cfg.stitch.reproj_thresh, 4.0);
        assert!(!cfg.stitch.crop);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json() {
        let cfg: Config = serde_json::from_str(
            r#"{ "width": 320, "backend": "opencv", "motion": { "min_area": 800 }, "stitch": { "crop": true } }"#,
        )
        .unwrap();

        assert_eq!(cfg.width, 320);
        assert_eq!(cfg.backend, Backend::Opencv);
        assert_eq!(cfg.motion.min_area, 800.0);
        assert_eq!(cfg.motion.delta_thresh, 5);
        assert!(cfg.stitch.crop);
        assert_eq!(cfg.stitch.ratio, 0.75);
        assert_eq!(cfg.warmup, 32);
    }

    #[test]
    fn json_round_trip() {
        let cfg = Config {
            warmup: 4,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(serde_json::from_str::<Config>(&json).unwrap(), cfg);
    }

    #[test]
    fn invalid_values() {
        let mut cfg = Config::default();
        cfg.stitch.ratio = 1.5;
        assert!(cfg.validate().is_err());

        let cfg = Config {
            width: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        assert!("cuda".parse::<Backend>().is_err());
        assert_eq!("native".parse::<Backend>().unwrap(), Backend::Native);
    }
}
