//! Stitch two camera streams into a panorama and highlight motion

use clap::*;
use frame_loader::resize_to_width;
use log::*;
use panocam::prelude::v1::{Result, *};
use std::path::Path;
use std::str::FromStr;

mod config;
mod draw;

use config::{Backend, Config};

fn parse_opt<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(matches.value_of(name).map(str::parse).transpose()?)
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("pano-stitch")
        .version(crate_version!())
        .about("Stitches a left and a right camera into a panorama and highlights motion")
        .arg(
            Arg::new("left")
                .long("left")
                .short('l')
                .takes_value(true)
                .required(true)
                .help("Left (reference) camera: image directory or still image"),
        )
        .arg(
            Arg::new("right")
                .long("right")
                .short('r')
                .takes_value(true)
                .required(true)
                .help("Right camera: image directory or still image"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .takes_value(true)
                .required(true)
                .help("Directory the annotated panoramas are written to"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .help("JSON configuration file, overridden by the remaining options"),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .short('w')
                .takes_value(true)
                .help("Width camera frames are resized to [default: 400]"),
        )
        .arg(
            Arg::new("frames")
                .long("frames")
                .short('n')
                .takes_value(true)
                .help("Stop after this many frames. Still images repeat this often"),
        )
        .arg(
            Arg::new("warmup")
                .long("warmup")
                .takes_value(true)
                .help("Frames to process before highlighting motion [default: 32]"),
        )
        .arg(
            Arg::new("min-area")
                .long("min-area")
                .takes_value(true)
                .help("Minimum contour area of a motion region [default: 500]"),
        )
        .arg(
            Arg::new("accum-weight")
                .long("accum-weight")
                .takes_value(true)
                .help("Background running average weight [default: 0.5]"),
        )
        .arg(
            Arg::new("delta-thresh")
                .long("delta-thresh")
                .takes_value(true)
                .help("Minimum pixel difference counted as motion [default: 5]"),
        )
        .arg(
            Arg::new("ratio")
                .long("ratio")
                .takes_value(true)
                .help("Lowe's ratio test threshold [default: 0.75]"),
        )
        .arg(
            Arg::new("reproj-thresh")
                .long("reproj-thresh")
                .takes_value(true)
                .help("RANSAC reprojection threshold in pixels [default: 4.0]"),
        )
        .arg(
            Arg::new("crop")
                .long("crop")
                .help("Crop the panorama to the warped extent of the right frame"),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .short('b')
                .takes_value(true)
                .possible_values(["native", "opencv"])
                .help("Vision backend [default: native]"),
        )
        .get_matches();

    let left = matches.value_of("left").unwrap();
    let right = matches.value_of("right").unwrap();
    let output = matches.value_of("output").unwrap();
    let frames = parse_opt::<usize>(&matches, "frames")?;

    let mut cfg = match matches.value_of("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(width) = parse_opt(&matches, "width")? {
        cfg.width = width;
    }
    if let Some(warmup) = parse_opt(&matches, "warmup")? {
        cfg.warmup = warmup;
    }
    if let Some(min_area) = parse_opt(&matches, "min-area")? {
        cfg.motion.min_area = min_area;
    }
    if let Some(accum_weight) = parse_opt(&matches, "accum-weight")? {
        cfg.motion.accum_weight = accum_weight;
    }
    if let Some(delta_thresh) = parse_opt(&matches, "delta-thresh")? {
        cfg.motion.delta_thresh = delta_thresh;
    }
    if let Some(ratio) = parse_opt(&matches, "ratio")? {
        cfg.stitch.ratio = ratio;
    }
    if let Some(reproj_thresh) = parse_opt(&matches, "reproj-thresh")? {
        cfg.stitch.reproj_thresh = reproj_thresh;
    }
    if matches.is_present("crop") {
        cfg.stitch.crop = true;
    }
    if let Some(backend) = matches.value_of("backend") {
        cfg.backend = backend.parse()?;
    }

    cfg.validate()?;

    debug!("{:?}", cfg);

    let mut left = frame_loader::create_source(left, frames)?;
    let mut right = frame_loader::create_source(right, frames)?;

    std::fs::create_dir_all(output)?;

    let written = match cfg.backend {
        Backend::Native => run(
            native_vision::NativeVision::default(),
            &cfg,
            &mut *left,
            &mut *right,
            Path::new(output),
            frames,
        )?,
        #[cfg(feature = "opencv")]
        Backend::Opencv => run(
            cv_vision::CvVision::default(),
            &cfg,
            &mut *left,
            &mut *right,
            Path::new(output),
            frames,
        )?,
        #[cfg(not(feature = "opencv"))]
        Backend::Opencv => {
            return Err(anyhow!(
                "pano-stitch was built without the opencv feature"
            ))
        }
    };

    info!("{} panoramas written to {}", written, output);
    info!("DONE");

    Ok(())
}

/// Drive the stitcher and the motion detector until either source runs out.
///
/// Returns the number of frames written.
fn run<V: Vision>(
    vision: V,
    cfg: &Config,
    left: &mut dyn FrameSource,
    right: &mut dyn FrameSource,
    output: &Path,
    frames: Option<usize>,
) -> Result<usize> {
    let mut stitcher = Stitcher::with_params(&vision, cfg.stitch);
    let mut motion = MotionDetector::with_params(&vision, cfg.motion);

    let mut total = 0usize;

    while frames.map(|n| total < n).unwrap_or(true) {
        let (frame_l, frame_r) = match (left.next_frame()?, right.next_frame()?) {
            (Some(l), Some(r)) => (l, r),
            _ => break,
        };

        let frame_l = resize_to_width(&frame_l, cfg.width)?;
        let frame_r = resize_to_width(&frame_r, cfg.width)?;

        // The right camera gets warped into the plane of the left one.
        let mut panorama = match stitcher.stitch(&frame_r, &frame_l) {
            Ok(panorama) => panorama,
            Err(e) => {
                if e.downcast_ref::<NoHomography>().is_some() {
                    error!("failed to compute homography matrix at frame {}", total);
                }
                return Err(e);
            }
        };

        let gray = draw::gaussian_blur(&panorama.to_gray(), cfg.blur_sigma)?;
        let regions = motion.update(&gray)?;

        // Let the background model settle before trusting it.
        if total > cfg.warmup {
            if let Some(bounds) = aggregate_bounds(&regions) {
                trace!("{} motion regions within {:?}", regions.len(), bounds);
                draw::draw_rect(&mut panorama, bounds, &cfg.box_color, cfg.box_thickness);
            }
        }

        panorama
            .to_image()?
            .save(output.join(format!("{total:06}.png")))?;

        total += 1;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_loader::StillImage;
    use native_vision::NativeVision;

    /// Colour scene of randomly shaded 6 pixel blocks.
    fn block_scene(width: usize, height: usize, seed: u32) -> Frame {
        let bw = (width + 5) / 6;
        let mut state = seed;
        let shades = (0..bw * ((height + 5) / 6))
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect::<Vec<_>>();

        let mut frame = Frame::new(width, height, 3);
        for y in 0..height {
            for x in 0..width {
                let shade = shades[(y / 6) * bw + x / 6];
                frame.pixel_mut(x, y).fill(shade);
            }
        }
        frame
    }

    /// Right camera with a bright square sliding across it.
    struct Sliding {
        background: Frame,
        step: usize,
    }

    impl FrameSource for Sliding {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let mut frame = self.background.clone();
            let x0 = 100 + 20 * self.step;
            for y in 60..100 {
                for x in x0..(x0 + 40) {
                    frame.pixel_mut(x, y).fill(255);
                }
            }
            self.step += 1;
            Ok(Some(frame))
        }
    }

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("pano-stitch-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn motion_gets_boxed_after_warmup() {
        let scene = block_scene(750, 160, 11);
        let mut left = StillImage::new(scene.crop(0, 0, 400, 160).unwrap(), usize::MAX);
        let mut right = Sliding {
            background: scene.crop(350, 0, 400, 160).unwrap(),
            step: 0,
        };

        let cfg = Config {
            warmup: 2,
            ..Default::default()
        };
        let vision = NativeVision::default().max_keypoints(10_000);
        let dir = scratch_dir("motion");

        let written = run(vision, &cfg, &mut left, &mut right, &dir, Some(6)).unwrap();
        assert_eq!(written, 6);

        let is_red = |p: &image::Rgb<u8>| p.0 == [255, 0, 0];

        let first = image::open(dir.join("000000.png")).unwrap().to_rgb8();
        assert_eq!(first.dimensions(), (800, 160));
        assert!(!first.pixels().any(is_red));

        let last = image::open(dir.join("000005.png")).unwrap().to_rgb8();
        assert!(last.pixels().any(is_red));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unrelated_views_abort() {
        let mut left = StillImage::new(Frame::filled(400, 160, 1, 60u8), 3);
        let mut right = StillImage::new(Frame::filled(400, 160, 1, 60u8), 3);
        let dir = scratch_dir("abort");

        let err = run(
            NativeVision::default(),
            &Config::default(),
            &mut left,
            &mut right,
            &dir,
            None,
        )
        .unwrap_err();

        assert!(err.downcast_ref::<NoHomography>().is_some());
        assert!(!dir.join("000000.png").exists());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn stops_when_a_source_ends() {
        let scene = block_scene(750, 160, 5);
        let mut left = StillImage::new(scene.crop(0, 0, 400, 160).unwrap(), 2);
        let mut right = StillImage::new(scene.crop(350, 0, 400, 160).unwrap(), 5);
        let dir = scratch_dir("ends");

        let cfg = Config::default();
        let vision = NativeVision::default().max_keypoints(10_000);

        assert_eq!(run(vision, &cfg, &mut left, &mut right, &dir, None).unwrap(), 2);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
