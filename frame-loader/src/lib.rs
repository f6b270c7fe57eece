//! Common `FrameSource` instance loader.

use image::imageops::FilterType;
use log::*;
use panocam::prelude::v1::*;
use std::path::{Path, PathBuf};

/// File extensions recognised as images.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm"];

/// Create a frame source depending on the input.
///
/// If the input is a directory, every image inside it becomes one frame, in file name order.
/// Otherwise the input is opened as a single image that is returned `repeat` times (once if
/// `None`), simulating a static camera.
pub fn create_source(input: &str, repeat: Option<usize>) -> Result<Box<dyn FrameSource>> {
    let path = Path::new(input);

    if path.is_dir() {
        let sequence = ImageSequence::open(path)?;
        info!("{}: {} frames", input, sequence.len());
        return Ok(Box::new(sequence));
    }

    ensure!(is_image(path), "{} is neither a directory nor an image", input);

    Ok(Box::new(StillImage::open(path, repeat.unwrap_or(1))?))
}

/// Resize a frame to the given width, keeping its aspect ratio.
pub fn resize_to_width(frame: &Frame, width: usize) -> Result<Frame> {
    ensure!(width > 0, "cannot resize to zero width");
    ensure!(!frame.is_empty(), "cannot resize an empty frame");

    if frame.width() == width {
        return Ok(frame.clone());
    }

    let height = ((frame.height() * width) as f64 / frame.width() as f64)
        .round()
        .max(1.0) as u32;

    let resized = frame
        .to_image()?
        .resize_exact(width as u32, height, FilterType::Triangle);

    Ok(Frame::from(&resized))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path).map_err(|e| anyhow!("{}: {}", path.display(), e))?;
    Ok(Frame::from(&image))
}

/// Directory of numbered images.
pub struct ImageSequence {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files = std::fs::read_dir(dir)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .filter(|p| p.is_file() && is_image(p))
            .collect::<Vec<_>>();

        files.sort();

        Ok(Self { files, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let path = match self.files.get(self.next) {
            Some(path) => path,
            None => return Ok(None),
        };

        let frame = load_frame(path)?;
        self.next += 1;

        Ok(Some(frame))
    }
}

/// Single image repeated a fixed number of times.
pub struct StillImage {
    frame: Frame,
    remaining: usize,
}

impl StillImage {
    pub fn open(path: &Path, repeat: usize) -> Result<Self> {
        Ok(Self::new(load_frame(path)?, repeat))
    }

    pub fn new(frame: Frame, repeat: usize) -> Self {
        Self {
            frame,
            remaining: repeat,
        }
    }
}

impl FrameSource for StillImage {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        self.remaining -= 1;

        Ok(Some(self.frame.clone()))
    }
}
