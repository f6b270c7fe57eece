//! # Frame buffers and frame sources

use anyhow::{anyhow, ensure, Result};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// Scalar type stored in a frame channel.
pub trait Pixel: Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// Widen the value for arithmetic.
    fn to_f64(self) -> f64;

    /// Narrow an arithmetic result back into the pixel type.
    ///
    /// Integer pixels are rounded to the nearest value and saturated to their range.
    fn from_f64(val: f64) -> Self;
}

impl Pixel for u8 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(val: f64) -> Self {
        val.round().clamp(0.0, 255.0) as u8
    }
}

impl Pixel for f64 {
    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(val: f64) -> Self {
        val
    }
}

/// Row-major, channel-interleaved pixel buffer.
///
/// Camera frames and binary masks use `u8` pixels, while accumulation buffers use `f64`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame<T: Pixel = u8> {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<T>,
}

impl<T: Pixel> Frame<T> {
    /// Create a new zeroed frame.
    ///
    /// # Arguments
    ///
    /// * `width` - width of the frame.
    /// * `height` - height of the frame.
    /// * `channels` - number of interleaved channels.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self::filled(width, height, channels, T::default())
    }

    /// Create a new frame with every channel set to `val`.
    pub fn filled(width: usize, height: usize, channels: usize, val: T) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![val; width * height * channels],
        }
    }

    /// Wrap an existing buffer.
    ///
    /// The buffer must contain exactly `width * height * channels` elements.
    pub fn from_vec(width: usize, height: usize, channels: usize, data: Vec<T>) -> Result<Self> {
        ensure!(channels > 0, "frame must have at least one channel");
        ensure!(
            data.len() == width * height * channels,
            "buffer of {} elements does not fit a {}x{}x{} frame",
            data.len(),
            width,
            height,
            channels
        );

        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Get width and height of the frame.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Check whether the frame has no pixels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check whether both frames have the same width, height and channel count.
    pub fn same_shape<U: Pixel>(&self, other: &Frame<U>) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        (y * self.width + x) * self.channels
    }

    /// Get a single channel value.
    pub fn get(&self, x: usize, y: usize, c: usize) -> T {
        self.data[self.offset(x, y) + c]
    }

    /// Set a single channel value.
    pub fn set(&mut self, x: usize, y: usize, c: usize, val: T) {
        let off = self.offset(x, y) + c;
        self.data[off] = val;
    }

    /// Get all channels of a pixel.
    pub fn pixel(&self, x: usize, y: usize) -> &[T] {
        let off = self.offset(x, y);
        &self.data[off..off + self.channels]
    }

    /// Get all channels of a pixel, mutably.
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [T] {
        let off = self.offset(x, y);
        let channels = self.channels;
        &mut self.data[off..off + channels]
    }

    /// Iterate every row of the frame.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.data.chunks_exact((self.width * self.channels).max(1))
    }

    /// Apply `f` to every channel value, producing a new frame.
    pub fn map<U: Pixel>(&self, f: impl Fn(T) -> U) -> Frame<U> {
        Frame {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    /// Convert the frame to a different pixel type.
    pub fn convert<U: Pixel>(&self) -> Frame<U> {
        self.map(|v| U::from_f64(v.to_f64()))
    }

    /// Convert the frame to a single channel.
    ///
    /// Colour frames use ITU-R BT.601 luma weights with channels in RGB order. An alpha channel
    /// is ignored.
    pub fn to_gray(&self) -> Frame<T> {
        match self.channels {
            0 | 1 => self.clone(),
            2 => Frame {
                width: self.width,
                height: self.height,
                channels: 1,
                data: self.data.chunks_exact(2).map(|p| p[0]).collect(),
            },
            _ => Frame {
                width: self.width,
                height: self.height,
                channels: 1,
                data: self
                    .data
                    .chunks_exact(self.channels)
                    .map(|p| {
                        T::from_f64(
                            0.299 * p[0].to_f64() + 0.587 * p[1].to_f64() + 0.114 * p[2].to_f64(),
                        )
                    })
                    .collect(),
            },
        }
    }

    /// Copy `src` into this frame with its top-left corner at `(x, y)`.
    ///
    /// The source must have the same channel count and fit entirely within the frame.
    pub fn paste(&mut self, src: &Frame<T>, x: usize, y: usize) -> Result<()> {
        ensure!(
            src.channels == self.channels,
            "cannot paste {} channels into {} channels",
            src.channels,
            self.channels
        );
        ensure!(
            x + src.width <= self.width && y + src.height <= self.height,
            "{}x{} frame at ({}, {}) does not fit into {}x{}",
            src.width,
            src.height,
            x,
            y,
            self.width,
            self.height
        );

        let row_len = src.width * src.channels;

        for (sy, row) in src.rows().enumerate() {
            let off = self.offset(x, y + sy);
            self.data[off..off + row_len].copy_from_slice(row);
        }

        Ok(())
    }

    /// Copy out a rectangular region of the frame.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Result<Frame<T>> {
        ensure!(
            x + width <= self.width && y + height <= self.height,
            "crop {}x{} at ({}, {}) is out of {}x{} bounds",
            width,
            height,
            x,
            y,
            self.width,
            self.height
        );

        let mut data = Vec::with_capacity(width * height * self.channels);

        for row in y..(y + height) {
            let off = self.offset(x, row);
            data.extend_from_slice(&self.data[off..off + width * self.channels]);
        }

        Ok(Frame {
            width,
            height,
            channels: self.channels,
            data,
        })
    }
}

impl Frame<u8> {
    /// Convert into an `image` crate buffer.
    pub fn to_image(&self) -> Result<DynamicImage> {
        let (w, h) = (self.width as u32, self.height as u32);
        let data = self.data.clone();

        let image = match self.channels {
            1 => GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
            4 => RgbaImage::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
            c => return Err(anyhow!("{} channel frames have no image equivalent", c)),
        };

        image.ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))
    }
}

impl From<GrayImage> for Frame {
    fn from(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            channels: 1,
            data: image.into_raw(),
        }
    }
}

impl From<RgbImage> for Frame {
    fn from(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            channels: 3,
            data: image.into_raw(),
        }
    }
}

impl From<&DynamicImage> for Frame {
    /// Grayscale images stay single channel, everything else is converted to RGB.
    fn from(image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => gray.clone().into(),
            DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_) => image.to_luma8().into(),
            _ => image.to_rgb8().into(),
        }
    }
}

/// Pull-based frame provider.
///
/// A source represents a single camera. The caller is responsible for resizing the frames it
/// returns before handing them to any processing component.
pub trait FrameSource {
    /// Get the next frame of the stream.
    ///
    /// Returns `Ok(None)` once the stream has ended, and `Err` if the frame could not be read.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Get the framerate of the stream.
    ///
    /// This will return `Some(framerate)` if it is known. Live sources and image sequences
    /// usually do not know it, in which case `None` is returned.
    fn get_framerate(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_checks_length() {
        assert!(Frame::<u8>::from_vec(4, 4, 1, vec![0; 16]).is_ok());
        assert!(Frame::<u8>::from_vec(4, 4, 3, vec![0; 16]).is_err());
        assert!(Frame::<u8>::from_vec(4, 4, 0, vec![]).is_err());
    }

    #[test]
    fn gray_conversion_weights() {
        let frame = Frame::from_vec(2, 1, 3, vec![255u8, 0, 0, 0, 255, 0]).unwrap();
        let gray = frame.to_gray();

        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.as_slice(), &[76, 150]);
    }

    #[test]
    fn channelless_frames_stay_empty() {
        let frame = Frame::<u8>::new(4, 3, 0);

        assert!(frame.is_empty());
        assert_eq!(frame.to_gray(), frame);
        assert_eq!(frame.rows().count(), 0);
    }

    #[test]
    fn paste_and_crop() {
        let mut canvas = Frame::<u8>::new(6, 4, 1);
        let patch = Frame::filled(2, 2, 1, 9u8);

        canvas.paste(&patch, 3, 1).unwrap();

        assert_eq!(canvas.get(3, 1, 0), 9);
        assert_eq!(canvas.get(4, 2, 0), 9);
        assert_eq!(canvas.get(2, 1, 0), 0);
        assert_eq!(canvas.crop(3, 1, 2, 2).unwrap(), patch);

        assert!(canvas.paste(&patch, 5, 0).is_err());
        assert!(canvas.paste(&Frame::new(1, 1, 3), 0, 0).is_err());
    }

    #[test]
    fn image_conversion_keeps_layout() {
        let mut gray = GrayImage::new(3, 2);
        gray.put_pixel(2, 1, image::Luma([42]));

        let frame = Frame::from(gray);
        assert_eq!(frame.dim(), (3, 2));
        assert_eq!(frame.get(2, 1, 0), 42);

        let back = frame.to_image().unwrap().to_luma8();
        assert_eq!(back.get_pixel(2, 1).0, [42]);
    }
}
