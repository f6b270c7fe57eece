//! BRIEF binary descriptors.

use panocam::prelude::v1::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Radius of the square patch sampled around a keypoint.
pub const PATCH_RADIUS: i32 = 12;

/// Radius of the box filter applied before sampling.
pub const SMOOTH_RADIUS: usize = 2;

/// Number of pixel pairs, one bit each.
pub const DESCRIPTOR_BITS: usize = 256;

const PATTERN_SEED: u64 = 0x5eed_0b41_ef00_0256;

/// 256-bit binary descriptor.
pub type Descriptor = [u64; DESCRIPTOR_BITS / 64];

/// Fixed set of pixel pair offsets compared by every descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    pairs: Vec<[(i32, i32); 2]>,
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new(PATTERN_SEED)
    }
}

impl Pattern {
    /// Generate a pattern of uniformly distributed offsets within the patch.
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut offset = || {
            (
                rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
            )
        };

        let pairs = (0..DESCRIPTOR_BITS)
            .map(|_| [offset(), offset()])
            .collect();

        Self { pairs }
    }

    /// Describe the keypoint at `(x, y)` of a smoothed single channel frame.
    ///
    /// The whole patch must lie within the frame.
    pub fn describe(&self, smoothed: &Frame, x: usize, y: usize) -> Descriptor {
        let mut desc = Descriptor::default();

        let at = |(ox, oy): (i32, i32)| {
            smoothed.get((x as i32 + ox) as usize, (y as i32 + oy) as usize, 0)
        };

        for (i, [p, q]) in self.pairs.iter().enumerate() {
            if at(*p) < at(*q) {
                desc[i / 64] |= 1 << (i % 64);
            }
        }

        desc
    }
}

/// Separable box filter with clamped edges.
pub fn box_blur(gray: &Frame, radius: usize) -> Frame {
    let (w, h) = gray.dim();

    if radius == 0 || gray.is_empty() {
        return gray.clone();
    }

    let window = (2 * radius + 1) as u32;

    let pass = |src: &Frame, horizontal: bool| {
        let mut out = Frame::new(w, h, 1);
        let len = if horizontal { w } else { h };

        for y in 0..h {
            for x in 0..w {
                let pos = if horizontal { x } else { y };

                let sum = (0..window as usize)
                    .map(|k| (pos + k).saturating_sub(radius).min(len - 1))
                    .map(|p| {
                        if horizontal {
                            src.get(p, y, 0)
                        } else {
                            src.get(x, p, 0)
                        }
                    })
                    .map(u32::from)
                    .sum::<u32>();

                out.set(x, y, 0, ((sum + window / 2) / window) as u8);
            }
        }

        out
    };

    pass(&pass(gray, true), false)
}

/// Number of differing bits between two descriptors.
pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(a, b)| (a ^ b).count_ones()).sum()
}
