//! # Geometric primitives shared between components

use nalgebra as na;
use std::fmt;

/// Keypoint location in image coordinates.
pub type Keypoint = na::Point2<f32>;

/// Keypoints of a single image together with their descriptors.
///
/// Descriptors are indexed the same way as keypoints.
#[derive(Clone, Debug, Default)]
pub struct Features<D> {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: D,
}

/// Candidate returned by nearest neighbour descriptor matching.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KnnMatch {
    /// Index into the query descriptor set.
    pub query: usize,
    /// Index into the train descriptor set.
    pub train: usize,
    /// Descriptor distance between the two.
    pub distance: f32,
}

/// Accepted correspondence between keypoint `a` of image A and keypoint `b` of image B.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Match {
    pub a: usize,
    pub b: usize,
}

/// Projective transform from the plane of image A to the plane of image B.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography(na::Matrix3<f64>);

impl Homography {
    pub fn from_matrix(matrix: na::Matrix3<f64>) -> Self {
        Self(matrix)
    }

    /// Pure translation by `(tx, ty)`.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self(na::matrix![1.0, 0.0, tx; 0.0, 1.0, ty; 0.0, 0.0, 1.0])
    }

    pub fn as_matrix(&self) -> &na::Matrix3<f64> {
        &self.0
    }

    /// Get the inverse transform, if the matrix is not singular.
    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    /// Transform a point.
    ///
    /// Returns `None` if the point maps to infinity.
    pub fn transform_point(&self, p: na::Point2<f64>) -> Option<na::Point2<f64>> {
        let v = self.0 * na::Vector3::new(p.x, p.y, 1.0);
        if v.z.abs() <= f64::EPSILON {
            None
        } else {
            Some(na::Point2::new(v.x / v.z, v.y / v.z))
        }
    }
}

impl fmt::Display for Homography {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "[{:.4}, {:.4}, {:.4}; {:.4}, {:.4}, {:.4}; {:.6}, {:.6}, {:.4}]",
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)]
        )
    }
}

/// Axis aligned pixel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    /// Smallest rectangle containing both rectangles.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }
}

/// Closed boundary of a connected region.
///
/// The points are pixel centers in traversal order, the last point connects back to the first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<na::Point2<i32>>,
}

impl Contour {
    pub fn new(points: Vec<na::Point2<i32>>) -> Self {
        Self { points }
    }

    /// Area enclosed by the boundary polygon.
    ///
    /// This is measured on the polygon through pixel centers, therefore a solid `w` by `h`
    /// block has an area of `(w - 1) * (h - 1)`.
    pub fn area(&self) -> f64 {
        let n = self.points.len();

        if n < 3 {
            return 0.0;
        }

        let twice = (0..n)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
            })
            .sum::<i64>();

        twice.abs() as f64 / 2.0
    }

    /// Tight bounding rectangle of all boundary pixels.
    pub fn bounding_rect(&self) -> Rect {
        let mut iter = self.points.iter();

        let first = match iter.next() {
            Some(p) => *p,
            None => return Rect::default(),
        };

        let (min, max) = iter.fold((first, first), |(min, max), p| {
            (
                na::Point2::new(min.x.min(p.x), min.y.min(p.y)),
                na::Point2::new(max.x.max(p.x), max.y.max(p.y)),
            )
        });

        Rect::new(
            min.x.max(0) as usize,
            min.y.max(0) as usize,
            (max.x - min.x + 1) as usize,
            (max.y - min.y + 1) as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn square(x: i32, y: i32, side: i32) -> Contour {
        Contour::new(vec![
            na::Point2::new(x, y),
            na::Point2::new(x + side - 1, y),
            na::Point2::new(x + side - 1, y + side - 1),
            na::Point2::new(x, y + side - 1),
        ])
    }

    #[test]
    fn contour_area_and_bounds() {
        let c = square(2, 3, 5);
        assert_approx_eq!(c.area(), 16.0);
        assert_eq!(c.bounding_rect(), Rect::new(2, 3, 5, 5));

        // Orientation does not matter.
        let mut rev = c.clone();
        rev.points.reverse();
        assert_approx_eq!(rev.area(), 16.0);
    }

    #[test]
    fn degenerate_contours() {
        let point = Contour::new(vec![na::Point2::new(4, 4)]);
        assert_eq!(point.area(), 0.0);
        assert_eq!(point.bounding_rect(), Rect::new(4, 4, 1, 1));
        assert_eq!(Contour::default().bounding_rect(), Rect::default());
    }

    #[test]
    fn rect_union() {
        let a = Rect::new(10, 10, 5, 5);
        let b = Rect::new(2, 12, 3, 10);
        assert_eq!(a.union(&b), Rect::new(2, 10, 13, 12));
    }

    #[test]
    fn homography_transform() {
        let h = Homography::translation(350.0, -2.0);
        let p = h.transform_point(na::Point2::new(10.0, 20.0)).unwrap();
        assert_approx_eq!(p.x, 360.0);
        assert_approx_eq!(p.y, 18.0);

        let back = h.inverse().unwrap().transform_point(p).unwrap();
        assert_approx_eq!(back.x, 10.0);
        assert_approx_eq!(back.y, 20.0);
    }
}
