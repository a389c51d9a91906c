//! Facial landmark sets and the provider seam.
//!
//! Landmarks follow the 468-point MediaPipe face-mesh topology, normalised
//! to `[0, 1]` in image space. Only three regions are consumed: the six-point
//! contours of each eye (for EAR) and the nose tip (for head motion).

use thiserror::Error;

use crate::types::{Frame, Point};

/// Face-mesh indices of the left eye contour, in EAR order.
pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
/// Face-mesh indices of the right eye contour, in EAR order.
pub const RIGHT_EYE: [usize; 6] = [263, 387, 385, 362, 380, 373];
/// Face-mesh index of the nose tip.
pub const NOSE_TIP: usize = 1;
/// Points in a full face mesh.
pub const MESH_POINTS: usize = 468;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("failed to load landmark model: {0}")]
    Model(String),
    #[error("landmark inference failed: {0}")]
    Inference(String),
    #[error("frame buffer does not match {width}x{height} RGB24")]
    InvalidFrame { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    fn indices(self) -> &'static [usize; 6] {
        match self {
            Eye::Left => &LEFT_EYE,
            Eye::Right => &RIGHT_EYE,
        }
    }
}

/// Landmarks of one detected face, normalised coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }

    /// Eye contour scaled to pixels. Indices missing from the set are skipped,
    /// so a truncated mesh yields fewer than six points.
    pub fn eye_pixels(&self, eye: Eye, width: f32, height: f32) -> Vec<Point> {
        eye.indices()
            .iter()
            .filter_map(|&i| self.point(i))
            .map(|p| Point::new(p.x * width, p.y * height))
            .collect()
    }

    pub fn nose_tip_pixels(&self, width: f32, height: f32) -> Option<Point> {
        self.point(NOSE_TIP)
            .map(|p| Point::new(p.x * width, p.y * height))
    }

    /// Axis-aligned bounds `(min, max)` of all points, normalised.
    pub fn bounds(&self) -> Option<(Point, Point)> {
        let first = *self.points.first()?;
        Some(self.points.iter().fold((first, first), |(lo, hi), p| {
            (
                Point::new(lo.x.min(p.x), lo.y.min(p.y)),
                Point::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        }))
    }
}

/// Extracts facial landmarks from a frame.
///
/// Returns `Ok(None)` when no face is present. Implementations may hold
/// inference sessions that require exclusive access, hence `&mut self`.
pub trait LandmarkProvider: Send {
    fn landmarks(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, LandmarkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_with(overrides: &[(usize, Point)]) -> LandmarkSet {
        let mut points = vec![Point::new(0.5, 0.5); MESH_POINTS];
        for &(i, p) in overrides {
            points[i] = p;
        }
        LandmarkSet::new(points)
    }

    #[test]
    fn test_eye_pixels_scaled_in_order() {
        let set = mesh_with(&[(33, Point::new(0.25, 0.5)), (144, Point::new(0.75, 0.25))]);
        let left = set.eye_pixels(Eye::Left, 100.0, 40.0);
        assert_eq!(left.len(), 6);
        assert_eq!(left[0], Point::new(25.0, 20.0));
        assert_eq!(left[5], Point::new(75.0, 10.0));
    }

    #[test]
    fn test_truncated_mesh_yields_short_eye() {
        let set = LandmarkSet::new(vec![Point::new(0.5, 0.5); 150]);
        assert_eq!(set.eye_pixels(Eye::Left, 10.0, 10.0).len(), 3);
        assert!(set.eye_pixels(Eye::Right, 10.0, 10.0).is_empty());
        assert_eq!(set.nose_tip_pixels(10.0, 10.0), Some(Point::new(5.0, 5.0)));
    }

    #[test]
    fn test_bounds() {
        let set = LandmarkSet::new(vec![
            Point::new(0.2, 0.6),
            Point::new(0.4, 0.1),
            Point::new(0.3, 0.9),
        ]);
        let (lo, hi) = set.bounds().unwrap();
        assert_eq!(lo, Point::new(0.2, 0.1));
        assert_eq!(hi, Point::new(0.4, 0.9));
        assert!(LandmarkSet::new(Vec::new()).bounds().is_none());
    }
}
