//! Head-motion detection from the nose-tip trajectory.
//!
//! A photo held still in front of the camera keeps the nose tip within a
//! pixel or two; a live subject drifts several pixels during a short clip.
//! Only the per-axis range (max - min) is inspected, not the path shape.

use crate::types::Point;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionConfig {
    /// Per-axis range, in pixels, that must be strictly exceeded.
    pub range_threshold: f32,
    /// Samples required before any judgement is made.
    pub min_samples: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            range_threshold: 5.0,
            min_samples: 11,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MotionTracker {
    config: MotionConfig,
    samples: usize,
    min: Point,
    max: Point,
}

impl MotionTracker {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            samples: 0,
            min: Point::new(f32::INFINITY, f32::INFINITY),
            max: Point::new(f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    /// Record one nose-tip sample. Non-finite samples are dropped.
    pub fn record(&mut self, nose: Point) {
        if !nose.is_finite() {
            return;
        }
        self.samples += 1;
        self.min.x = self.min.x.min(nose.x);
        self.min.y = self.min.y.min(nose.y);
        self.max.x = self.max.x.max(nose.x);
        self.max.y = self.max.y.max(nose.y);
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// `(x_range, y_range)`, or `None` before the first sample.
    pub fn ranges(&self) -> Option<(f32, f32)> {
        (self.samples > 0).then(|| (self.max.x - self.min.x, self.max.y - self.min.y))
    }

    pub fn head_moved(&self) -> bool {
        if self.samples < self.config.min_samples {
            return false;
        }
        match self.ranges() {
            Some((x_range, y_range)) => {
                x_range > self.config.range_threshold || y_range > self.config.range_threshold
            }
            None => false,
        }
    }
}
