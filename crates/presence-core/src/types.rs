/// A 2-D point in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One decoded video frame. Never persisted.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Ordinal position within the analysis window.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Packed RGB24 pixels, row-major.
    pub data: Vec<u8>,
}

/// Decoded PCM audio, interleaved, normalised to `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}
