//! In-process fakes for the model and media seams.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use presence_core::landmarks::{LEFT_EYE, MESH_POINTS, NOSE_TIP, RIGHT_EYE};
use presence_core::{
    AudioClip, FaceMatcher, Frame, FrameReader, LandmarkError, LandmarkProvider, LandmarkSet, MatchError,
    MatchVerdict, MediaBackend, MediaError, Point,
};

pub const FRAME_SIDE: u32 = 100;

/// Mesh whose eyes have aspect ratio `ear` and whose nose tip sits at
/// pixel `(nose_x, 50)` on a square frame.
pub fn face(ear: f32, nose_x: f32) -> LandmarkSet {
    let side = FRAME_SIDE as f32;
    let mut points = vec![Point::new(0.5, 0.5); MESH_POINTS];
    let half_gap = ear * 30.0 / 2.0 / side;
    for eye in [LEFT_EYE, RIGHT_EYE] {
        let y = 0.4;
        let contour = [
            Point::new(0.1, y),
            Point::new(0.2, y - half_gap),
            Point::new(0.3, y - half_gap),
            Point::new(0.4, y),
            Point::new(0.3, y + half_gap),
            Point::new(0.2, y + half_gap),
        ];
        for (i, p) in eye.iter().zip(contour) {
            points[*i] = p;
        }
    }
    points[NOSE_TIP] = Point::new(nose_x / side, 0.5);
    LandmarkSet::new(points)
}

/// A photo held up to the camera: open eyes, no motion.
pub struct StaticFace;

impl LandmarkProvider for StaticFace {
    fn landmarks(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>, LandmarkError> {
        Ok(Some(face(0.30, 50.0)))
    }
}

/// One three-frame blink and a slow sideways drift.
pub struct LiveFace;

impl LandmarkProvider for LiveFace {
    fn landmarks(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, LandmarkError> {
        let ear = if (10..13).contains(&frame.index) { 0.10 } else { 0.30 };
        Ok(Some(face(ear, 40.0 + frame.index as f32 * 0.5)))
    }
}

struct BlankFrames {
    remaining: usize,
    next: usize,
    frame: Frame,
}

impl BlankFrames {
    fn new(remaining: usize) -> Self {
        Self {
            remaining,
            next: 0,
            frame: Frame {
                index: 0,
                width: FRAME_SIDE,
                height: FRAME_SIDE,
                data: Vec::new(),
            },
        }
    }
}

impl FrameReader for BlankFrames {
    fn next_frame(&mut self) -> Result<Option<&Frame>, MediaError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.frame.index = self.next;
        self.next += 1;
        Ok(Some(&self.frame))
    }
}

/// Media backend serving blank frames and a constant-level audio track.
pub struct ScriptedMedia {
    frames: usize,
    audio_level: Option<f32>,
}

impl ScriptedMedia {
    pub fn silent(frames: usize) -> Self {
        Self {
            frames,
            audio_level: None,
        }
    }
}

impl MediaBackend for ScriptedMedia {
    fn open_video(&self, _path: &Path, max_frames: usize) -> Result<Box<dyn FrameReader>, MediaError> {
        Ok(Box::new(BlankFrames::new(self.frames.min(max_frames))))
    }

    fn decode_audio(&self, _path: &Path, _max_duration: Duration) -> Result<Option<AudioClip>, MediaError> {
        Ok(self.audio_level.map(|level| AudioClip {
            sample_rate: 16_000,
            channels: 1,
            samples: vec![level; 1600],
        }))
    }
}

/// Media backend whose videos never open.
pub struct BrokenMedia;

impl MediaBackend for BrokenMedia {
    fn open_video(&self, path: &Path, _max_frames: usize) -> Result<Box<dyn FrameReader>, MediaError> {
        Err(MediaError::NoVideoStream(path.to_path_buf()))
    }

    fn decode_audio(&self, _path: &Path, _max_duration: Duration) -> Result<Option<AudioClip>, MediaError> {
        Ok(None)
    }
}

enum Scripted {
    Distance(f32),
    NoFace(PathBuf),
}

/// Matcher returning a fixed distance against the cosine threshold.
pub struct FakeMatcher {
    outcome: Scripted,
    calls: Arc<AtomicUsize>,
}

impl FakeMatcher {
    pub fn distance(distance: f32) -> Self {
        Self {
            outcome: Scripted::Distance(distance),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn no_face(image: &Path) -> Self {
        Self {
            outcome: Scripted::NoFace(image.to_path_buf()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `verify` invocations.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl FaceMatcher for FakeMatcher {
    fn verify(&mut self, reference: &Path, probe: &Path) -> Result<MatchVerdict, MatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Scripted::NoFace(image) => Err(MatchError::NoFace { image: image.clone() }),
            Scripted::Distance(_) if !reference.exists() => Err(MatchError::NoFace {
                image: reference.to_path_buf(),
            }),
            Scripted::Distance(_) if !probe.exists() => Err(MatchError::NoFace {
                image: probe.to_path_buf(),
            }),
            Scripted::Distance(d) => Ok(MatchVerdict::from_distance(*d, 0.593)),
        }
    }
}

/// Encoded PNG of a flat grey image.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([128, 128, 128]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Encoded JPEG of a flat grey image.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 120, 150]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}
