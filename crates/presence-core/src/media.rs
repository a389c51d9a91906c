//! Video frame and audio decoding.
//!
//! [`MediaBackend`] is the seam the liveness evaluator reads through.
//! [`FfmpegBackend`] implements it by running `ffprobe` for stream metadata
//! and `ffmpeg` for decoding, reading raw RGB24 frames and s16le PCM from
//! the child's stdout.

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use thiserror::Error;

use crate::types::{AudioClip, Frame};

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: &'static str,
        status: String,
        stderr: String,
    },
    #[error("no decodable video stream in {0}")]
    NoVideoStream(PathBuf),
    #[error("video frames of {width}x{height} exceed the {max_pixels} pixel limit")]
    FrameTooLarge { width: u32, height: u32, max_pixels: u64 },
    #[error("unexpected probe output: {0}")]
    Probe(String),
    #[error("media read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sequential access to decoded frames.
pub trait FrameReader {
    /// Next frame, or `None` at end of stream. The frame borrows the
    /// reader's buffer and is overwritten by the following call.
    fn next_frame(&mut self) -> Result<Option<&Frame>, MediaError>;
}

/// Largest decoded frame accepted by default: 3840x2160.
pub const DEFAULT_MAX_FRAME_PIXELS: u64 = 3840 * 2160;

/// Decodes video frames and audio from a media file.
pub trait MediaBackend: Send + Sync {
    /// Open `path` for frame-by-frame reading of at most `max_frames` frames.
    fn open_video(&self, path: &Path, max_frames: usize) -> Result<Box<dyn FrameReader>, MediaError>;

    /// Decode up to `max_duration` of the first audio track.
    /// `Ok(None)` means the file has no audio track.
    fn decode_audio(&self, path: &Path, max_duration: Duration) -> Result<Option<AudioClip>, MediaError>;
}

/// ffmpeg/ffprobe subprocess backend.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    max_frame_pixels: u64,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            max_frame_pixels: DEFAULT_MAX_FRAME_PIXELS,
        }
    }

    /// Refuse to decode streams whose frames hold more than `max` pixels.
    pub fn with_max_frame_pixels(mut self, max: u64) -> Self {
        self.max_frame_pixels = max;
        self
    }

    fn probe(&self, path: &Path, stream: &str, entries: &str) -> Result<HashMap<String, String>, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", stream, "-show_entries", entries])
            .args(["-of", "default=noprint_wrappers=1"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| MediaError::Spawn {
                command: "ffprobe",
                source,
            })?;

        if !output.status.success() {
            return Err(MediaError::CommandFailed {
                command: "ffprobe",
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_key_values(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_video(&self, path: &Path, max_frames: usize) -> Result<Box<dyn FrameReader>, MediaError> {
        let info = self.probe(
            path,
            "v:0",
            "stream=width,height:stream_side_data=rotation:stream_tags=rotate",
        )?;

        let dimension = |key: &str| info.get(key).and_then(|v| v.parse::<u32>().ok());
        let (Some(mut width), Some(mut height)) = (dimension("width"), dimension("height")) else {
            return Err(MediaError::NoVideoStream(path.to_path_buf()));
        };
        if width == 0 || height == 0 {
            return Err(MediaError::NoVideoStream(path.to_path_buf()));
        }

        // ffmpeg applies the display matrix while decoding, so portrait
        // phone footage comes out with its sides swapped.
        let rotation = info
            .get("rotation")
            .or_else(|| info.get("rotate"))
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(0.0);
        if is_quarter_turn(rotation) {
            std::mem::swap(&mut width, &mut height);
        }
        let frame_len = rgb_frame_len(width, height, self.max_frame_pixels).ok_or(MediaError::FrameTooLarge {
            width,
            height,
            max_pixels: self.max_frame_pixels,
        })?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-an", "-frames:v", &max_frames.to_string()])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| MediaError::Spawn {
                command: "ffmpeg",
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MediaError::Probe("ffmpeg stdout unavailable".to_string()));
        };

        tracing::debug!(path = %path.display(), width, height, rotation, "video opened");

        Ok(Box::new(FfmpegFrameReader {
            child,
            stdout,
            frame: Frame {
                index: 0,
                width,
                height,
                data: vec![0u8; frame_len],
            },
            next_index: 0,
        }))
    }

    fn decode_audio(&self, path: &Path, max_duration: Duration) -> Result<Option<AudioClip>, MediaError> {
        let info = self.probe(path, "a:0", "stream=channels,sample_rate")?;
        let Some(channels) = info.get("channels").and_then(|v| v.parse::<u16>().ok()) else {
            return Ok(None);
        };
        let sample_rate = info
            .get("sample_rate")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(44_100);

        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-t", &format!("{:.3}", max_duration.as_secs_f64())])
            .args(["-vn", "-map", "0:a:0", "-f", "s16le", "-acodec", "pcm_s16le", "pipe:1"])
            .stdin(Stdio::null())
            .output()
            .map_err(|source| MediaError::Spawn {
                command: "ffmpeg",
                source,
            })?;

        if !output.status.success() {
            return Err(MediaError::CommandFailed {
                command: "ffmpeg",
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Some(AudioClip {
            sample_rate,
            channels,
            samples: pcm_s16le_to_f32(&output.stdout),
        }))
    }
}

struct FfmpegFrameReader {
    child: Child,
    stdout: ChildStdout,
    frame: Frame,
    next_index: usize,
}

impl FrameReader for FfmpegFrameReader {
    fn next_frame(&mut self) -> Result<Option<&Frame>, MediaError> {
        match self.stdout.read_exact(&mut self.frame.data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        self.frame.index = self.next_index;
        self.next_index += 1;
        Ok(Some(&self.frame))
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        // The frame cap may stop reading before ffmpeg finishes writing.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Parse ffprobe `default=noprint_wrappers=1` output. Tag keys lose their
/// `TAG:` prefix; the first occurrence of a key wins.
fn parse_key_values(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let key = key.strip_prefix("TAG:").unwrap_or(key);
        map.entry(key.to_string())
            .or_insert_with(|| value.trim().to_string());
    }
    map
}

/// Byte length of one RGB24 frame, or `None` when the frame holds more
/// than `max_pixels` pixels.
fn rgb_frame_len(width: u32, height: u32, max_pixels: u64) -> Option<usize> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > max_pixels {
        return None;
    }
    usize::try_from(pixels.checked_mul(3)?).ok()
}

fn is_quarter_turn(degrees: f32) -> bool {
    (degrees.round() as i32).rem_euclid(180) == 90
}

fn pcm_s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}
