//! presence-core: liveness and face-match engine.
//!
//! Pure signal processing (eye aspect ratio, blink automaton, head-motion
//! range, audio RMS) plus the collaborator seams the daemon composes:
//! a landmark provider, a face matcher and a media backend. ONNX-backed
//! implementations of the first two run through ONNX Runtime on the CPU;
//! the media backend shells out to ffmpeg.

pub mod audio;
pub mod blink;
pub mod ear;
pub mod landmarks;
pub mod liveness;
pub mod matcher;
pub mod media;
pub mod mesh;
pub mod motion;
pub mod preprocess;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use landmarks::{LandmarkError, LandmarkProvider, LandmarkSet};
pub use liveness::{LivenessConfig, LivenessError, LivenessEvaluator, LivenessOutcome, LivenessVerdict};
pub use matcher::{DistanceMetric, FaceMatcher, MatchError, MatchVerdict};
pub use media::{FfmpegBackend, FrameReader, MediaBackend, MediaError, DEFAULT_MAX_FRAME_PIXELS};
pub use mesh::OnnxFaceMesh;
pub use recognizer::SFaceMatcher;
pub use types::{AudioClip, Frame, Point};

/// Determine the model directory.
///
/// When running as root (UID 0), defaults to `/var/lib/presence/models` (system-wide).
/// Otherwise defaults to `$XDG_DATA_HOME/presence/models` (~/.local/share/presence/models).
pub fn default_model_dir() -> PathBuf {
    if is_root() {
        PathBuf::from("/var/lib/presence/models")
    } else {
        let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.local/share")
        });
        PathBuf::from(data_home).join("presence/models")
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid is always safe to call.
    unsafe { libc::geteuid() == 0 }
}
