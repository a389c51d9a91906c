//! Active liveness detection over a short selfie clip.
//!
//! A printed photo or a still on a screen neither blinks nor drifts. The
//! evaluator walks a capped number of video frames, asks the landmark
//! provider for the face mesh on each, and feeds two signals:
//!
//! - the mean eye aspect ratio of both eyes into the [`BlinkAutomaton`];
//! - the nose-tip position into the [`MotionTracker`].
//!
//! The clip's audio track is checked separately. The verdict passes when
//! enough blinks were seen, the head moved, and audio was present (or audio
//! is not required).
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs, static images on a display, masks
//!   with fixed closed or open eyes.
//! - **Does not block:** Replayed video of the subject, deepfake streams.
//!
//! # Bypass policy
//!
//! When no landmark provider is loaded, or no selfie clip was supplied, the
//! evaluator cannot judge. Each case is governed by a configuration flag
//! and yields a distinct [`LivenessOutcome`] so a bypass is never confused
//! with a genuine pass.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{check_audio_presence, AudioConfig};
use crate::blink::{BlinkAutomaton, BlinkConfig};
use crate::ear::calculate_ear;
use crate::landmarks::{Eye, LandmarkError, LandmarkProvider};
use crate::media::{MediaBackend, MediaError, DEFAULT_MAX_FRAME_PIXELS};
use crate::motion::{MotionConfig, MotionTracker};

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("cannot open selfie video {}: {source}", .path.display())]
    VideoOpen {
        path: PathBuf,
        #[source]
        source: MediaError,
    },
    #[error("landmark inference failed on frame {frame}: {source}")]
    Landmarks {
        frame: usize,
        #[source]
        source: LandmarkError,
    },
}

/// Liveness thresholds and policy switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Whether the landmark provider should be loaded at all.
    pub enabled: bool,
    pub ear_threshold: f32,
    pub blink_min_frames: usize,
    pub blink_max_frames: usize,
    pub min_blinks_required: u32,
    /// Nose-tip range in pixels that must be exceeded on either axis.
    pub motion_range_threshold: f32,
    pub motion_min_samples: usize,
    pub audio_rms_threshold: f32,
    pub audio_duration_secs: f32,
    /// Hard cap on analysed frames; bounds latency regardless of clip length.
    pub max_frames: usize,
    /// Streams with larger frames are refused before decoding.
    pub max_frame_pixels: u64,
    pub require_audio: bool,
    /// Pass (rather than reject) when no landmark provider is available.
    pub bypass_when_unavailable: bool,
    /// Pass (rather than reject) when the request carries no selfie clip.
    pub allow_missing_video: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ear_threshold: 0.20,
            blink_min_frames: 2,
            blink_max_frames: 5,
            min_blinks_required: 1,
            motion_range_threshold: 5.0,
            motion_min_samples: 11,
            audio_rms_threshold: 0.005,
            audio_duration_secs: 3.0,
            max_frames: 75,
            max_frame_pixels: DEFAULT_MAX_FRAME_PIXELS,
            require_audio: false,
            bypass_when_unavailable: true,
            allow_missing_video: true,
        }
    }
}

impl LivenessConfig {
    pub fn blink(&self) -> BlinkConfig {
        BlinkConfig {
            ear_threshold: self.ear_threshold,
            min_frames: self.blink_min_frames,
            max_frames: self.blink_max_frames,
        }
    }

    pub fn motion(&self) -> MotionConfig {
        MotionConfig {
            range_threshold: self.motion_range_threshold,
            min_samples: self.motion_min_samples,
        }
    }

    pub fn audio(&self) -> AudioConfig {
        AudioConfig {
            rms_threshold: self.audio_rms_threshold,
            max_duration: Duration::try_from_secs_f32(self.audio_duration_secs)
                .unwrap_or(AudioConfig::default().max_duration),
        }
    }
}

/// How a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessOutcome {
    /// The clip was analysed.
    Evaluated,
    /// Passed by policy: no landmark provider loaded.
    BypassedNoDetector,
    /// Passed by policy: no selfie clip supplied.
    BypassedNoVideo,
    /// Rejected by policy: no landmark provider loaded.
    DetectorUnavailable,
    /// Rejected by policy: no selfie clip supplied.
    VideoMissing,
}

impl LivenessOutcome {
    pub fn is_bypass(self) -> bool {
        matches!(
            self,
            LivenessOutcome::BypassedNoDetector | LivenessOutcome::BypassedNoVideo
        )
    }
}

/// Fused liveness result. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessVerdict {
    pub blink_count: u32,
    pub head_moved: bool,
    pub audio_present: bool,
    pub passed: bool,
    pub outcome: LivenessOutcome,
    pub frames_analysed: usize,
    pub faces_detected: usize,
}

impl LivenessVerdict {
    fn by_policy(outcome: LivenessOutcome, passed: bool) -> Self {
        Self {
            blink_count: 0,
            head_moved: false,
            audio_present: false,
            passed,
            outcome,
            frames_analysed: 0,
            faces_detected: 0,
        }
    }
}

/// Decision fusion over the three signals.
pub fn fuse(blink_count: u32, head_moved: bool, audio_present: bool, config: &LivenessConfig) -> bool {
    blink_count >= config.min_blinks_required && head_moved && (audio_present || !config.require_audio)
}

pub struct LivenessEvaluator<'a> {
    config: &'a LivenessConfig,
    media: &'a dyn MediaBackend,
}

impl<'a> LivenessEvaluator<'a> {
    pub fn new(config: &'a LivenessConfig, media: &'a dyn MediaBackend) -> Self {
        Self { config, media }
    }

    /// Produce the verdict for a request, applying the bypass policy when
    /// either the provider or the clip is absent.
    pub fn evaluate(
        &self,
        video: Option<&Path>,
        landmarks: Option<&mut dyn LandmarkProvider>,
    ) -> Result<LivenessVerdict, LivenessError> {
        match (landmarks, video) {
            (Some(provider), Some(video)) => self.analyse_video(video, provider),
            (None, _) => {
                let passed = self.config.bypass_when_unavailable;
                if passed {
                    tracing::warn!(
                        bypass = "landmarks_unavailable",
                        "landmark provider not loaded; liveness passed by policy"
                    );
                    Ok(LivenessVerdict::by_policy(LivenessOutcome::BypassedNoDetector, true))
                } else {
                    tracing::warn!("landmark provider not loaded; liveness rejected by policy");
                    Ok(LivenessVerdict::by_policy(LivenessOutcome::DetectorUnavailable, false))
                }
            }
            (Some(_), None) => {
                if self.config.allow_missing_video {
                    tracing::warn!(
                        bypass = "no_selfie_video",
                        "no selfie video supplied; liveness passed by policy"
                    );
                    Ok(LivenessVerdict::by_policy(LivenessOutcome::BypassedNoVideo, true))
                } else {
                    tracing::warn!("no selfie video supplied; liveness rejected by policy");
                    Ok(LivenessVerdict::by_policy(LivenessOutcome::VideoMissing, false))
                }
            }
        }
    }

    /// Run the frame loop and audio check over one clip.
    pub fn analyse_video(
        &self,
        video: &Path,
        landmarks: &mut dyn LandmarkProvider,
    ) -> Result<LivenessVerdict, LivenessError> {
        let mut reader = self
            .media
            .open_video(video, self.config.max_frames)
            .map_err(|source| LivenessError::VideoOpen {
                path: video.to_path_buf(),
                source,
            })?;
        tracing::info!(path = %video.display(), max_frames = self.config.max_frames, "liveness analysis started");

        let mut blinks = BlinkAutomaton::new(self.config.blink());
        let mut motion = MotionTracker::new(self.config.motion());
        let mut frames_analysed = 0usize;
        let mut faces_detected = 0usize;

        while frames_analysed < self.config.max_frames {
            let frame = match reader.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(frame = frames_analysed, error = %e, "frame decode failed; ending analysis");
                    break;
                }
            };
            frames_analysed += 1;

            let Some(face) = landmarks
                .landmarks(frame)
                .map_err(|source| LivenessError::Landmarks {
                    frame: frame.index,
                    source,
                })?
            else {
                continue;
            };
            faces_detected += 1;

            let (w, h) = (frame.width as f32, frame.height as f32);
            let left_ear = calculate_ear(&face.eye_pixels(Eye::Left, w, h));
            let right_ear = calculate_ear(&face.eye_pixels(Eye::Right, w, h));
            let avg_ear = (left_ear + right_ear) / 2.0;
            tracing::debug!(frame = frame.index, left_ear, right_ear, avg_ear, "ear sample");

            if blinks.push(avg_ear) {
                tracing::debug!(frame = frame.index, total = blinks.blink_count(), "blink detected");
            }
            if let Some(nose) = face.nose_tip_pixels(w, h) {
                motion.record(nose);
            }
        }
        drop(reader);

        let blink_count = blinks.finish();
        let head_moved = motion.head_moved();
        if let Some((x_range, y_range)) = motion.ranges() {
            tracing::debug!(x_range, y_range, samples = motion.samples(), "nose motion");
        }
        let audio_present = check_audio_presence(self.media, video, &self.config.audio());
        let passed = fuse(blink_count, head_moved, audio_present, self.config);

        tracing::info!(
            blink_count,
            head_moved,
            audio_present,
            frames_analysed,
            faces_detected,
            passed,
            "liveness evaluated"
        );

        Ok(LivenessVerdict {
            blink_count,
            head_moved,
            audio_present,
            passed,
            outcome: LivenessOutcome::Evaluated,
            frames_analysed,
            faces_detected,
        })
    }
}
