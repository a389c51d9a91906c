//! Audio presence: is there signal above the noise floor in the clip's
//! leading seconds?
//!
//! Optional liveness evidence. Every decode problem is absorbed here and
//! reported as "no audio" so the caller never fails on it.

use std::path::Path;
use std::time::Duration;

use crate::media::MediaBackend;
use crate::types::AudioClip;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioConfig {
    /// RMS amplitude (on a `[-1, 1]` scale) that must be strictly exceeded.
    pub rms_threshold: f32,
    /// Leading segment decoded for analysis.
    pub max_duration: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 0.005,
            max_duration: Duration::from_secs(3),
        }
    }
}

/// Average interleaved channels down to a single mono track.
pub fn downmix_mono(clip: &AudioClip) -> Vec<f32> {
    let channels = usize::from(clip.channels.max(1));
    if channels == 1 {
        return clip.samples.clone();
    }
    clip.samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Root-mean-square amplitude, `None` for an empty buffer.
pub fn rms(samples: &[f32]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    Some((sum_sq / samples.len() as f64).sqrt() as f32)
}

/// Decode and measure the clip's RMS. `None` when there is nothing to measure.
pub fn measure_rms(media: &dyn MediaBackend, video: &Path, config: &AudioConfig) -> Option<f32> {
    let clip = match media.decode_audio(video, config.max_duration) {
        Ok(Some(clip)) => clip,
        Ok(None) => {
            tracing::warn!(path = %video.display(), "no audio track in clip");
            return None;
        }
        Err(e) => {
            tracing::warn!(
                path = %video.display(),
                error = %e,
                "audio decode failed; treating as no audio"
            );
            return None;
        }
    };

    let mono = downmix_mono(&clip);
    let value = rms(&mono);
    if value.is_none() {
        tracing::warn!(path = %video.display(), "audio track decoded to an empty buffer");
    }
    value
}

/// True iff the clip carries audio whose RMS exceeds the threshold.
pub fn check_audio_presence(media: &dyn MediaBackend, video: &Path, config: &AudioConfig) -> bool {
    match measure_rms(media, video, config) {
        Some(value) => {
            let present = value > config.rms_threshold;
            tracing::info!(rms = value, threshold = config.rms_threshold, present, "audio analysed");
            present
        }
        None => false,
    }
}
