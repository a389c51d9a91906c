//! Offline liveness and audio analysis of a single video.

use anyhow::{Context, Result};
use presence_core::audio::{measure_rms, AudioConfig};
use presence_core::{FfmpegBackend, LivenessConfig, LivenessEvaluator, OnnxFaceMesh};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

pub fn liveness(model_dir: &Path, video: &Path, max_frames: usize, require_audio: bool) -> Result<()> {
    let mesh_path = model_dir.join(presence_models::FACE_MESH.name);
    let mut mesh = OnnxFaceMesh::load(&mesh_path.to_string_lossy())
        .with_context(|| format!("failed to load {}", mesh_path.display()))?;
    tracing::debug!(path = %mesh_path.display(), "face mesh loaded");

    let config = LivenessConfig {
        max_frames,
        require_audio,
        ..LivenessConfig::default()
    };
    let media = FfmpegBackend::default();
    let verdict = LivenessEvaluator::new(&config, &media)
        .evaluate(Some(video), Some(&mut mesh))
        .with_context(|| format!("liveness analysis of {} failed", video.display()))?;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

pub fn audio(video: &Path, threshold: f32, duration: f32) -> Result<()> {
    let max_duration =
        Duration::try_from_secs_f32(duration).with_context(|| format!("invalid duration {duration}"))?;
    let config = AudioConfig {
        rms_threshold: threshold,
        max_duration,
    };
    let media = FfmpegBackend::default();
    let rms = measure_rms(&media, video, &config);
    let present = rms.is_some_and(|v| v > threshold);

    let report = json!({
        "video": video.display().to_string(),
        "rms": rms,
        "threshold": threshold,
        "audio_present": present,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
