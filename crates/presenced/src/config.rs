use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use presence_core::{DistanceMetric, LivenessConfig};
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_ENV: &str = "PRESENCE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `PRESENCE_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Root of the permanent per-user storage tree.
    pub storage_root: PathBuf,
    /// Parent of request scratch areas (system temp dir when unset).
    pub scratch_dir: Option<PathBuf>,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Check models against `SHA256SUMS` before loading.
    pub verify_model_checksums: bool,
    /// Upper bound on one engine request (liveness or match).
    pub request_timeout_secs: u64,
    pub max_upload_bytes: usize,
    /// Longer side of preprocessed images, in pixels.
    pub image_max_dim: u32,
    pub image_jpeg_quality: u8,
    pub liveness: LivenessConfig,
    pub matcher: MatcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            storage_root: PathBuf::from("user_verification_data_verified"),
            scratch_dir: None,
            model_dir: presence_core::default_model_dir(),
            verify_model_checksums: true,
            request_timeout_secs: 60,
            max_upload_bytes: 100 * 1024 * 1024,
            image_max_dim: 640,
            image_jpeg_quality: 85,
            liveness: LivenessConfig::default(),
            matcher: MatcherConfig::default(),
        }
    }
}

/// Face-match identifiers reported to clients plus the decision rule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub model: String,
    pub detector: String,
    pub distance_metric: DistanceMetric,
    /// Overrides the metric's default threshold.
    pub threshold: Option<f32>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            model: "SFace".to_string(),
            detector: "mediapipe-facemesh".to_string(),
            distance_metric: DistanceMetric::Cosine,
            threshold: None,
        }
    }
}

impl MatcherConfig {
    pub fn effective_threshold(&self) -> f32 {
        self.threshold
            .unwrap_or_else(|| self.distance_metric.default_threshold())
    }
}

impl Config {
    /// Load configuration from the file named by `PRESENCE_CONFIG` (if any)
    /// and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `PRESENCE_*` overrides. Unparseable values keep the current setting.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        self.listen_addr = env.parsed("PRESENCE_LISTEN_ADDR", self.listen_addr);
        if let Some(v) = env.get("PRESENCE_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(v);
        }
        if let Some(v) = env.get("PRESENCE_SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env.get("PRESENCE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.verify_model_checksums = env.flag("PRESENCE_VERIFY_MODEL_CHECKSUMS", self.verify_model_checksums);
        self.request_timeout_secs = env.parsed("PRESENCE_REQUEST_TIMEOUT_SECS", self.request_timeout_secs);
        self.max_upload_bytes = env.parsed("PRESENCE_MAX_UPLOAD_BYTES", self.max_upload_bytes);
        self.image_max_dim = env.parsed("PRESENCE_IMAGE_MAX_DIM", self.image_max_dim);
        self.image_jpeg_quality = env.parsed("PRESENCE_IMAGE_JPEG_QUALITY", self.image_jpeg_quality);

        let l = &mut self.liveness;
        l.enabled = env.flag("PRESENCE_LIVENESS_ENABLED", l.enabled);
        l.ear_threshold = env.parsed("PRESENCE_EAR_THRESHOLD", l.ear_threshold);
        l.blink_min_frames = env.parsed("PRESENCE_BLINK_MIN_FRAMES", l.blink_min_frames);
        l.blink_max_frames = env.parsed("PRESENCE_BLINK_MAX_FRAMES", l.blink_max_frames);
        l.min_blinks_required = env.parsed("PRESENCE_MIN_BLINKS_REQUIRED", l.min_blinks_required);
        l.motion_range_threshold = env.parsed("PRESENCE_MOTION_RANGE_THRESHOLD", l.motion_range_threshold);
        l.motion_min_samples = env.parsed("PRESENCE_MOTION_MIN_SAMPLES", l.motion_min_samples);
        l.audio_rms_threshold = env.parsed("PRESENCE_AUDIO_RMS_THRESHOLD", l.audio_rms_threshold);
        l.audio_duration_secs = env.parsed("PRESENCE_AUDIO_DURATION_SECS", l.audio_duration_secs);
        l.max_frames = env.parsed("PRESENCE_MAX_FRAMES", l.max_frames);
        l.max_frame_pixels = env.parsed("PRESENCE_MAX_FRAME_PIXELS", l.max_frame_pixels);
        l.require_audio = env.flag("PRESENCE_REQUIRE_AUDIO", l.require_audio);
        l.bypass_when_unavailable = env.flag("PRESENCE_BYPASS_WHEN_UNAVAILABLE", l.bypass_when_unavailable);
        l.allow_missing_video = env.flag("PRESENCE_ALLOW_MISSING_VIDEO", l.allow_missing_video);

        let m = &mut self.matcher;
        if let Some(v) = env.get("PRESENCE_MATCH_MODEL") {
            m.model = v;
        }
        if let Some(v) = env.get("PRESENCE_MATCH_DETECTOR") {
            m.detector = v;
        }
        m.distance_metric = env.parsed("PRESENCE_MATCH_DISTANCE_METRIC", m.distance_metric);
        if env.get("PRESENCE_MATCH_THRESHOLD").is_some() {
            m.threshold = Some(env.parsed("PRESENCE_MATCH_THRESHOLD", m.effective_threshold()));
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Path to the face mesh landmark model.
    pub fn face_mesh_model_path(&self) -> String {
        self.model_dir
            .join(presence_models::FACE_MESH.name)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the SFace recognition model.
    pub fn sface_model_path(&self) -> String {
        self.model_dir
            .join(presence_models::SFACE.name)
            .to_string_lossy()
            .into_owned()
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T>(&self, key: &str, current: T) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(raw) = self.get(key) else {
            return current;
        };
        match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "ignoring unparseable override");
                current
            }
        }
    }

    /// `0`, `false`, `no` and `off` disable; any other value enables.
    fn flag(&self, key: &str, current: bool) -> bool {
        match self.get(key) {
            Some(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"),
            None => current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 8000);
        assert_eq!(config.storage_root, PathBuf::from("user_verification_data_verified"));
        assert_eq!(config.liveness.max_frames, 75);
        assert!(!config.liveness.require_audio);
        assert_eq!(config.matcher.model, "SFace");
        assert!((config.matcher.effective_threshold() - 0.593).abs() < 1e-6);
    }

    #[test]
    fn test_toml_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.toml");
        std::fs::write(
            &path,
            r#"
listen_addr = "127.0.0.1:9000"
storage_root = "/srv/presence"

[liveness]
require_audio = true
max_frames = 40

[matcher]
distance_metric = "euclidean_l2"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.storage_root, PathBuf::from("/srv/presence"));
        assert!(config.liveness.require_audio);
        assert_eq!(config.liveness.max_frames, 40);
        // Untouched keys keep their defaults.
        assert_eq!(config.liveness.ear_threshold, 0.20);
        assert_eq!(config.image_max_dim, 640);
        assert_eq!(config.matcher.distance_metric, DistanceMetric::EuclideanL2);
        assert!((config.matcher.effective_threshold() - 1.055).abs() < 1e-6);
    }

    #[test]
    fn test_toml_rejects_bad_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.toml");
        std::fs::write(&path, "request_timeout_secs = \"soon\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/presence.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("PRESENCE_LISTEN_ADDR", "127.0.0.1:8081"),
            ("PRESENCE_STORAGE_ROOT", "/data/verified"),
            ("PRESENCE_EAR_THRESHOLD", "0.22"),
            ("PRESENCE_MAX_FRAMES", "30"),
            ("PRESENCE_MAX_FRAME_PIXELS", "921600"),
            ("PRESENCE_REQUIRE_AUDIO", "1"),
            ("PRESENCE_BYPASS_WHEN_UNAVAILABLE", "false"),
            ("PRESENCE_MATCH_DISTANCE_METRIC", "euclidean"),
            ("PRESENCE_MATCH_THRESHOLD", "0.5"),
        ]));

        assert_eq!(config.listen_addr.port(), 8081);
        assert_eq!(config.storage_root, PathBuf::from("/data/verified"));
        assert_eq!(config.liveness.ear_threshold, 0.22);
        assert_eq!(config.liveness.max_frames, 30);
        assert_eq!(config.liveness.max_frame_pixels, 921_600);
        assert!(config.liveness.require_audio);
        assert!(!config.liveness.bypass_when_unavailable);
        assert_eq!(config.matcher.distance_metric, DistanceMetric::Euclidean);
        assert_eq!(config.matcher.effective_threshold(), 0.5);
    }

    #[test]
    fn test_env_unparseable_keeps_current() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("PRESENCE_MAX_FRAMES", "lots"),
            ("PRESENCE_MATCH_DISTANCE_METRIC", "manhattan"),
            ("PRESENCE_MODEL_DIR", "  "),
        ]));

        assert_eq!(config.liveness.max_frames, 75);
        assert_eq!(config.matcher.distance_metric, DistanceMetric::Cosine);
        assert_eq!(config.model_dir, Config::default().model_dir);
    }

    #[test]
    fn test_model_paths() {
        let config = Config {
            model_dir: PathBuf::from("/models"),
            ..Config::default()
        };
        assert_eq!(config.face_mesh_model_path(), "/models/face_landmark.onnx");
        assert_eq!(config.sface_model_path(), "/models/face_recognition_sface_2021dec.onnx");
    }
}
