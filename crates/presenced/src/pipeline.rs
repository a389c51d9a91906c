//! The verification state machine.
//!
//! validate → stage → preprocess → liveness → face match → commit.
//! Every rejection before commit drops the staging area, so nothing reaches
//! permanent storage unless liveness passed and the faces matched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use presence_core::preprocess::resize_image;
use presence_core::{LivenessError, LivenessOutcome, LivenessVerdict, MatchError};
use serde::Serialize;
use tracing::Instrument;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::error::VerifyError;
use crate::staging::{
    file_extension, sanitize_foldername, user_folder_name, ArtifactKind, PermanentStore, Role, SavedFilePaths,
    StagingArea, ALLOWED_IMAGE_EXTENSIONS,
};

/// Roles whose images are downscaled before matching.
const PREPROCESSED: [Role; 2] = [Role::IdCardFront, Role::Selfie];

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Bytes,
}

/// Parsed form of one `POST /verify`.
#[derive(Debug, Default)]
pub struct VerificationRequest {
    pub user_identifier: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub uploads: BTreeMap<Role, Upload>,
}

#[derive(Debug, Serialize)]
pub struct LivenessSummary {
    pub blink_count: u32,
    pub head_moved: bool,
    pub audio_present: bool,
    pub outcome: LivenessOutcome,
}

impl From<&LivenessVerdict> for LivenessSummary {
    fn from(v: &LivenessVerdict) -> Self {
        Self {
            blink_count: v.blink_count,
            head_moved: v.head_moved,
            audio_present: v.audio_present,
            outcome: v.outcome,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationSuccess {
    pub status: &'static str,
    pub verified: bool,
    pub distance: f64,
    pub threshold: f64,
    pub model: String,
    pub detector: String,
    pub distance_metric: &'static str,
    pub liveness: LivenessSummary,
    pub saved_file_paths: SavedFilePaths,
}

pub struct VerificationPipeline {
    config: Arc<Config>,
    engine: EngineHandle,
    store: PermanentStore,
}

impl VerificationPipeline {
    pub fn new(config: Arc<Config>, engine: EngineHandle, store: PermanentStore) -> Self {
        Self { config, engine, store }
    }

    /// Run one request to its terminal outcome.
    pub async fn verify(&self, request: VerificationRequest) -> Result<VerificationSuccess, VerifyError> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("verify", request_id = %request_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: VerificationRequest) -> Result<VerificationSuccess, VerifyError> {
        let VerificationRequest {
            user_identifier,
            first_name,
            last_name,
            uploads,
        } = request;
        tracing::info!(
            user_identifier = user_identifier.as_deref().unwrap_or(""),
            first_name = first_name.as_deref().unwrap_or(""),
            last_name = last_name.as_deref().unwrap_or(""),
            uploads = uploads.len(),
            "verification requested"
        );

        let uploads = validate_uploads(uploads)?;
        let identifier = user_identifier
            .as_deref()
            .map(|id| sanitize_foldername(id.trim()))
            .filter(|s| !s.is_empty())
            .ok_or(VerifyError::MissingUserIdentifier)?;

        // Staging and preprocessing touch the disk; keep them off the runtime.
        let scratch_parent = self.config.scratch_dir.clone();
        let area = tokio::task::spawn_blocking(move || -> Result<StagingArea, VerifyError> {
            let mut area = StagingArea::new(scratch_parent.as_deref())?;
            for (role, upload) in &uploads {
                area.stage(*role, &upload.filename, &upload.bytes)?;
            }
            area.begin_evaluation()?;
            Ok(area)
        })
        .await
        .map_err(|e| VerifyError::Task(e.to_string()))??;
        tracing::debug!(scratch = %area.root().display(), state = ?area.state(), "uploads staged");

        let targets: Vec<(Role, PathBuf)> = PREPROCESSED
            .into_iter()
            .filter_map(|role| area.path(role).map(|p| (role, p.to_path_buf())))
            .collect();
        let (max_dim, quality) = (self.config.image_max_dim, self.config.image_jpeg_quality);
        let preprocessed = tokio::task::spawn_blocking(move || preprocess(&targets, max_dim, quality))
            .await
            .map_err(|e| VerifyError::Task(e.to_string()))?;
        if let Err(e) = preprocessed {
            area.discard();
            return Err(e);
        }

        let liveness = match self.check_liveness(&area).await {
            Ok(verdict) => verdict,
            Err(e) => {
                area.discard();
                return Err(e);
            }
        };

        let matched = match self.match_faces(&area).await {
            Ok(verdict) => verdict,
            Err(e) => {
                area.discard();
                return Err(e);
            }
        };

        let folder = user_folder_name(first_name.as_deref(), last_name.as_deref(), &identifier);
        let store = self.store.clone();
        let saved = tokio::task::spawn_blocking({
            let liveness = liveness.clone();
            move || area.commit(&store, &folder, &liveness, &matched)
        })
        .await
        .map_err(|e| VerifyError::Task(e.to_string()))??;

        tracing::info!(
            distance = matched.distance,
            threshold = matched.threshold,
            files = saved.len(),
            "verification succeeded"
        );
        Ok(VerificationSuccess {
            status: "success",
            verified: true,
            distance: round4(matched.distance),
            threshold: round4(matched.threshold),
            model: self.config.matcher.model.clone(),
            detector: self.config.matcher.detector.clone(),
            distance_metric: self.config.matcher.distance_metric.as_str(),
            liveness: LivenessSummary::from(&liveness),
            saved_file_paths: saved,
        })
    }

    async fn check_liveness(&self, area: &StagingArea) -> Result<LivenessVerdict, VerifyError> {
        let video = area.path(Role::VideoSelfie).map(Path::to_path_buf);
        let verdict = match self.engine.evaluate_liveness(video).await {
            Ok(verdict) => verdict,
            Err(e @ EngineError::Liveness(LivenessError::VideoOpen { .. })) => {
                tracing::error!(error = %e, "selfie video could not be opened");
                return Err(VerifyError::LivenessVideoUnreadable(e));
            }
            Err(e) => return Err(VerifyError::Engine(e)),
        };

        if verdict.outcome.is_bypass() {
            tracing::warn!(bypass = ?verdict.outcome, "liveness bypassed by policy");
        }
        if !verdict.passed {
            tracing::info!(
                blink_count = verdict.blink_count,
                head_moved = verdict.head_moved,
                audio_present = verdict.audio_present,
                outcome = ?verdict.outcome,
                "liveness failed"
            );
            return Err(VerifyError::LivenessFailed(verdict));
        }
        Ok(verdict)
    }

    async fn match_faces(&self, area: &StagingArea) -> Result<presence_core::MatchVerdict, VerifyError> {
        let reference = area
            .path(Role::IdCardFront)
            .ok_or(VerifyError::MissingImagePath(Role::IdCardFront))?
            .to_path_buf();
        let probe = area
            .path(Role::Selfie)
            .ok_or(VerifyError::MissingImagePath(Role::Selfie))?
            .to_path_buf();

        let verdict = match self.engine.match_faces(reference, probe).await {
            Ok(verdict) => verdict,
            Err(EngineError::Match(e @ MatchError::NoFace { .. })) => return Err(VerifyError::NoFace(e)),
            Err(e) => return Err(VerifyError::Engine(e)),
        };
        tracing::info!(
            verified = verdict.verified,
            distance = verdict.distance,
            threshold = verdict.threshold,
            "face match evaluated"
        );
        if !verdict.verified {
            return Err(VerifyError::FacesDoNotMatch(verdict));
        }
        Ok(verdict)
    }
}

/// Drop nameless parts, require the image roles and check their extensions.
fn validate_uploads(mut uploads: BTreeMap<Role, Upload>) -> Result<BTreeMap<Role, Upload>, VerifyError> {
    uploads.retain(|role, upload| {
        let named = !upload.filename.trim().is_empty();
        if !named {
            tracing::warn!(role = %role, "upload has no filename; skipping");
        }
        named
    });

    let missing: Vec<Role> = Role::REQUIRED
        .into_iter()
        .filter(|r| !uploads.contains_key(r))
        .collect();
    if !missing.is_empty() {
        return Err(VerifyError::MissingImageFiles(missing));
    }

    for (role, upload) in &uploads {
        if role.kind() != ArtifactKind::Image {
            continue;
        }
        let ext = file_extension(&upload.filename);
        if !ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(VerifyError::InvalidImageFileType {
                role: *role,
                filename: upload.filename.clone(),
            });
        }
    }
    Ok(uploads)
}

fn preprocess(targets: &[(Role, PathBuf)], max_dim: u32, quality: u8) -> Result<(), VerifyError> {
    for (role, path) in targets {
        let (w, h) = resize_image(path, max_dim, quality).map_err(|source| VerifyError::ImageProcessing {
            role: *role,
            source,
        })?;
        tracing::debug!(role = %role, width = w, height = h, "image preprocessed");
    }
    Ok(())
}

fn round4(value: f32) -> f64 {
    (f64::from(value) * 10_000.0).round() / 10_000.0
}
