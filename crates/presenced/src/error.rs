//! Request-level errors and their wire form.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use presence_core::preprocess::PreprocessError;
use presence_core::{LivenessVerdict, MatchError, MatchVerdict};
use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;
use crate::staging::{CommitError, Role, StagingError};

/// Stable machine-readable rejection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingImageFiles,
    MissingUserIdentifier,
    InvalidImageFileType,
    ImageProcessingError,
    LivenessFailed,
    VerificationFailed,
    FileSaveError,
    InternalErrorMissingImagePaths,
    VerificationError,
    InvalidRequest,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingImageFiles => "MISSING_IMAGE_FILES",
            ErrorCode::MissingUserIdentifier => "MISSING_USER_IDENTIFIER",
            ErrorCode::InvalidImageFileType => "INVALID_IMAGE_FILE_TYPE",
            ErrorCode::ImageProcessingError => "IMAGE_PROCESSING_ERROR",
            ErrorCode::LivenessFailed => "LIVENESS_FAILED",
            ErrorCode::VerificationFailed => "VERIFICATION_FAILED",
            ErrorCode::FileSaveError => "FILE_SAVE_ERROR",
            ErrorCode::InternalErrorMissingImagePaths => "INTERNAL_ERROR_MISSING_IMAGE_PATHS",
            ErrorCode::VerificationError => "VERIFICATION_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::FileSaveError
            | ErrorCode::InternalErrorMissingImagePaths
            | ErrorCode::VerificationError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Terminal rejection of one verification request.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("required images missing: {0:?}")]
    MissingImageFiles(Vec<Role>),
    #[error("user identifier missing or empty after sanitising")]
    MissingUserIdentifier,
    #[error("invalid image file type for {role}: {filename:?}")]
    InvalidImageFileType { role: Role, filename: String },
    #[error("preprocessing {role} failed: {source}")]
    ImageProcessing {
        role: Role,
        #[source]
        source: PreprocessError,
    },
    #[error("liveness criteria not met: {0:?}")]
    LivenessFailed(LivenessVerdict),
    #[error("selfie video unreadable: {0}")]
    LivenessVideoUnreadable(#[source] EngineError),
    #[error("faces do not match: {0:?}")]
    FacesDoNotMatch(MatchVerdict),
    #[error("no face found: {0}")]
    NoFace(#[source] MatchError),
    #[error("failed to stage upload: {0}")]
    Staging(#[from] StagingError),
    #[error("failed to commit: {0}")]
    Commit(#[from] CommitError),
    #[error("staged path for {0} missing at match time")]
    MissingImagePath(Role),
    #[error("verification engine failure: {0}")]
    Engine(#[source] EngineError),
    #[error("background task failed: {0}")]
    Task(String),
    #[error("malformed request: {0}")]
    InvalidRequest(String),
}

impl VerifyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            VerifyError::MissingImageFiles(_) => ErrorCode::MissingImageFiles,
            VerifyError::MissingUserIdentifier => ErrorCode::MissingUserIdentifier,
            VerifyError::InvalidImageFileType { .. } => ErrorCode::InvalidImageFileType,
            VerifyError::ImageProcessing { .. } => ErrorCode::ImageProcessingError,
            VerifyError::LivenessFailed(_) | VerifyError::LivenessVideoUnreadable(_) => ErrorCode::LivenessFailed,
            VerifyError::FacesDoNotMatch(_) | VerifyError::NoFace(_) => ErrorCode::VerificationFailed,
            VerifyError::Staging(StagingError::InvalidImageType { .. }) => ErrorCode::InvalidImageFileType,
            VerifyError::Staging(StagingError::MissingRequired(_)) => ErrorCode::MissingImageFiles,
            VerifyError::Staging(_) | VerifyError::Commit(_) => ErrorCode::FileSaveError,
            VerifyError::MissingImagePath(_) => ErrorCode::InternalErrorMissingImagePaths,
            VerifyError::Engine(_) | VerifyError::Task(_) => ErrorCode::VerificationError,
            VerifyError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    /// Client-facing message. Never includes internal error detail.
    pub fn public_message(&self) -> String {
        match self {
            VerifyError::MissingImageFiles(_) | VerifyError::Staging(StagingError::MissingRequired(_)) => {
                "One or more required images (idCardFront, idCardBack, selfie) are missing.".to_string()
            }
            VerifyError::MissingUserIdentifier => "A valid user_identifier is required.".to_string(),
            VerifyError::InvalidImageFileType { role, .. }
            | VerifyError::Staging(StagingError::InvalidImageType { role, .. }) => {
                format!("Invalid file type for image {role}.")
            }
            VerifyError::ImageProcessing { role, .. } => format!("Failed to process image {role}."),
            VerifyError::LivenessFailed(_) => "Liveness check failed.".to_string(),
            VerifyError::LivenessVideoUnreadable(_) => {
                "Liveness check failed: the selfie video could not be read.".to_string()
            }
            VerifyError::FacesDoNotMatch(_) => "The faces do not match.".to_string(),
            VerifyError::NoFace(_) => "No face was found in one of the images.".to_string(),
            VerifyError::Staging(_) | VerifyError::Commit(_) => "Failed to save the uploaded files.".to_string(),
            VerifyError::MissingImagePath(_) => "Internal error: staged image paths are missing.".to_string(),
            VerifyError::Engine(EngineError::Liveness(_)) => "Server error while checking liveness.".to_string(),
            VerifyError::Engine(_) | VerifyError::Task(_) => "Server error while comparing faces.".to_string(),
            VerifyError::InvalidRequest(_) => "The request body could not be parsed.".to_string(),
        }
    }

    /// Offending multipart field, when there is one.
    pub fn field(&self) -> Option<Role> {
        match self {
            VerifyError::InvalidImageFileType { role, .. }
            | VerifyError::ImageProcessing { role, .. }
            | VerifyError::Staging(StagingError::InvalidImageType { role, .. })
            | VerifyError::Staging(StagingError::Write { role, .. })
            | VerifyError::MissingImagePath(role) => Some(*role),
            _ => None,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            status: "error",
            code: self.code(),
            message: self.public_message(),
            field: self.field().map(Role::field_name),
        }
    }
}

/// `{status:"error", code, message, field?}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code().as_str(), error = %self, "verification aborted");
        } else {
            tracing::info!(code = self.code().as_str(), reason = %self, "verification rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings_match_serde() {
        for code in [
            ErrorCode::MissingImageFiles,
            ErrorCode::InternalErrorMissingImagePaths,
            ErrorCode::VerificationError,
            ErrorCode::InvalidRequest,
        ] {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, code.as_str());
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(VerifyError::MissingImageFiles(vec![Role::Selfie]).status(), StatusCode::BAD_REQUEST);
        assert_eq!(VerifyError::MissingUserIdentifier.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            VerifyError::MissingImagePath(Role::Selfie).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            VerifyError::Engine(EngineError::ChannelClosed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            VerifyError::Commit(CommitError::NotVerified { liveness: true, verified: false }).code(),
            ErrorCode::FileSaveError
        );
    }

    #[test]
    fn test_staging_errors_map_to_input_codes() {
        let err = VerifyError::from(StagingError::InvalidImageType {
            role: Role::IdCardBack,
            filename: "b.bmp".into(),
        });
        assert_eq!(err.code(), ErrorCode::InvalidImageFileType);
        assert_eq!(err.field(), Some(Role::IdCardBack));

        let err = VerifyError::from(StagingError::MissingRequired(vec![Role::Selfie]));
        assert_eq!(err.code(), ErrorCode::MissingImageFiles);
    }

    #[test]
    fn test_body_hides_internal_detail() {
        let err = VerifyError::Task("panicked at src/secret.rs:12".into());
        let body = serde_json::to_value(err.body()).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], "VERIFICATION_ERROR");
        assert!(body.get("field").is_none());
        assert!(!body["message"].as_str().unwrap().contains("secret"));
    }

    #[test]
    fn test_body_carries_field() {
        let err = VerifyError::InvalidImageFileType {
            role: Role::IdCardFront,
            filename: "x.gif".into(),
        };
        let body = serde_json::to_value(err.body()).unwrap();
        assert_eq!(body["field"], "idCardFront");
        assert_eq!(body["code"], "INVALID_IMAGE_FILE_TYPE");
    }

    #[test]
    fn test_liveness_engine_fault_has_own_message() {
        use presence_core::{LandmarkError, LivenessError};

        let err = VerifyError::Engine(EngineError::Liveness(LivenessError::Landmarks {
            frame: 12,
            source: LandmarkError::Inference("session poisoned".into()),
        }));
        assert_eq!(err.code(), ErrorCode::VerificationError);
        assert_eq!(err.public_message(), "Server error while checking liveness.");

        let err = VerifyError::Engine(EngineError::ChannelClosed);
        assert_eq!(err.public_message(), "Server error while comparing faces.");
    }
}
