//! Required ONNX models and their integrity check.
//!
//! Checksums are not compiled in. The operator ships a `SHA256SUMS` file in
//! `sha256sum` format next to the models, and every required model must be
//! listed there with a matching digest.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Model file descriptor: expected filename and what it is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFile {
    pub name: &'static str,
    pub purpose: &'static str,
}

/// MediaPipe face mesh (468 landmarks), exported to ONNX.
pub const FACE_MESH: ModelFile = ModelFile {
    name: "face_landmark.onnx",
    purpose: "face landmarks",
};

/// OpenCV Zoo SFace recognition model.
pub const SFACE: ModelFile = ModelFile {
    name: "face_recognition_sface_2021dec.onnx",
    purpose: "face embedding",
};

pub const MODELS: &[ModelFile] = &[FACE_MESH, SFACE];

/// Manifest filename inside the model directory.
pub const CHECKSUM_MANIFEST: &str = "SHA256SUMS";

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {name} ({path})")]
    MissingModel { name: &'static str, path: PathBuf },

    #[error("checksum manifest not found: {path}")]
    MissingManifest { path: PathBuf },

    #[error("{name} is not listed in {path}")]
    Unlisted { name: &'static str, path: PathBuf },

    #[error("malformed checksum manifest {path} at line {line}")]
    MalformedManifest { path: PathBuf, line: usize },

    #[error("failed to open file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "model checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Parse a `sha256sum`-style manifest into filename → lowercase digest.
///
/// Accepts both text (`<hex>  <name>`) and binary (`<hex> *<name>`) lines.
/// Blank lines and `#` comments are skipped.
pub fn read_manifest(path: &Path) -> Result<HashMap<String, String>, ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingManifest {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path).map_err(|source| ModelIntegrityError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries = HashMap::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = || ModelIntegrityError::MalformedManifest {
            path: path.to_path_buf(),
            line: i + 1,
        };
        let (digest, name) = line.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let name = name.trim_start();
        let name = name.strip_prefix('*').unwrap_or(name);
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) || name.is_empty() {
            return Err(malformed());
        }
        entries.insert(name.to_string(), digest.to_ascii_lowercase());
    }
    Ok(entries)
}

pub fn verify_file_sha256(
    name: &'static str,
    path: &Path,
    expected_sha256: &str,
) -> Result<(), ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            name,
            path: path.to_path_buf(),
        });
    }

    let digest = sha256_file_hex(path)?;
    if !digest.eq_ignore_ascii_case(expected_sha256) {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name,
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got: digest,
        });
    }

    Ok(())
}

/// Verify one model against an already parsed manifest.
pub fn verify_model(
    model_dir: &Path,
    model: &ModelFile,
    manifest: &HashMap<String, String>,
) -> Result<(), ModelIntegrityError> {
    let path = model_dir.join(model.name);
    let expected = manifest
        .get(model.name)
        .ok_or_else(|| ModelIntegrityError::Unlisted {
            name: model.name,
            path: model_dir.join(CHECKSUM_MANIFEST),
        })?;
    verify_file_sha256(model.name, &path, expected)
}

/// Verify every required model in `model_dir` against its manifest.
pub fn verify_models_dir(model_dir: &Path) -> Result<(), ModelIntegrityError> {
    let manifest = read_manifest(&model_dir.join(CHECKSUM_MANIFEST))?;
    for model in MODELS {
        verify_model(model_dir, model, &manifest)?;
    }

    Ok(())
}

/// Paths of the required models that are not present in `model_dir`.
pub fn missing_models(model_dir: &Path) -> Vec<PathBuf> {
    MODELS
        .iter()
        .map(|m| model_dir.join(m.name))
        .filter(|p| !p.exists())
        .collect()
}
