//! Request-scoped staging and all-or-nothing commit.
//!
//! Every upload of a request lands in a private scratch directory
//! ([`StagingArea`], a [`TempDir`] removed on drop). Only a request whose
//! liveness passed and whose faces matched is promoted into the permanent
//! tree by [`StagingArea::commit`]:
//!
//! ```text
//! <root>/.<folder>.partial-<uuid>/{photos,videos}/...   copy phase
//! <root>/<folder>/{photos,videos}/<role>_<ts><ext>      link phase
//! ```
//!
//! Files already in storage are never replaced: a taken name gets a numeric
//! suffix. A failure in either phase removes the files and directories this
//! request created, so permanent storage never holds a partial request.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use presence_core::{LivenessVerdict, MatchVerdict};
use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;

/// Extensions accepted for the image roles (lowercase, with dot).
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png"];

const SCRATCH_PREFIX: &str = "verification_temp_";

/// Suffixed names tried when a stored file already holds the staged name.
const MAX_NAME_ATTEMPTS: usize = 16;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("failed to create scratch area: {0}")]
    CreateScratch(#[source] std::io::Error),
    #[error("unsupported image type for {role}: {filename:?}")]
    InvalidImageType { role: Role, filename: String },
    #[error("failed to write staged {role}: {source}")]
    Write {
        role: Role,
        #[source]
        source: std::io::Error,
    },
    #[error("required uploads missing: {0:?}")]
    MissingRequired(Vec<Role>),
    #[error("staging area is {0:?}, expected {1:?}")]
    WrongState(StagingState, StagingState),
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("refusing to commit: liveness passed={liveness}, faces verified={verified}")]
    NotVerified { liveness: bool, verified: bool },
    #[error("staging area is {0:?}, expected Evaluating")]
    WrongState(StagingState),
    #[error("failed to prepare {}: {source}", .path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to copy {role} into storage: {source}")]
    Copy {
        role: Role,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to move {role} into place: {source}")]
    Promote {
        role: Role,
        #[source]
        source: std::io::Error,
    },
}

/// Logical upload slot. Wire names are the multipart field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    IdCardFront,
    IdCardBack,
    Selfie,
    VideoFrontId,
    VideoBackId,
    VideoSelfie,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::IdCardFront,
        Role::IdCardBack,
        Role::Selfie,
        Role::VideoFrontId,
        Role::VideoBackId,
        Role::VideoSelfie,
    ];

    /// Image roles every request must carry.
    pub const REQUIRED: [Role; 3] = [Role::IdCardFront, Role::IdCardBack, Role::Selfie];

    pub fn field_name(self) -> &'static str {
        match self {
            Role::IdCardFront => "idCardFront",
            Role::IdCardBack => "idCardBack",
            Role::Selfie => "selfie",
            Role::VideoFrontId => "video_front_id",
            Role::VideoBackId => "video_back_id",
            Role::VideoSelfie => "video_selfie",
        }
    }

    pub fn from_field(name: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.field_name() == name)
    }

    pub fn kind(self) -> ArtifactKind {
        match self {
            Role::IdCardFront | Role::IdCardBack | Role::Selfie => ArtifactKind::Image,
            Role::VideoFrontId | Role::VideoBackId | Role::VideoSelfie => ArtifactKind::Video,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Video,
}

impl ArtifactKind {
    /// Subdirectory of a user folder holding artifacts of this kind.
    pub fn subdir(self) -> &'static str {
        match self {
            ArtifactKind::Image => "photos",
            ArtifactKind::Video => "videos",
        }
    }
}

/// One upload written into the scratch area.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub role: Role,
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl StagedArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingState {
    Staging,
    Evaluating,
    Committed,
    Discarded,
}

/// Role → path relative to the storage root, forward slashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SavedFilePaths {
    pub photos: BTreeMap<String, String>,
    pub videos: BTreeMap<String, String>,
}

impl SavedFilePaths {
    pub fn len(&self) -> usize {
        self.photos.len() + self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, role: Role) -> Option<&str> {
        let map = match role.kind() {
            ArtifactKind::Image => &self.photos,
            ArtifactKind::Video => &self.videos,
        };
        map.get(role.field_name()).map(String::as_str)
    }
}

/// Request-scoped scratch directory and its staged artifacts.
pub struct StagingArea {
    dir: TempDir,
    timestamp: i64,
    artifacts: BTreeMap<Role, StagedArtifact>,
    state: StagingState,
}

impl StagingArea {
    /// Create a scratch directory under `parent` (system temp dir when `None`).
    pub fn new(parent: Option<&Path>) -> Result<Self, StagingError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(StagingError::CreateScratch)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(StagingError::CreateScratch)?;

        tracing::debug!(path = %dir.path().display(), "scratch area created");
        Ok(Self {
            dir,
            timestamp: chrono::Utc::now().timestamp(),
            artifacts: BTreeMap::new(),
            state: StagingState::Staging,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn state(&self) -> StagingState {
        self.state
    }

    /// Write one upload as `<role>_<timestamp><ext>`. Image roles must carry
    /// an allowed extension.
    pub fn stage(&mut self, role: Role, original_filename: &str, bytes: &[u8]) -> Result<&StagedArtifact, StagingError> {
        if self.state != StagingState::Staging {
            return Err(StagingError::WrongState(self.state, StagingState::Staging));
        }
        let ext = file_extension(original_filename);
        let kind = role.kind();
        if kind == ArtifactKind::Image && !ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(StagingError::InvalidImageType {
                role,
                filename: original_filename.to_string(),
            });
        }

        let path = self
            .dir
            .path()
            .join(format!("{}_{}{}", role.field_name(), self.timestamp, ext));
        fs::write(&path, bytes).map_err(|source| StagingError::Write { role, source })?;
        tracing::info!(role = %role, bytes = bytes.len(), path = %path.display(), "staged upload");

        let artifact = StagedArtifact { role, path, kind };
        self.artifacts.insert(role, artifact);
        Ok(&self.artifacts[&role])
    }

    /// Close staging. Every required image role must be present.
    pub fn begin_evaluation(&mut self) -> Result<(), StagingError> {
        if self.state != StagingState::Staging {
            return Err(StagingError::WrongState(self.state, StagingState::Staging));
        }
        let missing: Vec<Role> = Role::REQUIRED
            .into_iter()
            .filter(|r| !self.artifacts.contains_key(r))
            .collect();
        if !missing.is_empty() {
            return Err(StagingError::MissingRequired(missing));
        }
        self.state = StagingState::Evaluating;
        Ok(())
    }

    pub fn path(&self, role: Role) -> Option<&Path> {
        self.artifacts.get(&role).map(|a| a.path.as_path())
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &StagedArtifact> {
        self.artifacts.values()
    }

    /// Promote every staged artifact into `store` under `folder`.
    ///
    /// Refuses unless both verdicts are positive. The scratch area is
    /// removed when this returns, whatever the outcome.
    pub fn commit(
        mut self,
        store: &PermanentStore,
        folder: &str,
        liveness: &LivenessVerdict,
        matched: &MatchVerdict,
    ) -> Result<SavedFilePaths, CommitError> {
        if self.state != StagingState::Evaluating {
            return Err(CommitError::WrongState(self.state));
        }
        if !(liveness.passed && matched.verified) {
            return Err(CommitError::NotVerified {
                liveness: liveness.passed,
                verified: matched.verified,
            });
        }
        let artifacts: Vec<StagedArtifact> = self.artifacts.values().cloned().collect();
        let saved = store.promote(folder, &artifacts)?;
        self.state = StagingState::Committed;
        tracing::info!(folder, files = saved.len(), "request committed");
        Ok(saved)
    }

    /// Tear down the scratch area without touching permanent storage.
    pub fn discard(mut self) {
        self.state = StagingState::Discarded;
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch area");
        } else {
            tracing::debug!(path = %path.display(), "scratch area discarded");
        }
    }
}

/// Permanent per-user storage tree.
#[derive(Debug, Clone)]
pub struct PermanentStore {
    root: PathBuf,
}

impl PermanentStore {
    /// Open (creating if absent) the storage root.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Copy `artifacts` into a hidden partial directory, then link each
    /// into `<root>/<folder>/<subdir>/`. Either every file lands or none.
    pub fn promote(&self, folder: &str, artifacts: &[StagedArtifact]) -> Result<SavedFilePaths, CommitError> {
        let partial = self
            .root
            .join(format!(".{folder}.partial-{}", uuid::Uuid::new_v4()));
        let result = self.promote_via(&partial, folder, artifacts);
        if partial.exists() {
            if let Err(e) = fs::remove_dir_all(&partial) {
                tracing::warn!(path = %partial.display(), error = %e, "failed to remove partial commit directory");
            }
        }
        result
    }

    fn promote_via(&self, partial: &Path, folder: &str, artifacts: &[StagedArtifact]) -> Result<SavedFilePaths, CommitError> {
        let prepare = |path: PathBuf| {
            fs::create_dir_all(&path).map_err(|source| CommitError::Prepare { path, source })
        };

        // Copy phase: nothing visible under <folder> yet.
        let mut copied = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let dir = partial.join(artifact.kind.subdir());
            prepare(dir.clone())?;
            let name = artifact.file_name();
            let tmp = dir.join(&name);
            fs::copy(&artifact.path, &tmp).map_err(|source| CommitError::Copy {
                role: artifact.role,
                source,
            })?;
            copied.push((artifact, name, tmp));
        }

        // Link phase: each file is hard-linked under a name nothing holds yet,
        // so an earlier commit into the same folder is never replaced.
        let user_dir = self.root.join(folder);
        let mut placed = Placed::default();
        let mut dirs = vec![user_dir.clone()];
        for (artifact, _, _) in &copied {
            let dir = user_dir.join(artifact.kind.subdir());
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        for dir in dirs {
            if let Err(e) = placed.create_dir(dir) {
                placed.roll_back();
                return Err(e);
            }
        }

        let mut saved = SavedFilePaths::default();
        for (artifact, name, tmp) in copied {
            let subdir = artifact.kind.subdir();
            let dir = user_dir.join(subdir);
            let name = match link_unused_name(&tmp, &dir, &name) {
                Ok(name) => name,
                Err(source) => {
                    placed.roll_back();
                    return Err(CommitError::Promote {
                        role: artifact.role,
                        source,
                    });
                }
            };
            placed.files.push(dir.join(&name));

            let relative = format!("{folder}/{subdir}/{name}");
            let map = match artifact.kind {
                ArtifactKind::Image => &mut saved.photos,
                ArtifactKind::Video => &mut saved.videos,
            };
            map.insert(artifact.role.field_name().to_string(), relative);
        }

        Ok(saved)
    }
}

/// Entries one promotion created under the user folder.
#[derive(Default)]
struct Placed {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Placed {
    fn create_dir(&mut self, path: PathBuf) -> Result<(), CommitError> {
        match fs::create_dir(&path) {
            Ok(()) => {
                self.dirs.push(path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
            Err(source) => Err(CommitError::Prepare { path, source }),
        }
    }

    fn roll_back(self) {
        for path in &self.files {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to roll back committed file");
            }
        }
        for path in self.dirs.iter().rev() {
            if let Err(e) = fs::remove_dir(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to roll back storage directory");
            }
        }
    }
}

/// Hard-link `tmp` into `dir` as `name`, or as `<stem>-<n><ext>` when that
/// name is taken. Returns the name used.
fn link_unused_name(tmp: &Path, dir: &Path, name: &str) -> std::io::Result<String> {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            name.to_string()
        } else {
            format!("{stem}-{attempt}{ext}")
        };
        match fs::hard_link(tmp, dir.join(&candidate)) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free name for {name} after {MAX_NAME_ATTEMPTS} attempts"),
    ))
}

/// Keep alphanumerics, `_` and `-`; spaces become `_`; everything else is dropped.
pub fn sanitize_foldername(part: &str) -> String {
    part.replace(' ', "_")
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Deterministic per-user folder: sanitised first name, last name and
/// identifier joined by `_`, empty parts skipped.
pub fn user_folder_name(first_name: Option<&str>, last_name: Option<&str>, identifier: &str) -> String {
    let identifier = sanitize_foldername(identifier);
    let parts: Vec<String> = [first_name, last_name]
        .into_iter()
        .flatten()
        .map(sanitize_foldername)
        .chain(std::iter::once(identifier.clone()))
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        format!("user_{identifier}")
    } else {
        parts.join("_")
    }
}

/// Lowercased extension with leading dot, or empty.
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}
