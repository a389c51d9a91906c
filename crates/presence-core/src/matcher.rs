//! Face-match verdicts, distance metrics and the matcher seam.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::landmarks::LandmarkError;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("no face detected in {}", .image.display())]
    NoFace { image: PathBuf },
    #[error("failed to read image {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face locator failed: {0}")]
    Locator(#[from] LandmarkError),
    #[error("failed to load matcher model: {0}")]
    Model(String),
    #[error("embedding inference failed: {0}")]
    Inference(String),
    #[error("embedding dimensions differ ({0} vs {1})")]
    DimensionMismatch(usize, usize),
}

/// How two embeddings are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }

    /// Decision threshold tuned for SFace embeddings under this metric.
    pub fn default_threshold(self) -> f32 {
        match self {
            DistanceMetric::Cosine => 0.593,
            DistanceMetric::Euclidean => 10.734,
            DistanceMetric::EuclideanL2 => 1.055,
        }
    }

    /// Distance between two equal-length embeddings; smaller is more similar.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = l2_norm(a);
                let norm_b = l2_norm(b);
                if norm_a == 0.0 || norm_b == 0.0 {
                    // Undefined angle: report the maximum cosine distance.
                    return 2.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
            DistanceMetric::Euclidean => euclidean(a.iter().copied(), b.iter().copied()),
            DistanceMetric::EuclideanL2 => {
                let norm_a = l2_norm(a);
                let norm_b = l2_norm(b);
                let scale = |n: f32| if n == 0.0 { 0.0 } else { 1.0 / n };
                let (sa, sb) = (scale(norm_a), scale(norm_b));
                euclidean(a.iter().map(|x| x * sa), b.iter().map(|y| y * sb))
            }
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "euclidean_l2" => Ok(DistanceMetric::EuclideanL2),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn euclidean(a: impl Iterator<Item = f32>, b: impl Iterator<Item = f32>) -> f32 {
    a.zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// Outcome of one reference/probe comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchVerdict {
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
}

impl MatchVerdict {
    /// Verified when the distance does not exceed the threshold.
    pub fn from_distance(distance: f32, threshold: f32) -> Self {
        Self {
            verified: distance <= threshold,
            distance,
            threshold,
        }
    }
}

/// Compares the face in a reference image with the face in a probe image.
pub trait FaceMatcher: Send {
    fn verify(&mut self, reference: &Path, probe: &Path) -> Result<MatchVerdict, MatchError>;
}
