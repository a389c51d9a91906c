//! SFace face matcher on ONNX Runtime.
//!
//! Each image is decoded, the face is located with the face mesh, the
//! landmark bounding box (plus a margin) is cropped and resized to 112×112,
//! and the SFace network produces a 128-d embedding. Embeddings are compared
//! with the configured [`DistanceMetric`].

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::landmarks::LandmarkSet;
use crate::matcher::{DistanceMetric, FaceMatcher, MatchError, MatchVerdict};
use crate::mesh::OnnxFaceMesh;

const INPUT_SIZE: u32 = 112;

/// Fraction of the landmark box added on every side before cropping.
const CROP_MARGIN: f32 = 0.10;

pub struct SFaceMatcher {
    locator: OnnxFaceMesh,
    session: Session,
    metric: DistanceMetric,
    threshold: f32,
}

impl SFaceMatcher {
    /// Load the locator and embedding models. `threshold` overrides the
    /// metric's default decision threshold.
    pub fn load(
        locator_path: &str,
        model_path: &str,
        metric: DistanceMetric,
        threshold: Option<f32>,
    ) -> Result<Self, MatchError> {
        let locator = OnnxFaceMesh::load(locator_path)?;
        let builder = Session::builder().map_err(|e| MatchError::Model(e.to_string()))?;
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| MatchError::Model(format!("{model_path}: {e}")))?;
        let threshold = threshold.unwrap_or_else(|| metric.default_threshold());
        tracing::info!(
            path = model_path,
            metric = metric.as_str(),
            threshold,
            "SFace matcher loaded"
        );
        Ok(Self {
            locator,
            session,
            metric,
            threshold,
        })
    }

    /// Extract the face embedding of one image file.
    pub fn embed(&mut self, image_path: &Path) -> Result<Vec<f32>, MatchError> {
        let image = image::open(image_path)
            .map_err(|source| MatchError::Image {
                path: image_path.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let no_face = || MatchError::NoFace {
            image: image_path.to_path_buf(),
        };
        let landmarks = self.locator.detect(&image)?.ok_or_else(no_face)?;
        let face = crop_face(&image, &landmarks).ok_or_else(no_face)?;
        let face = imageops::resize(&face, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        let side = INPUT_SIZE as usize;
        let input = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            f32::from(face.get_pixel(x as u32, y as u32)[c])
        });
        let tensor = Tensor::from_array(input).map_err(|e| MatchError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| MatchError::Inference(e.to_string()))?;
        let (_, embedding) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| MatchError::Inference(e.to_string()))?;

        Ok(embedding.to_vec())
    }
}

impl FaceMatcher for SFaceMatcher {
    fn verify(&mut self, reference: &Path, probe: &Path) -> Result<MatchVerdict, MatchError> {
        let reference_embedding = self.embed(reference)?;
        let probe_embedding = self.embed(probe)?;
        if reference_embedding.len() != probe_embedding.len() {
            return Err(MatchError::DimensionMismatch(
                reference_embedding.len(),
                probe_embedding.len(),
            ));
        }

        let distance = self.metric.distance(&reference_embedding, &probe_embedding);
        let verdict = MatchVerdict::from_distance(distance, self.threshold);
        tracing::info!(
            distance,
            threshold = self.threshold,
            verified = verdict.verified,
            "faces compared"
        );
        Ok(verdict)
    }
}

/// Pixel rectangle `(x, y, width, height)` around the landmarks, expanded by
/// [`CROP_MARGIN`] and clamped to the image. `None` if it collapses.
fn face_box(landmarks: &LandmarkSet, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let (lo, hi) = landmarks.bounds()?;
    let (w, h) = (width as f32, height as f32);
    let box_w = (hi.x - lo.x) * w;
    let box_h = (hi.y - lo.y) * h;

    let x0 = (lo.x * w - box_w * CROP_MARGIN).clamp(0.0, w);
    let y0 = (lo.y * h - box_h * CROP_MARGIN).clamp(0.0, h);
    let x1 = (hi.x * w + box_w * CROP_MARGIN).clamp(0.0, w);
    let y1 = (hi.y * h + box_h * CROP_MARGIN).clamp(0.0, h);

    let (x, y) = (x0.floor() as u32, y0.floor() as u32);
    let crop_w = (x1.ceil() as u32).saturating_sub(x);
    let crop_h = (y1.ceil() as u32).saturating_sub(y);
    (crop_w > 0 && crop_h > 0).then_some((x, y, crop_w, crop_h))
}

fn crop_face(image: &RgbImage, landmarks: &LandmarkSet) -> Option<RgbImage> {
    let (x, y, w, h) = face_box(landmarks, image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}
