//! Face-mesh landmark provider on ONNX Runtime.
//!
//! Runs the 468-point MediaPipe face-landmark network exported to ONNX.
//! Input is a 1×192×192×3 (NHWC) float tensor in `[0, 1]`; the model emits
//! 1404 coordinates (x, y, z per point, in input pixels) followed by a
//! face-presence logit in a second output.

use image::imageops::{self, FilterType};
use image::{GenericImageView, ImageBuffer, Rgb};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::landmarks::{LandmarkError, LandmarkProvider, LandmarkSet, MESH_POINTS};
use crate::types::{Frame, Point};

const INPUT_SIZE: u32 = 192;

/// Sigmoid of the presence logit below which the frame holds no face.
const PRESENCE_THRESHOLD: f32 = 0.5;

pub struct OnnxFaceMesh {
    session: Session,
}

impl OnnxFaceMesh {
    /// Load the face-mesh model. Fails fast if the file is missing or invalid.
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        let builder = Session::builder().map_err(|e| LandmarkError::Model(e.to_string()))?;
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| LandmarkError::Model(format!("{model_path}: {e}")))?;
        tracing::info!(path = model_path, "face mesh model loaded");
        Ok(Self { session })
    }

    /// Detect landmarks on an RGB image of any size.
    pub fn detect<I>(&mut self, image: &I) -> Result<Option<LandmarkSet>, LandmarkError>
    where
        I: GenericImageView<Pixel = Rgb<u8>>,
    {
        let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let side = INPUT_SIZE as usize;
        let input = Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
            f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0
        });

        let tensor = Tensor::from_array(input).map_err(|e| LandmarkError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;

        let (_, coords) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;
        let (_, score) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;

        let presence = score.first().copied().map(sigmoid).unwrap_or(0.0);
        if presence < PRESENCE_THRESHOLD {
            return Ok(None);
        }
        Ok(decode_landmarks(coords, INPUT_SIZE as f32))
    }
}

impl LandmarkProvider for OnnxFaceMesh {
    fn landmarks(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, LandmarkError> {
        let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.data[..])
            .ok_or(LandmarkError::InvalidFrame {
                width: frame.width,
                height: frame.height,
            })?;
        self.detect(&view)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Turn raw `(x, y, z)` triples in input pixels into normalised points.
fn decode_landmarks(coords: &[f32], input_size: f32) -> Option<LandmarkSet> {
    if coords.len() < MESH_POINTS * 3 {
        return None;
    }
    let points = coords
        .chunks_exact(3)
        .take(MESH_POINTS)
        .map(|xyz| Point::new(xyz[0] / input_size, xyz[1] / input_size))
        .collect();
    Some(LandmarkSet::new(points))
}
