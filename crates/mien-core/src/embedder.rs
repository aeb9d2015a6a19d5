//! MobileFaceNet face embedder via ONNX Runtime.
//!
//! Crops a detected face out of the grayscale frame, resizes it to the
//! canonical 112x112 input, and extracts a 128-dimensional embedding.

use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 128.0;
/// Embedding length the model must produce.
pub const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — download mobilefacenet.onnx and place it there")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    BoxOutOfFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// MobileFaceNet-based embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the MobileFaceNet ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded MobileFaceNet model");

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face in a grayscale frame.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, EmbedderError> {
        let crop = crop_face(frame, width, height, face)?;
        let input = Self::preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so Euclidean distances are comparable across captures.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding::new(values))
    }

    /// Turn a 112x112 grayscale crop into a normalized NCHW RGB tensor.
    fn preprocess(crop: &[u8]) -> Array4<f32> {
        let size = EMBED_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = crop.get(y * size + x).copied().unwrap_or(0) as f32;
                let normalized = (pixel - EMBED_MEAN) / EMBED_STD;
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

/// Crop the face box out of the frame and resize to 112x112.
fn crop_face(
    frame: &[u8],
    width: u32,
    height: u32,
    face: &BoundingBox,
) -> Result<Vec<u8>, EmbedderError> {
    let img: GrayImage = ImageBuffer::from_raw(width, height, frame.to_vec())
        .ok_or(EmbedderError::BoxOutOfFrame)?;

    let x = (face.x.max(0.0) as u32).min(width.saturating_sub(1));
    let y = (face.y.max(0.0) as u32).min(height.saturating_sub(1));
    let w = (face.width as u32).clamp(1, width - x);
    let h = (face.height as u32).clamp(1, height - y);

    let crop = imageops::crop_imm(&img, x, y, w, h).to_image();
    let resized = imageops::resize(
        &crop,
        EMBED_INPUT_SIZE as u32,
        EMBED_INPUT_SIZE as u32,
        FilterType::Triangle,
    );

    Ok(resized.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let crop = vec![128u8; EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        let tensor = FaceEmbedder::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        // Pixel value 127.5 maps to 0; 128 maps just above it.
        let crop = vec![128u8; EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        let tensor = FaceEmbedder::preprocess(&crop);
        let expected = (128.0 - EMBED_MEAN) / EMBED_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_crop_face_full_frame() {
        let frame = vec![200u8; 64 * 64];
        let face = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 64.0,
            height: 64.0,
            confidence: 1.0,
        };
        let crop = crop_face(&frame, 64, 64, &face).unwrap();
        assert_eq!(crop.len(), EMBED_INPUT_SIZE * EMBED_INPUT_SIZE);
        // Uniform input stays uniform through the resize.
        assert!(crop.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_crop_face_clamps_out_of_frame_box() {
        let frame = vec![50u8; 64 * 64];
        let face = BoundingBox {
            x: -10.0,
            y: 60.0,
            width: 200.0,
            height: 200.0,
            confidence: 1.0,
        };
        let crop = crop_face(&frame, 64, 64, &face).unwrap();
        assert_eq!(crop.len(), EMBED_INPUT_SIZE * EMBED_INPUT_SIZE);
    }
}
