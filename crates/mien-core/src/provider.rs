//! The embedding-provider seam.
//!
//! Callers (the engine, enrollment) depend on [`EmbeddingProvider`] only;
//! the bundled implementation chains the UltraFace detector and the
//! MobileFaceNet embedder.

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::DetectedFace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Opaque detection + embedding capability: given a grayscale frame,
/// return every face found with its embedding. May legitimately return
/// an empty list.
pub trait EmbeddingProvider: Send {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, ProviderError>;
}

/// ONNX-backed provider: UltraFace boxes, MobileFaceNet embeddings.
pub struct OnnxFacePipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxFacePipeline {
    /// Load both models. Fails fast if either file is missing so startup
    /// errors surface before any frame is accepted.
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(detector_path)?;
        let embedder = FaceEmbedder::load(embedder_path)?;
        Ok(Self { detector, embedder })
    }
}

impl EmbeddingProvider for OnnxFacePipeline {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, ProviderError> {
        let boxes = self.detector.detect(frame, width, height)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let embedding = self.embedder.extract(frame, width, height, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }
        tracing::debug!(count = faces.len(), "faces embedded");
        Ok(faces)
    }
}
