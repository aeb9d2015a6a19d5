//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the version-RFB-320 model: the network emits per-candidate class
//! scores and corner-form boxes in normalized coordinates, so decoding is
//! a confidence filter plus NMS — no anchor arithmetic on our side.

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;
/// Values per box in the bbox output tensor: [x1, y1, x2, y2] normalized.
const BOX_VALUES: usize = 4;
/// Values per candidate in the score output tensor: [background, face].
const SCORE_VALUES: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download version-RFB-320.onnx and place it there")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded UltraFace model"
        );

        Ok(Self { session })
    }

    /// Detect faces in a grayscale frame, returning boxes in frame
    /// coordinates sorted by confidence, best first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = Self::preprocess(frame, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = scores.len() / SCORE_VALUES;
        if boxes.len() < candidates * BOX_VALUES {
            return Err(DetectorError::InferenceFailed(format!(
                "box tensor too short: {} candidates, {} box values",
                candidates,
                boxes.len()
            )));
        }

        let mut detections = Vec::new();
        for i in 0..candidates {
            let confidence = scores[i * SCORE_VALUES + 1];
            if confidence < ULTRAFACE_CONFIDENCE_THRESHOLD {
                continue;
            }
            // Normalized corners; the preprocess stretch means the inverse
            // mapping is a plain scale by the original frame size.
            let x1 = boxes[i * BOX_VALUES].clamp(0.0, 1.0) * width as f32;
            let y1 = boxes[i * BOX_VALUES + 1].clamp(0.0, 1.0) * height as f32;
            let x2 = boxes[i * BOX_VALUES + 2].clamp(0.0, 1.0) * width as f32;
            let y2 = boxes[i * BOX_VALUES + 3].clamp(0.0, 1.0) * height as f32;
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            detections.push(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence,
            });
        }

        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(nms(detections, ULTRAFACE_NMS_THRESHOLD))
    }

    /// Stretch the grayscale frame to 320x240 and replicate into a
    /// normalized NCHW RGB tensor (UltraFace expects 3 channels).
    fn preprocess(frame: &[u8], width: usize, height: usize) -> Array4<f32> {
        let (iw, ih) = (ULTRAFACE_INPUT_WIDTH, ULTRAFACE_INPUT_HEIGHT);
        let mut tensor = Array4::<f32>::zeros((1, 3, ih, iw));

        for y in 0..ih {
            for x in 0..iw {
                // Nearest-neighbor sample from the source frame.
                let sx = x * width / iw;
                let sy = y * height / ih;
                let pixel = frame.get(sy * width + sx).copied().unwrap_or(0) as f32;
                let normalized = (pixel - ULTRAFACE_MEAN) / ULTRAFACE_STD;
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

/// Hard non-maximum suppression. Input must be sorted by confidence,
/// best first.
fn nms(detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    let mut kept: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if kept.iter().all(|k| iou(k, &det) < iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence,
        }
    }

    #[test]
    fn test_preprocess_output_shape() {
        let frame = vec![128u8; 640 * 480];
        let tensor = FaceDetector::preprocess(&frame, 640, 480);
        assert_eq!(
            tensor.shape(),
            &[1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        let frame = vec![255u8; 320 * 240];
        let tensor = FaceDetector::preprocess(&frame, 320, 240);
        let expected = (255.0 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let frame: Vec<u8> = (0..(320 * 240)).map(|i| (i % 251) as u8).collect();
        let tensor = FaceDetector::preprocess(&frame, 320, 240);
        for y in (0..ULTRAFACE_INPUT_HEIGHT).step_by(17) {
            for x in (0..ULTRAFACE_INPUT_WIDTH).step_by(13) {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_identical_is_one() {
        let a = bbox(5.0, 5.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_boxes() {
        let detections = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            bbox(1.0, 1.0, 10.0, 10.0, 0.8), // heavy overlap with the first
            bbox(50.0, 50.0, 10.0, 10.0, 0.7),
        ];
        let kept = nms(detections, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let detections = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            bbox(100.0, 0.0, 10.0, 10.0, 0.8),
            bbox(0.0, 100.0, 10.0, 10.0, 0.7),
        ];
        assert_eq!(nms(detections, 0.3).len(), 3);
    }
}
