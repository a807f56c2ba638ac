//! UltraFace (RFB-320) face detector, the cheap fallback backend.
//!
//! The exported model already decodes its priors: `scores` is `[1, N, 2]`
//! (background, face) and `boxes` is `[1, N, 4]` normalized corner coordinates.
//! No landmarks are produced, so alignment falls back to a padded crop.

use crate::detector::{nms, DetectorBackend, DetectorError};
use crate::frame::Frame;
use crate::resample;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

pub struct UltraFaceDetector {
    session: Session,
    scores_idx: usize,
    boxes_idx: usize,
}

impl UltraFaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                names.len()
            )));
        }

        let scores_idx = names.iter().position(|n| n == "scores").unwrap_or(0);
        let boxes_idx = names.iter().position(|n| n == "boxes").unwrap_or(1);

        tracing::info!(path = model_path, outputs = ?names, "loaded UltraFace model");

        Ok(Self {
            session,
            scores_idx,
            boxes_idx,
        })
    }

    fn preprocess(frame: &Frame) -> Array4<f32> {
        let resized = resample::resize_rgb(
            &frame.data,
            frame.width as usize,
            frame.height as usize,
            ULTRAFACE_INPUT_WIDTH,
            ULTRAFACE_INPUT_HEIGHT,
        );

        let shape = (1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH);
        let mut tensor = Array4::<f32>::zeros(shape);
        for y in 0..ULTRAFACE_INPUT_HEIGHT {
            for x in 0..ULTRAFACE_INPUT_WIDTH {
                let src = (y * ULTRAFACE_INPUT_WIDTH + x) * 3;
                for c in 0..3 {
                    let normalized = (resized[src + c] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
                    tensor[[0, c, y, x]] = normalized;
                }
            }
        }
        tensor
    }
}

impl DetectorBackend for UltraFaceDetector {
    fn name(&self) -> &'static str {
        "ultraface"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = Self::preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[self.scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[self.boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let dets = decode(
            scores,
            boxes,
            frame.width as f32,
            frame.height as f32,
            ULTRAFACE_CONFIDENCE_THRESHOLD,
        );
        Ok(nms(dets, ULTRAFACE_NMS_THRESHOLD))
    }
}

/// Convert normalized UltraFace outputs into frame-space boxes.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    frame_w: f32,
    frame_h: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let candidates = (scores.len() / 2).min(boxes.len() / 4);
    let mut out = Vec::new();

    for i in 0..candidates {
        let score = scores[i * 2 + 1];
        if score <= threshold {
            continue;
        }
        let x1 = boxes[i * 4].clamp(0.0, 1.0) * frame_w;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * frame_h;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * frame_w;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * frame_h;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks: None,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_scales_to_frame() {
        let scores = [0.9, 0.1, 0.2, 0.8];
        let boxes = [0.0, 0.0, 1.0, 1.0, 0.25, 0.5, 0.75, 1.0];
        let dets = decode(&scores, &boxes, 640.0, 480.0, 0.7);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (160.0, 240.0, 320.0, 240.0));
        assert!(d.landmarks.is_none());
    }

    #[test]
    fn test_decode_skips_degenerate_boxes() {
        let scores = [0.0, 0.95];
        let boxes = [0.5, 0.5, 0.5, 0.9];
        assert!(decode(&scores, &boxes, 100.0, 100.0, 0.7).is_empty());
    }

    #[test]
    fn test_preprocess_shape() {
        let frame = Frame::from_rgb(vec![127u8; 64 * 48 * 3], 64, 48).unwrap();
        let t = UltraFaceDetector::preprocess(&frame);
        assert_eq!(
            t.shape(),
            &[1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH]
        );
        assert!(t.iter().all(|v| v.abs() < 1e-6));
    }
}
