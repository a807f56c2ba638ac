use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// A canonical, fixed-size RGB face crop ready for embedding extraction.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    /// Interleaved RGB pixels, `size * size * 3` bytes.
    pub data: Vec<u8>,
    pub size: usize,
    /// Whether the crop came from landmark alignment or the bounding-box fallback.
    pub method: AlignmentMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMethod {
    Landmarks,
    PaddedCrop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm() {
        let e = Embedding::new(vec![3.0, 4.0]);
        assert!((e.norm() - 5.0).abs() < 1e-6);
        assert_eq!(e.dim(), 2);
    }

    #[test]
    fn test_bbox_area() {
        let b = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 40.0,
            height: 60.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert_eq!(b.area(), 2400.0);

        let inverted = BoundingBox { width: -5.0, ..b };
        assert_eq!(inverted.area(), 0.0);
    }
}
