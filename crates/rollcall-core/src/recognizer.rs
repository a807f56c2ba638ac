//! ArcFace embedding extraction via ONNX Runtime.
//!
//! Maps an aligned 112×112 RGB crop to a 512-dimensional, L2-normalised
//! embedding using the w600k_r50 ArcFace model. The ONNX session sits behind
//! [`EmbeddingBackend`] so the extractor can be driven without a model file.

use crate::types::{AlignedFace, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from SCRFD!) ---
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0; ArcFace uses symmetric normalization
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download from insightface and place in models/")]
    ModelNotFound(String),
    #[error("embedding backend unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("expected {expected}-dim embedding, got {actual}")]
    InvalidEmbeddingDimension { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One forward pass of an embedding model. Returns the raw, un-normalised output.
pub trait EmbeddingBackend: Send {
    fn model_version(&self) -> &str;

    fn forward(&mut self, face: &AlignedFace) -> Result<Vec<f32>, RecognizerError>;
}

/// ArcFace w600k_r50 over ONNX Runtime.
pub struct ArcFaceModel {
    session: Session,
}

impl ArcFaceModel {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Convert a 112x112 RGB crop into a NCHW float tensor.
    fn preprocess(face: &AlignedFace) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let src = (y * face.size + x) * 3;
                for c in 0..3 {
                    let pixel = face.data.get(src + c).copied().unwrap_or(0) as f32;
                    tensor[[0, c, y, x]] = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
                }
            }
        }

        tensor
    }
}

impl EmbeddingBackend for ArcFaceModel {
    fn model_version(&self) -> &str {
        ARCFACE_MODEL_VERSION
    }

    fn forward(&mut self, face: &AlignedFace) -> Result<Vec<f32>, RecognizerError> {
        if face.size != ARCFACE_INPUT_SIZE {
            return Err(RecognizerError::InferenceFailed(format!(
                "aligned crop is {0}x{0}, model expects {ARCFACE_INPUT_SIZE}x{ARCFACE_INPUT_SIZE}",
                face.size
            )));
        }

        let input = Self::preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                RecognizerError::InferenceFailed(format!("embedding extraction: {e}"))
            })?;

        Ok(raw.to_vec())
    }
}

/// Wraps an embedding backend with dimension validation and normalisation.
///
/// An extractor built with [`EmbeddingExtractor::unavailable`] fails every
/// call with `DependencyUnavailable`, so a missing model is reported the
/// same way on every request instead of being mistaken for a bad frame.
pub struct EmbeddingExtractor {
    backend: Result<Box<dyn EmbeddingBackend>, String>,
    expected_dim: usize,
}

impl EmbeddingExtractor {
    pub fn new(backend: Box<dyn EmbeddingBackend>) -> Self {
        Self::with_dimension(backend, ARCFACE_EMBEDDING_DIM)
    }

    pub fn with_dimension(backend: Box<dyn EmbeddingBackend>, expected_dim: usize) -> Self {
        Self {
            backend: Ok(backend),
            expected_dim,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            backend: Err(reason.into()),
            expected_dim: ARCFACE_EMBEDDING_DIM,
        }
    }

    /// Load ArcFace from `model_path`; a load failure yields an unavailable extractor.
    pub fn load_arcface(model_path: &str) -> Self {
        match ArcFaceModel::load(model_path) {
            Ok(model) => Self::new(Box::new(model)),
            Err(e) => {
                tracing::error!(
                    path = model_path,
                    error = %e,
                    "embedding backend failed to initialise"
                );
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_ok()
    }

    /// `DependencyUnavailable` carrying the load failure, if there was one.
    pub fn ensure_available(&self) -> Result<(), RecognizerError> {
        match &self.backend {
            Ok(_) => Ok(()),
            Err(reason) => Err(RecognizerError::DependencyUnavailable(reason.clone())),
        }
    }

    pub fn model_version(&self) -> Option<&str> {
        self.backend.as_ref().ok().map(|b| b.model_version())
    }

    /// Run the backend, validate the output dimension and L2-normalise.
    pub fn extract(&mut self, face: &AlignedFace) -> Result<Embedding, RecognizerError> {
        let backend = match self.backend.as_mut() {
            Ok(backend) => backend,
            Err(reason) => return Err(RecognizerError::DependencyUnavailable(reason.clone())),
        };

        let raw = backend.forward(face)?;
        if raw.len() != self.expected_dim {
            return Err(RecognizerError::InvalidEmbeddingDimension {
                expected: self.expected_dim,
                actual: raw.len(),
            });
        }

        let values = l2_normalize(&raw).ok_or_else(|| {
            RecognizerError::InferenceFailed("embedding has zero or non-finite norm".into())
        })?;

        Ok(Embedding {
            values,
            model_version: Some(backend.model_version().to_string()),
        })
    }
}

/// Scale `raw` to unit length. `None` for a zero or non-finite norm.
pub fn l2_normalize(raw: &[f32]) -> Option<Vec<f32>> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }
    Some(raw.iter().map(|x| x / norm).collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::AlignmentMethod;

    /// Returns a fixed vector regardless of input.
    pub(crate) struct FixedBackend(pub Vec<f32>);

    impl EmbeddingBackend for FixedBackend {
        fn model_version(&self) -> &str {
            "fixed"
        }

        fn forward(&mut self, _face: &AlignedFace) -> Result<Vec<f32>, RecognizerError> {
            Ok(self.0.clone())
        }
    }

    pub(crate) fn crop(value: u8) -> AlignedFace {
        AlignedFace {
            data: vec![value; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE * 3],
            size: ARCFACE_INPUT_SIZE,
            method: AlignmentMethod::PaddedCrop,
        }
    }

    #[test]
    fn test_preprocess_output_shape() {
        let tensor = ArcFaceModel::preprocess(&crop(128));
        assert_eq!(
            tensor.shape(),
            &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        let tensor = ArcFaceModel::preprocess(&crop(128));
        // 128 - 127.5 = 0.5, / 127.5 ≈ 0.00392
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
        assert!((tensor[[0, 2, 111, 111]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_keeps_channel_order() {
        let mut face = crop(0);
        face.data[0] = 255;
        let tensor = ArcFaceModel::preprocess(&face);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_extract_normalizes_to_unit_length() {
        let raw: Vec<f32> = (0..ARCFACE_EMBEDDING_DIM)
            .map(|i| (i % 7) as f32 - 3.0)
            .collect();
        let mut extractor = EmbeddingExtractor::new(Box::new(FixedBackend(raw)));
        let embedding = extractor.extract(&crop(10)).unwrap();
        assert_eq!(embedding.dim(), ARCFACE_EMBEDDING_DIM);
        assert!((embedding.norm() - 1.0).abs() < 1e-4);
        assert_eq!(embedding.model_version.as_deref(), Some("fixed"));
    }

    #[test]
    fn test_extract_rejects_wrong_dimension() {
        let mut extractor = EmbeddingExtractor::new(Box::new(FixedBackend(vec![1.0; 128])));
        match extractor.extract(&crop(10)) {
            Err(RecognizerError::InvalidEmbeddingDimension { expected, actual }) => {
                assert_eq!(expected, ARCFACE_EMBEDDING_DIM);
                assert_eq!(actual, 128);
            }
            other => panic!("expected InvalidEmbeddingDimension, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_rejects_zero_vector() {
        let backend = FixedBackend(vec![0.0; 4]);
        let mut extractor = EmbeddingExtractor::with_dimension(Box::new(backend), 4);
        assert!(matches!(
            extractor.extract(&crop(10)),
            Err(RecognizerError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_unavailable_extractor_fails_fast() {
        let mut extractor = EmbeddingExtractor::unavailable("w600k_r50.onnx missing");
        assert!(!extractor.is_available());
        assert!(extractor.model_version().is_none());
        assert!(matches!(
            extractor.extract(&crop(10)),
            Err(RecognizerError::DependencyUnavailable(_))
        ));
    }

    #[test]
    fn test_load_arcface_missing_file_is_unavailable() {
        let extractor = EmbeddingExtractor::load_arcface("/nonexistent/w600k_r50.onnx");
        assert!(!extractor.is_available());
    }
}
