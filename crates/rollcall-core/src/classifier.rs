//! Open-set identity classification over face embeddings.
//!
//! A fitted multinomial linear model (softmax over `W·x + b`) applied after
//! standard scaling. Two JSON artifact layouts are accepted and adapted into
//! a single [`ClassifierBundle`] when the artifact is parsed; prediction code
//! only ever sees the adapted form.

use crate::types::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Candidates reported alongside every decision.
pub const TOP_K: usize = 3;

const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("expected {expected}-dim embedding, got {actual}")]
    InvalidEmbeddingDimension { expected: usize, actual: usize },
    #[error("invalid classifier artifact: {0}")]
    InvalidArtifact(String),
    #[error("unsupported artifact schema version {0}")]
    UnsupportedSchema(u64),
    #[error("artifact is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which on-disk layout an artifact used before adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLayout {
    Bare,
    BundleV1,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub identity: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Classification {
    Recognized {
        identity: String,
        confidence: f32,
        top_k: Vec<Candidate>,
    },
    /// Best match fell below the acceptance threshold.
    Unknown {
        top_candidate: String,
        confidence: f32,
        top_k: Vec<Candidate>,
    },
}

// --- Artifact layouts (wire form) ---

#[derive(Deserialize)]
struct LinearParams {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

#[derive(Deserialize)]
struct BareArtifact {
    #[serde(flatten)]
    classifier: LinearParams,
    #[serde(default)]
    classes: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ScalerParams {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

#[derive(Deserialize)]
struct ArtifactMetadata {
    embedding_dim: usize,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    trained_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct BundleV1Artifact {
    classifier: LinearParams,
    #[serde(default)]
    scaler: Option<ScalerParams>,
    labels: Vec<String>,
    metadata: ArtifactMetadata,
}

// --- Adapted form ---

#[derive(Debug, Clone)]
struct LinearModel {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl LinearModel {
    fn probabilities(&self, x: &[f32]) -> Vec<f32> {
        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(self.bias.iter())
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect();

        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f32 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }
}

#[derive(Debug, Clone)]
struct StandardScaler {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl StandardScaler {
    fn transform(&self, x: &[f32]) -> Vec<f32> {
        x.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(v, (m, s))| {
                // Constant features were fitted with zero variance.
                let s = if s.abs() <= f32::EPSILON { 1.0 } else { *s };
                (v - m) / s
            })
            .collect()
    }
}

/// Diagnostic view of a loaded bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleMetadata {
    pub layout: ArtifactLayout,
    pub embedding_dim: usize,
    pub identity_count: usize,
    pub threshold: f32,
    pub trained_at: Option<DateTime<Utc>>,
    pub has_scaler: bool,
    pub artifact_digest: Option<String>,
}

/// Classifier, scaler and label map, immutable once loaded.
#[derive(Debug, Clone)]
pub struct ClassifierBundle {
    model: LinearModel,
    scaler: Option<StandardScaler>,
    labels: Vec<String>,
    threshold: f32,
    embedding_dim: usize,
    trained_at: Option<DateTime<Utc>>,
    layout: ArtifactLayout,
    artifact_digest: Option<String>,
}

impl ClassifierBundle {
    /// Parse and adapt a JSON artifact. Bare artifacts, and bundles without a
    /// declared threshold, take `default_threshold`.
    pub fn from_json(bytes: &[u8], default_threshold: f32) -> Result<Self, ClassifierError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        match value.get("schema_version") {
            None => {
                let bare: BareArtifact = serde_json::from_value(value)?;
                Self::from_bare(bare, default_threshold)
            }
            Some(version) => match version.as_u64() {
                Some(v) if v == u64::from(CURRENT_SCHEMA_VERSION) => {
                    let bundle: BundleV1Artifact = serde_json::from_value(value)?;
                    Self::from_bundle_v1(bundle, default_threshold)
                }
                Some(v) => Err(ClassifierError::UnsupportedSchema(v)),
                None => Err(ClassifierError::InvalidArtifact(format!(
                    "schema_version must be an integer, got {version}"
                ))),
            },
        }
    }

    fn from_bare(artifact: BareArtifact, default_threshold: f32) -> Result<Self, ClassifierError> {
        let model = validate_linear(artifact.classifier)?;
        let embedding_dim = model.weights[0].len();
        let labels = match artifact.classes {
            Some(classes) => classes,
            None => (0..model.weights.len()).map(|i| i.to_string()).collect(),
        };
        check_labels(&labels, model.weights.len())?;

        Ok(Self {
            model,
            scaler: None,
            labels,
            threshold: default_threshold,
            embedding_dim,
            trained_at: None,
            layout: ArtifactLayout::Bare,
            artifact_digest: None,
        })
    }

    fn from_bundle_v1(
        artifact: BundleV1Artifact,
        default_threshold: f32,
    ) -> Result<Self, ClassifierError> {
        let model = validate_linear(artifact.classifier)?;
        let embedding_dim = artifact.metadata.embedding_dim;
        if model.weights[0].len() != embedding_dim {
            return Err(ClassifierError::InvalidArtifact(format!(
                "metadata declares {embedding_dim}-dim embeddings but weights have {} columns",
                model.weights[0].len()
            )));
        }
        check_labels(&artifact.labels, model.weights.len())?;

        let scaler = match artifact.scaler {
            Some(s) if s.mean.len() != embedding_dim || s.scale.len() != embedding_dim => {
                return Err(ClassifierError::InvalidArtifact(format!(
                    "scaler has {}/{} entries for {embedding_dim}-dim embeddings",
                    s.mean.len(),
                    s.scale.len()
                )));
            }
            Some(s) => Some(StandardScaler {
                mean: s.mean,
                scale: s.scale,
            }),
            None => None,
        };

        Ok(Self {
            model,
            scaler,
            labels: artifact.labels,
            threshold: artifact.metadata.threshold.unwrap_or(default_threshold),
            embedding_dim,
            trained_at: artifact.metadata.trained_at,
            layout: ArtifactLayout::BundleV1,
            artifact_digest: None,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn layout(&self) -> ArtifactLayout {
        self.layout
    }

    pub(crate) fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub(crate) fn set_artifact_digest(&mut self, digest: String) {
        self.artifact_digest = Some(digest);
    }

    pub fn metadata(&self) -> BundleMetadata {
        BundleMetadata {
            layout: self.layout,
            embedding_dim: self.embedding_dim,
            identity_count: self.labels.len(),
            threshold: self.threshold,
            trained_at: self.trained_at,
            has_scaler: self.scaler.is_some(),
            artifact_digest: self.artifact_digest.clone(),
        }
    }

    /// Classify an embedding. A probability exactly at the threshold is accepted.
    pub fn classify(&self, embedding: &Embedding) -> Result<Classification, ClassifierError> {
        if embedding.dim() != self.embedding_dim {
            return Err(ClassifierError::InvalidEmbeddingDimension {
                expected: self.embedding_dim,
                actual: embedding.dim(),
            });
        }

        let probabilities = match &self.scaler {
            Some(scaler) => self.model.probabilities(&scaler.transform(&embedding.values)),
            None => self.model.probabilities(&embedding.values),
        };

        let mut ranked: Vec<(usize, f32)> = probabilities.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let top_k: Vec<Candidate> = ranked
            .iter()
            .take(TOP_K)
            .map(|&(idx, p)| Candidate {
                identity: self.labels[idx].clone(),
                confidence: p,
            })
            .collect();

        // validate_linear guarantees at least one class.
        let (best_idx, confidence) = ranked[0];
        let identity = self.labels[best_idx].clone();

        if confidence >= self.threshold {
            tracing::debug!(
                %identity,
                confidence,
                threshold = self.threshold,
                "identity accepted"
            );
            Ok(Classification::Recognized {
                identity,
                confidence,
                top_k,
            })
        } else {
            tracing::debug!(
                top_candidate = %identity,
                confidence,
                threshold = self.threshold,
                "below threshold"
            );
            Ok(Classification::Unknown {
                top_candidate: identity,
                confidence,
                top_k,
            })
        }
    }
}

fn validate_linear(params: LinearParams) -> Result<LinearModel, ClassifierError> {
    let Some(first) = params.weights.first() else {
        return Err(ClassifierError::InvalidArtifact("classifier has no classes".into()));
    };
    let dim = first.len();
    if dim == 0 {
        return Err(ClassifierError::InvalidArtifact("classifier weights are empty".into()));
    }
    if let Some(row) = params.weights.iter().position(|r| r.len() != dim) {
        return Err(ClassifierError::InvalidArtifact(format!(
            "weight row {row} has {} columns, expected {dim}",
            params.weights[row].len()
        )));
    }
    if params.bias.len() != params.weights.len() {
        return Err(ClassifierError::InvalidArtifact(format!(
            "{} bias terms for {} classes",
            params.bias.len(),
            params.weights.len()
        )));
    }
    Ok(LinearModel {
        weights: params.weights,
        bias: params.bias,
    })
}

fn check_labels(labels: &[String], classes: usize) -> Result<(), ClassifierError> {
    if labels.len() != classes {
        return Err(ClassifierError::InvalidArtifact(format!(
            "{} labels for {classes} classes",
            labels.len()
        )));
    }
    Ok(())
}
