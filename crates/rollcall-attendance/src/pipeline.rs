//! Recognition pipeline: gate → decode → locate → align → embed → classify →
//! reconcile.
//!
//! The session gate runs first, so an attempt outside working hours or
//! against the wrong block never touches the inference backends. Every
//! attempt ends in a [`RecognitionOutcome`]; nothing here returns `Err` to
//! the caller of [`RecognitionPipeline::recognize`].

use crate::clock::Clock;
use crate::hours::Admission;
use crate::model::SessionStatus;
use crate::outcome::{ErrorKind, RecognitionOutcome};
use crate::policy::AttendancePolicy;
use crate::reconcile::Reconciler;
use crate::store::{AttendanceStore, StoreError};
use rollcall_core::alignment;
use rollcall_core::frame::{self, FrameError, ImagePayload};
use rollcall_core::{
    BoundingBox, BundleMetadata, Classification, ClassifierError, DetectorError,
    EmbeddingExtractor, FaceLocator, ModelRegistry, RecognizerError, RegistryError,
};
use serde::Serialize;
use std::sync::Arc;

/// A failure that ends an attempt, before or instead of an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<Failure> for RecognitionOutcome {
    fn from(f: Failure) -> Self {
        RecognitionOutcome::Error {
            kind: f.kind,
            message: f.message,
        }
    }
}

impl From<FrameError> for Failure {
    fn from(e: FrameError) -> Self {
        Failure::new(ErrorKind::Decode, e.to_string())
    }
}

impl From<DetectorError> for Failure {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::DependencyUnavailable(_) | DetectorError::ModelNotFound(_) => {
                Failure::new(ErrorKind::DependencyUnavailable, e.to_string())
            }
            _ => Failure::new(ErrorKind::Inference, e.to_string()),
        }
    }
}

impl From<RecognizerError> for Failure {
    fn from(e: RecognizerError) -> Self {
        let kind = match e {
            RecognizerError::DependencyUnavailable(_) | RecognizerError::ModelNotFound(_) => {
                ErrorKind::DependencyUnavailable
            }
            RecognizerError::InvalidEmbeddingDimension { .. } => {
                ErrorKind::InvalidEmbeddingDimension
            }
            _ => ErrorKind::Inference,
        };
        Failure::new(kind, e.to_string())
    }
}

impl From<RegistryError> for Failure {
    fn from(e: RegistryError) -> Self {
        Failure::new(ErrorKind::ClassifierNotLoaded, e.to_string())
    }
}

impl From<ClassifierError> for Failure {
    fn from(e: ClassifierError) -> Self {
        let kind = match e {
            ClassifierError::InvalidEmbeddingDimension { .. } => {
                ErrorKind::InvalidEmbeddingDimension
            }
            _ => ErrorKind::Inference,
        };
        Failure::new(kind, e.to_string())
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Failure::new(ErrorKind::Storage, e.to_string())
    }
}

/// Faces located in one frame, for live overlays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceReport {
    pub backend: &'static str,
    pub frame_width: u32,
    pub frame_height: u32,
    pub faces: Vec<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub detector_backends: Vec<&'static str>,
    pub embedding_available: bool,
    pub embedding_model: Option<String>,
    pub classifier_loaded: bool,
}

pub struct RecognitionPipeline {
    registry: Arc<ModelRegistry>,
    locator: FaceLocator,
    extractor: EmbeddingExtractor,
    store: Arc<dyn AttendanceStore>,
    policy: AttendancePolicy,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
}

impl RecognitionPipeline {
    pub fn new(
        registry: Arc<ModelRegistry>,
        locator: FaceLocator,
        extractor: EmbeddingExtractor,
        store: Arc<dyn AttendanceStore>,
        policy: AttendancePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store), policy.upgrade_min_confidence);
        Self {
            registry,
            locator,
            extractor,
            store,
            policy,
            clock,
            reconciler,
        }
    }

    /// Identify the face in `payload` and reconcile it against `session_id`.
    pub fn recognize(&mut self, payload: ImagePayload, session_id: &str) -> RecognitionOutcome {
        let outcome = self
            .try_recognize(payload, session_id)
            .unwrap_or_else(|failure| {
                match failure.kind {
                    ErrorKind::DependencyUnavailable => tracing::error!(
                        session_id,
                        message = %failure.message,
                        "inference backend unavailable"
                    ),
                    _ => tracing::warn!(
                        session_id,
                        kind = ?failure.kind,
                        message = %failure.message,
                        "recognition failed"
                    ),
                }
                failure.into()
            });
        tracing::info!(
            session_id,
            outcome = outcome.status(),
            wrote = outcome.wrote_record(),
            "recognition attempt finished"
        );
        outcome
    }

    fn try_recognize(
        &mut self,
        payload: ImagePayload,
        session_id: &str,
    ) -> Result<RecognitionOutcome, Failure> {
        let now = self.clock.now();

        // --- Session & time gate ---
        let session = self.store.session(session_id)?.ok_or_else(|| {
            Failure::new(
                ErrorKind::SessionNotFound,
                format!("session {session_id} not found"),
            )
        })?;
        if session.status != SessionStatus::Active {
            return Err(Failure::new(
                ErrorKind::SessionNotActive,
                format!("session {session_id} is {}", session.status),
            ));
        }

        match self.policy.hours.admission(now) {
            Admission::Blocked {
                period,
                next_window,
                minutes_until_next,
                message,
                ..
            } => {
                return Ok(RecognitionOutcome::TimeBlocked {
                    period,
                    next_window,
                    minutes_until_next,
                    message,
                });
            }
            Admission::Open { period, block } if block != session.time_block => {
                return Ok(RecognitionOutcome::TimeBlockMismatch {
                    session_block: session.time_block,
                    current_period: period,
                    message: format!(
                        "session runs in the {} block ({}), current period is {period}",
                        session.time_block,
                        self.policy.hours.describe(session.time_block)
                    ),
                });
            }
            Admission::Open { .. } => {}
        }

        // --- Dependencies ---
        let bundle = self.registry.load()?;
        // Surface a missing embedder before spending a detection pass.
        self.extractor.ensure_available()?;

        // --- Inference ---
        let frame = frame::decode(payload)?;
        let located = self.locator.locate(&frame)?;
        let Some(face) = located.primary() else {
            return Ok(RecognitionOutcome::NoFace);
        };
        let aligned = alignment::align(&frame, face);
        let embedding = self.extractor.extract(&aligned)?;

        let (identity, confidence) = match bundle.classify(&embedding)? {
            Classification::Unknown {
                top_candidate,
                confidence,
                top_k,
            } => {
                tracing::debug!(session_id, ?top_k, "classification below threshold");
                return Ok(RecognitionOutcome::Unknown {
                    top_candidate: Some(top_candidate),
                    confidence: Some(confidence),
                    message: format!(
                        "best match below acceptance threshold {:.2}",
                        bundle.threshold()
                    ),
                });
            }
            Classification::Recognized {
                identity,
                confidence,
                top_k,
            } => {
                tracing::debug!(
                    session_id,
                    %identity,
                    confidence,
                    ?top_k,
                    "classification accepted"
                );
                (identity, confidence)
            }
        };

        // --- Reconciliation ---
        let Some(student) = self.store.enrollment(&identity)? else {
            tracing::warn!(
                session_id,
                %identity,
                "classifier label has no enrollment record"
            );
            return Ok(RecognitionOutcome::Unknown {
                message: format!("identity {identity} has no enrollment record"),
                top_candidate: Some(identity),
                confidence: Some(confidence),
            });
        };

        Ok(self.reconciler.reconcile(&session, &student, confidence, now)?)
    }

    /// Locate faces for a live overlay, smoothing the primary box against
    /// the tracking history.
    pub fn locate_faces(&mut self, payload: ImagePayload) -> Result<FaceReport, Failure> {
        let frame = frame::decode(payload)?;
        let located = self.locator.track(&frame)?;
        Ok(FaceReport {
            backend: located.backend,
            frame_width: frame.width,
            frame_height: frame.height,
            faces: located.faces,
        })
    }

    pub fn reset_tracking(&mut self) {
        self.locator.reset_tracking();
    }

    pub fn model_info(&self) -> Result<BundleMetadata, Failure> {
        Ok(self.registry.load()?.metadata())
    }

    pub fn reload_model(&self) -> Result<BundleMetadata, Failure> {
        Ok(self.registry.reload()?.metadata())
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            detector_backends: self.locator.backend_names(),
            embedding_available: self.extractor.is_available(),
            embedding_model: self.extractor.model_version().map(str::to_string),
            classifier_loaded: self.registry.is_loaded(),
        }
    }
}
