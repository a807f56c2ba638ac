//! rollcall-core: face localisation, embedding and identity classification.
//!
//! Uses SCRFD (with an UltraFace fallback) for detection and ArcFace for
//! embeddings, both running via ONNX Runtime for CPU inference. Identities
//! come from a fitted classifier bundle held by the [`ModelRegistry`].

pub mod alignment;
pub mod classifier;
pub mod detector;
pub mod frame;
pub mod locator;
pub mod recognizer;
pub mod registry;
pub mod resample;
pub mod types;
pub mod ultraface;

pub use classifier::{BundleMetadata, Candidate, Classification, ClassifierBundle, ClassifierError};
pub use detector::{DetectorBackend, DetectorError, ScrfdDetector};
pub use frame::{Frame, FrameError, ImagePayload, PixelOrder};
pub use locator::{FaceLocator, FilterBounds, LocatedFaces};
pub use recognizer::{ArcFaceModel, EmbeddingBackend, EmbeddingExtractor, RecognizerError};
pub use registry::{ArtifactSource, ModelRegistry, RegistryError};
pub use types::{AlignedFace, AlignmentMethod, BoundingBox, Embedding};
pub use ultraface::UltraFaceDetector;
