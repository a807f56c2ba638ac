//! Model registry: owns the loaded classifier bundle.
//!
//! The registry is an explicit dependency handed to whoever classifies. It
//! loads once (memoised), hands out immutable `Arc` snapshots, and can be
//! told to reload from its artifact source. A failed reload keeps serving the
//! previous bundle.

use crate::classifier::{BundleMetadata, ClassifierBundle, ClassifierError};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.60;
const MIN_PLAUSIBLE_THRESHOLD: f32 = 0.05;
const MAX_PLAUSIBLE_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("classifier not loaded")]
    NotLoaded,
    #[error("classifier artifact not found: {0}")]
    ArtifactNotFound(PathBuf),
    #[error("reading classifier artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("registry lock poisoned")]
    LockPoisoned,
}

/// Where classifier artifact bytes come from.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    File(PathBuf),
    Bytes(Arc<[u8]>),
}

impl ArtifactSource {
    fn read(&self) -> Result<Vec<u8>, RegistryError> {
        match self {
            Self::File(path) => {
                if !path.exists() {
                    return Err(RegistryError::ArtifactNotFound(path.clone()));
                }
                Ok(std::fs::read(path)?)
            }
            Self::Bytes(bytes) => Ok(bytes.to_vec()),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} in-memory bytes>", bytes.len()),
        }
    }
}

pub struct ModelRegistry {
    source: ArtifactSource,
    default_threshold: f32,
    bundle: RwLock<Option<Arc<ClassifierBundle>>>,
}

impl ModelRegistry {
    pub fn new(source: ArtifactSource, default_threshold: f32) -> Self {
        let default_threshold = if plausible_threshold(default_threshold) {
            default_threshold
        } else {
            tracing::warn!(
                configured = default_threshold,
                fallback = DEFAULT_THRESHOLD,
                "configured default threshold out of range"
            );
            DEFAULT_THRESHOLD
        };

        Self {
            source,
            default_threshold,
            bundle: RwLock::new(None),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>, default_threshold: f32) -> Self {
        Self::new(ArtifactSource::File(path.into()), default_threshold)
    }

    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, default_threshold: f32) -> Self {
        Self::new(ArtifactSource::Bytes(bytes.into()), default_threshold)
    }

    /// Load the bundle if not already loaded. Idempotent.
    pub fn load(&self) -> Result<Arc<ClassifierBundle>, RegistryError> {
        if let Ok(bundle) = self.snapshot() {
            return Ok(bundle);
        }

        let mut slot = self.bundle.write().map_err(|_| RegistryError::LockPoisoned)?;
        // Another caller may have loaded while we waited for the write lock.
        if let Some(bundle) = slot.as_ref() {
            return Ok(Arc::clone(bundle));
        }

        let bundle = Arc::new(self.build()?);
        *slot = Some(Arc::clone(&bundle));
        Ok(bundle)
    }

    /// Re-read the artifact source and swap in the new bundle.
    pub fn reload(&self) -> Result<Arc<ClassifierBundle>, RegistryError> {
        let bundle = match self.build() {
            Ok(bundle) => Arc::new(bundle),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    kept_previous = self.is_loaded(),
                    "classifier reload failed"
                );
                return Err(e);
            }
        };

        let mut slot = self.bundle.write().map_err(|_| RegistryError::LockPoisoned)?;
        *slot = Some(Arc::clone(&bundle));
        Ok(bundle)
    }

    pub fn is_loaded(&self) -> bool {
        self.bundle.read().map(|b| b.is_some()).unwrap_or(false)
    }

    /// The currently loaded bundle, without triggering a load.
    pub fn snapshot(&self) -> Result<Arc<ClassifierBundle>, RegistryError> {
        self.bundle
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?
            .as_ref()
            .map(Arc::clone)
            .ok_or(RegistryError::NotLoaded)
    }

    pub fn metadata(&self) -> Result<BundleMetadata, RegistryError> {
        Ok(self.snapshot()?.metadata())
    }

    fn build(&self) -> Result<ClassifierBundle, RegistryError> {
        let bytes = self.source.read()?;
        let digest = format!("{:x}", Sha256::digest(&bytes));

        let mut bundle = ClassifierBundle::from_json(&bytes, self.default_threshold)?;
        let declared = bundle.threshold();
        if !plausible_threshold(declared) {
            tracing::warn!(
                declared,
                fallback = self.default_threshold,
                "artifact threshold implausible; using configured default"
            );
            bundle.set_threshold(self.default_threshold);
        }
        bundle.set_artifact_digest(digest);

        let meta = bundle.metadata();
        tracing::info!(
            source = %self.source.describe(),
            layout = ?meta.layout,
            identities = meta.identity_count,
            embedding_dim = meta.embedding_dim,
            threshold = meta.threshold,
            "classifier bundle loaded"
        );
        Ok(bundle)
    }
}

pub fn plausible_threshold(threshold: f32) -> bool {
    (MIN_PLAUSIBLE_THRESHOLD..=MAX_PLAUSIBLE_THRESHOLD).contains(&threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::bundle_json;
    use std::io::Write;

    #[test]
    fn test_snapshot_before_load_is_not_loaded() {
        let registry = ModelRegistry::from_bytes(bundle_json(0.6), DEFAULT_THRESHOLD);
        assert!(!registry.is_loaded());
        assert!(matches!(registry.snapshot(), Err(RegistryError::NotLoaded)));
        assert!(matches!(registry.metadata(), Err(RegistryError::NotLoaded)));
    }

    #[test]
    fn test_load_is_memoised() {
        let registry = ModelRegistry::from_bytes(bundle_json(0.6), DEFAULT_THRESHOLD);
        let a = registry.load().unwrap();
        let b = registry.load().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.is_loaded());
    }

    #[test]
    fn test_implausible_threshold_falls_back() {
        let registry = ModelRegistry::from_bytes(bundle_json(0.99), 0.7);
        assert_eq!(registry.load().unwrap().threshold(), 0.7);

        let registry = ModelRegistry::from_bytes(bundle_json(0.01), 0.7);
        assert_eq!(registry.load().unwrap().threshold(), 0.7);

        let registry = ModelRegistry::from_bytes(bundle_json(0.8), 0.7);
        assert_eq!(registry.load().unwrap().threshold(), 0.8);
    }

    #[test]
    fn test_implausible_default_uses_builtin() {
        let registry = ModelRegistry::from_bytes(bundle_json(2.0), 5.0);
        assert_eq!(registry.load().unwrap().threshold(), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_metadata_carries_digest() {
        let bytes = bundle_json(0.6);
        let expected = format!("{:x}", Sha256::digest(&bytes));
        let registry = ModelRegistry::from_bytes(bytes, DEFAULT_THRESHOLD);
        registry.load().unwrap();
        let meta = registry.metadata().unwrap();
        assert_eq!(meta.artifact_digest.as_deref(), Some(expected.as_str()));
        assert_eq!(meta.identity_count, 3);
    }

    #[test]
    fn test_missing_file() {
        let registry = ModelRegistry::from_file("/nonexistent/classifier.json", DEFAULT_THRESHOLD);
        assert!(matches!(registry.load(), Err(RegistryError::ArtifactNotFound(_))));
        assert!(!registry.is_loaded());
    }

    #[test]
    fn test_reload_picks_up_new_artifact_and_keeps_old_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        std::fs::write(&path, bundle_json(0.6)).unwrap();

        let registry = ModelRegistry::from_file(&path, DEFAULT_THRESHOLD);
        assert_eq!(registry.load().unwrap().threshold(), 0.6);

        std::fs::write(&path, bundle_json(0.75)).unwrap();
        // load() stays memoised; reload() re-reads.
        assert_eq!(registry.load().unwrap().threshold(), 0.6);
        assert_eq!(registry.reload().unwrap().threshold(), 0.75);

        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"{ truncated").unwrap();
        drop(f);
        assert!(registry.reload().is_err());
        assert_eq!(registry.snapshot().unwrap().threshold(), 0.75);
    }
}
