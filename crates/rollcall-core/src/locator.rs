//! Face localisation: an ordered chain of detector backends, false-positive
//! filtering, and optional temporal smoothing for live tracking.

use crate::detector::{DetectorBackend, DetectorError};
use crate::frame::Frame;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const TRACK_HISTORY_LEN: usize = 5;
const TRACK_CURRENT_WEIGHT: f32 = 0.7;

/// Geometric bounds used to discard implausible detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterBounds {
    /// Minimum width/height ratio (side faces are narrow).
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Minimum box side in pixels.
    pub min_size: f32,
    /// Boxes wider or taller than this fraction of the frame are rejected.
    pub max_frame_fraction: f32,
}

impl Default for FilterBounds {
    fn default() -> Self {
        Self {
            min_aspect: 0.3,
            max_aspect: 3.0,
            min_size: 20.0,
            max_frame_fraction: 0.9,
        }
    }
}

impl FilterBounds {
    pub fn accepts(&self, face: &BoundingBox, frame_w: u32, frame_h: u32) -> bool {
        if face.height <= 0.0 || face.width <= 0.0 {
            return false;
        }
        let aspect = face.width / face.height;
        if aspect < self.min_aspect || aspect > self.max_aspect {
            return false;
        }
        if face.width < self.min_size || face.height < self.min_size {
            return false;
        }
        face.width <= frame_w as f32 * self.max_frame_fraction
            && face.height <= frame_h as f32 * self.max_frame_fraction
    }
}

/// Faces found in one frame, plus which backend produced them.
#[derive(Debug, Clone, Serialize)]
pub struct LocatedFaces {
    /// Sorted by descending confidence.
    pub faces: Vec<BoundingBox>,
    pub backend: &'static str,
}

impl LocatedFaces {
    pub fn primary(&self) -> Option<&BoundingBox> {
        self.faces.first()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// Exponential blend of the primary box against a short rolling history.
#[derive(Debug, Default)]
pub struct TrackSmoother {
    history: VecDeque<BoundingBox>,
}

impl TrackSmoother {
    pub fn smooth(&mut self, current: &BoundingBox) -> BoundingBox {
        let blend = |cur: f32, prev: f32| {
            cur * TRACK_CURRENT_WEIGHT + prev * (1.0 - TRACK_CURRENT_WEIGHT)
        };
        let mut out = current.clone();
        for prev in &self.history {
            out.x = blend(out.x, prev.x);
            out.y = blend(out.y, prev.y);
            out.width = blend(out.width, prev.width);
            out.height = blend(out.height, prev.height);
        }

        if self.history.len() == TRACK_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(out.clone());
        out
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Tries detector backends in priority order until one answers.
pub struct FaceLocator {
    backends: Vec<Box<dyn DetectorBackend>>,
    filter: FilterBounds,
    tracker: TrackSmoother,
}

impl FaceLocator {
    /// Build a locator from already-initialised backends, highest priority first.
    pub fn new(
        backends: Vec<Box<dyn DetectorBackend>>,
        filter: FilterBounds,
    ) -> Result<Self, DetectorError> {
        if backends.is_empty() {
            return Err(DetectorError::DependencyUnavailable(
                "no face detection backend initialised".into(),
            ));
        }
        Ok(Self {
            backends,
            filter,
            tracker: TrackSmoother::default(),
        })
    }

    /// Build a locator from backend load attempts, keeping the ones that
    /// initialised. Fails only if none did.
    pub fn from_attempts(
        attempts: Vec<(&'static str, Result<Box<dyn DetectorBackend>, DetectorError>)>,
        filter: FilterBounds,
    ) -> Result<Self, DetectorError> {
        let mut backends = Vec::new();
        let mut failures = Vec::new();

        for (name, attempt) in attempts {
            match attempt {
                Ok(backend) => {
                    tracing::info!(backend = name, "detection backend ready");
                    backends.push(backend);
                }
                Err(e) => {
                    tracing::warn!(
                        backend = name,
                        error = %e,
                        "detection backend failed to initialise"
                    );
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if backends.is_empty() {
            tracing::error!(?failures, "no face detection backend available");
            return Err(DetectorError::DependencyUnavailable(failures.join("; ")));
        }

        Self::new(backends, filter)
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Detect and filter faces. An empty result is a valid outcome.
    pub fn locate(&mut self, frame: &Frame) -> Result<LocatedFaces, DetectorError> {
        let mut failures = Vec::new();

        for backend in self.backends.iter_mut() {
            let name = backend.name();
            match backend.detect(frame) {
                Ok(raw) => {
                    let detected = raw.len();
                    let faces: Vec<BoundingBox> = raw
                        .into_iter()
                        .filter(|f| self.filter.accepts(f, frame.width, frame.height))
                        .collect();
                    tracing::debug!(
                        backend = name,
                        detected,
                        kept = faces.len(),
                        "faces located"
                    );
                    return Ok(LocatedFaces {
                        faces,
                        backend: name,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        backend = name,
                        error = %e,
                        "detection backend failed; trying next"
                    );
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        Err(DetectorError::InferenceFailed(format!(
            "all detection backends failed: {}",
            failures.join("; ")
        )))
    }

    /// Like [`locate`](Self::locate), but smooths the primary box against the
    /// tracking history to reduce jitter between consecutive frames.
    pub fn track(&mut self, frame: &Frame) -> Result<LocatedFaces, DetectorError> {
        let mut located = self.locate(frame)?;
        if let Some(primary) = located.faces.first_mut() {
            *primary = self.tracker.smooth(primary);
        }
        Ok(located)
    }

    pub fn reset_tracking(&mut self) {
        tracing::debug!(history = self.tracker.len(), "tracking history cleared");
        self.tracker.reset();
    }
}
