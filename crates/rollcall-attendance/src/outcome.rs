//! Closed result types handed back to callers.
//!
//! Every recognition attempt ends in exactly one [`RecognitionOutcome`];
//! the `status` tag is what clients switch on.

use crate::hours::Period;
use crate::model::{SessionStatus, TimeBlock};
use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    DependencyUnavailable,
    InvalidEmbeddingDimension,
    ClassifierNotLoaded,
    SessionNotFound,
    SessionNotActive,
    Storage,
    Inference,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    NoFace,
    Unknown {
        #[serde(skip_serializing_if = "Option::is_none")]
        top_candidate: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
        message: String,
    },
    Recognized {
        student_id: String,
        confidence: f32,
        observed_at: NaiveDateTime,
    },
    WrongSection {
        student_id: String,
        student_section: String,
        session_section: String,
    },
    DuplicateBlocked {
        student_id: String,
        confidence: f32,
        message: String,
    },
    UpdatedToPresent {
        student_id: String,
        confidence: f32,
        previous_confidence: f32,
    },
    ConfidenceUpdated {
        student_id: String,
        confidence: f32,
        previous_confidence: f32,
    },
    AlreadyPresent {
        student_id: String,
        /// Stored confidence, unchanged.
        confidence: f32,
        observed_confidence: f32,
    },
    TimeBlocked {
        period: Period,
        next_window: TimeBlock,
        minutes_until_next: i64,
        message: String,
    },
    TimeBlockMismatch {
        session_block: TimeBlock,
        current_period: Period,
        message: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl RecognitionOutcome {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// The `status` tag as serialized.
    pub fn status(&self) -> &'static str {
        match self {
            Self::NoFace => "no_face",
            Self::Unknown { .. } => "unknown",
            Self::Recognized { .. } => "recognized",
            Self::WrongSection { .. } => "wrong_section",
            Self::DuplicateBlocked { .. } => "duplicate_blocked",
            Self::UpdatedToPresent { .. } => "updated_to_present",
            Self::ConfidenceUpdated { .. } => "confidence_updated",
            Self::AlreadyPresent { .. } => "already_present",
            Self::TimeBlocked { .. } => "time_blocked",
            Self::TimeBlockMismatch { .. } => "time_block_mismatch",
            Self::Error { .. } => "error",
        }
    }

    /// Whether a record was created or changed.
    pub fn wrote_record(&self) -> bool {
        matches!(
            self,
            Self::Recognized { .. } | Self::UpdatedToPresent { .. } | Self::ConfidenceUpdated { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTransitionResult {
    pub session_id: String,
    pub previous_status: SessionStatus,
    pub new_status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AbsentSweepResult {
    pub present_count: u32,
    pub absent_count: u32,
    pub total_students: u32,
}
