//! Institutional attendance policy.

use crate::hours::WorkingHours;
use rollcall_core::FilterBounds;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("invalid attendance policy: {0}")]
pub struct PolicyError(pub String);

/// Every knob the session gate and reconciler consult. All fields default,
/// so a partial TOML table overrides only what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendancePolicy {
    pub hours: WorkingHours,
    /// Minimum wait between stopping a session and reopening it.
    pub reopen_cooldown_hours: i64,
    pub semester_min_days: i64,
    pub semester_min_sessions: u32,
    /// An absent record is upgraded only above this confidence.
    pub upgrade_min_confidence: f32,
    pub detector_filter: FilterBounds,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            hours: WorkingHours::default(),
            reopen_cooldown_hours: 12,
            semester_min_days: 120,
            semester_min_sessions: 8,
            upgrade_min_confidence: 0.50,
            detector_filter: FilterBounds::default(),
        }
    }
}

impl AttendancePolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.hours.validate().map_err(PolicyError)?;
        if self.reopen_cooldown_hours < 0 {
            return Err(PolicyError(format!(
                "reopen_cooldown_hours must be non-negative, got {}",
                self.reopen_cooldown_hours
            )));
        }
        if self.semester_min_days < 0 {
            return Err(PolicyError(format!(
                "semester_min_days must be non-negative, got {}",
                self.semester_min_days
            )));
        }
        if !(0.0..=1.0).contains(&self.upgrade_min_confidence) {
            return Err(PolicyError(format!(
                "upgrade_min_confidence must be in [0, 1], got {}",
                self.upgrade_min_confidence
            )));
        }
        Ok(())
    }
}
