//! Attendance reconciliation: at most one canonical record per
//! (student, session, day), whatever order or concurrency observations
//! arrive in.
//!
//! The create-or-update decision is a pure function of the existing record
//! ([`decide`]); applying it is optimistic. A lost insert race comes back as
//! [`StoreError::Conflict`] and a lost update as a refused compare-and-set;
//! both re-read and decide again.

use crate::model::{AttendanceRecord, AttendanceStatus, Session, StudentEnrollment};
use crate::outcome::{AbsentSweepResult, RecognitionOutcome};
use crate::store::{AttendanceStore, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::sync::Arc;

const MAX_ATTEMPTS: usize = 16;

/// What to do with a new observation given the current record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Create,
    UpgradeToPresent,
    RefreshConfidence,
    KeepExisting,
    Block,
}

pub fn decide(
    existing: Option<&AttendanceRecord>,
    confidence: f32,
    upgrade_min_confidence: f32,
) -> Decision {
    match existing {
        None => Decision::Create,
        Some(r) if r.status == AttendanceStatus::Absent && confidence > upgrade_min_confidence => {
            Decision::UpgradeToPresent
        }
        Some(r) if r.status == AttendanceStatus::Present && confidence > r.confidence => {
            Decision::RefreshConfidence
        }
        Some(r) if r.status == AttendanceStatus::Present => Decision::KeepExisting,
        Some(_) => Decision::Block,
    }
}

pub struct Reconciler {
    store: Arc<dyn AttendanceStore>,
    upgrade_min_confidence: f32,
}

impl Reconciler {
    pub fn new(store: Arc<dyn AttendanceStore>, upgrade_min_confidence: f32) -> Self {
        Self {
            store,
            upgrade_min_confidence,
        }
    }

    /// Resolve one observation of `student` in `session` at `now`.
    pub fn reconcile(
        &self,
        session: &Session,
        student: &StudentEnrollment,
        confidence: f32,
        now: NaiveDateTime,
    ) -> Result<RecognitionOutcome, StoreError> {
        if student.cohort != session.cohort {
            tracing::info!(
                session_id = %session.id,
                student_id = %student.student_id,
                student_cohort = %student.cohort,
                session_cohort = %session.cohort,
                outcome = "wrong_section",
                "identity not enrolled in session cohort"
            );
            return Ok(RecognitionOutcome::WrongSection {
                student_id: student.student_id.clone(),
                student_section: student.cohort.to_string(),
                session_section: session.cohort.to_string(),
            });
        }

        let day = now.date();
        let student_id = student.student_id.as_str();

        for attempt in 0..MAX_ATTEMPTS {
            let existing = self.store.attendance(student_id, &session.id, day)?;
            let decision = decide(existing.as_ref(), confidence, self.upgrade_min_confidence);

            let outcome = match (decision, existing) {
                (Decision::Create, _) => {
                    let record = AttendanceRecord {
                        student_id: student_id.to_string(),
                        session_id: session.id.clone(),
                        day_key: day,
                        status: AttendanceStatus::Present,
                        confidence,
                        observed_at: now,
                        revision: 0,
                    };
                    match self.store.insert_attendance(&record) {
                        Ok(()) => Some(RecognitionOutcome::Recognized {
                            student_id: student_id.to_string(),
                            confidence,
                            observed_at: now,
                        }),
                        Err(StoreError::Conflict(reason)) => {
                            tracing::debug!(
                                student_id,
                                attempt,
                                %reason,
                                "insert lost race; retrying as update"
                            );
                            None
                        }
                        Err(e) => return Err(e),
                    }
                }
                (Decision::UpgradeToPresent, Some(old)) => {
                    let previous_confidence = old.confidence;
                    let updated = AttendanceRecord {
                        status: AttendanceStatus::Present,
                        confidence: confidence.max(old.confidence),
                        observed_at: now,
                        ..old
                    };
                    self.store
                        .update_attendance(&updated, updated.revision, true)?
                        .then(|| RecognitionOutcome::UpdatedToPresent {
                            student_id: student_id.to_string(),
                            confidence: updated.confidence,
                            previous_confidence,
                        })
                }
                (Decision::RefreshConfidence, Some(old)) => {
                    let previous_confidence = old.confidence;
                    let updated = AttendanceRecord {
                        confidence,
                        observed_at: now,
                        ..old
                    };
                    self.store
                        .update_attendance(&updated, updated.revision, false)?
                        .then(|| RecognitionOutcome::ConfidenceUpdated {
                            student_id: student_id.to_string(),
                            confidence,
                            previous_confidence,
                        })
                }
                (Decision::KeepExisting, Some(old)) => Some(RecognitionOutcome::AlreadyPresent {
                    student_id: student_id.to_string(),
                    confidence: old.confidence,
                    observed_confidence: confidence,
                }),
                (Decision::Block, Some(old)) => Some(RecognitionOutcome::DuplicateBlocked {
                    student_id: student_id.to_string(),
                    confidence,
                    message: format!(
                        "already marked {} today; confidence {confidence:.2} does not exceed \
                         {:.2} required to change it",
                        old.status,
                        self.upgrade_min_confidence
                    ),
                }),
                // decide() only returns Create for a missing record.
                (_, None) => None,
            };

            if let Some(outcome) = outcome {
                tracing::info!(
                    session_id = %session.id,
                    student_id,
                    confidence,
                    outcome = outcome.status(),
                    "attendance reconciled"
                );
                return Ok(outcome);
            }
        }

        Err(StoreError::Conflict(format!(
            "attendance for {student_id} in session {} kept changing; \
             gave up after {MAX_ATTEMPTS} attempts",
            session.id
        )))
    }

    /// Write an `absent` record for every enrolled student of the session's
    /// cohort who has none for `day`. Existing records are left untouched, so
    /// running it again changes nothing.
    pub fn absent_sweep(
        &self,
        session: &Session,
        day: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<AbsentSweepResult, StoreError> {
        let students = self.store.enrolled_students(&session.cohort)?;
        let mut created = 0u32;

        for student in &students {
            if self
                .store
                .attendance(&student.student_id, &session.id, day)?
                .is_some()
            {
                continue;
            }
            let record = AttendanceRecord {
                student_id: student.student_id.clone(),
                session_id: session.id.clone(),
                day_key: day,
                status: AttendanceStatus::Absent,
                confidence: 0.0,
                observed_at: now,
                revision: 0,
            };
            match self.store.insert_attendance(&record) {
                Ok(()) => created += 1,
                // Observed concurrently; their record wins.
                Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let enrolled: HashSet<&str> = students.iter().map(|s| s.student_id.as_str()).collect();
        let mut result = AbsentSweepResult {
            total_students: students.len() as u32,
            ..Default::default()
        };
        for record in self.store.session_attendance(&session.id, day)? {
            if !enrolled.contains(record.student_id.as_str()) {
                continue;
            }
            match record.status {
                AttendanceStatus::Present => result.present_count += 1,
                AttendanceStatus::Absent => result.absent_count += 1,
            }
        }

        tracing::info!(
            session_id = %session.id,
            %day,
            created,
            present = result.present_count,
            absent = result.absent_count,
            total = result.total_students,
            "absent sweep complete"
        );
        Ok(result)
    }
}
