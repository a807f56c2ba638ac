//! Storage boundary for sessions, enrollment and attendance.
//!
//! The engine never assumes exclusive access to the store. Inserts are
//! guarded by the `(student_id, session_id, day_key)` uniqueness constraint
//! and report [`StoreError::Conflict`] when a concurrent writer got there
//! first; updates are compare-and-set and report whether they applied.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{AttendanceRecord, Cohort, Session, SessionStatus, StudentEnrollment};
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait AttendanceStore: Send + Sync {
    fn insert_session(&self, session: &Session) -> Result<()>;

    fn session(&self, id: &str) -> Result<Option<Session>>;

    /// Move a session to `to` only if it is currently `expected`. Sets
    /// `ended_at` to the given value (clearing it on `None`). Returns whether
    /// the transition applied.
    fn transition_session(
        &self,
        id: &str,
        expected: SessionStatus,
        to: SessionStatus,
        ended_at: Option<NaiveDateTime>,
    ) -> Result<bool>;

    /// Earliest `started_at` among the cohort's sessions.
    fn first_session_started(&self, cohort: &Cohort) -> Result<Option<NaiveDateTime>>;

    /// Distinct (session, day) meetings of the cohort with at least one record.
    fn sessions_conducted(&self, cohort: &Cohort) -> Result<u32>;

    fn enrollment(&self, student_id: &str) -> Result<Option<StudentEnrollment>>;

    fn enrolled_students(&self, cohort: &Cohort) -> Result<Vec<StudentEnrollment>>;

    fn attendance(
        &self,
        student_id: &str,
        session_id: &str,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRecord>>;

    /// Insert a new record, bumping the session tally if it is `present`, as
    /// one atomic step. Fails with [`StoreError::Conflict`] if a record for the
    /// same (student, session, day) exists.
    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<()>;

    /// Overwrite status, confidence and timestamp of an existing record if its
    /// revision still equals `expected_revision`, optionally bumping the
    /// session tally in the same step. Returns whether the update applied.
    fn update_attendance(
        &self,
        record: &AttendanceRecord,
        expected_revision: u64,
        bump_tally: bool,
    ) -> Result<bool>;

    /// Records for a session on one day, ordered by student id.
    fn session_attendance(
        &self,
        session_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>>;
}

impl<T: AttendanceStore + ?Sized> AttendanceStore for Arc<T> {
    fn insert_session(&self, session: &Session) -> Result<()> {
        (**self).insert_session(session)
    }

    fn session(&self, id: &str) -> Result<Option<Session>> {
        (**self).session(id)
    }

    fn transition_session(
        &self,
        id: &str,
        expected: SessionStatus,
        to: SessionStatus,
        ended_at: Option<NaiveDateTime>,
    ) -> Result<bool> {
        (**self).transition_session(id, expected, to, ended_at)
    }

    fn first_session_started(&self, cohort: &Cohort) -> Result<Option<NaiveDateTime>> {
        (**self).first_session_started(cohort)
    }

    fn sessions_conducted(&self, cohort: &Cohort) -> Result<u32> {
        (**self).sessions_conducted(cohort)
    }

    fn enrollment(&self, student_id: &str) -> Result<Option<StudentEnrollment>> {
        (**self).enrollment(student_id)
    }

    fn enrolled_students(&self, cohort: &Cohort) -> Result<Vec<StudentEnrollment>> {
        (**self).enrolled_students(cohort)
    }

    fn attendance(
        &self,
        student_id: &str,
        session_id: &str,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        (**self).attendance(student_id, session_id, day)
    }

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<()> {
        (**self).insert_attendance(record)
    }

    fn update_attendance(
        &self,
        record: &AttendanceRecord,
        expected_revision: u64,
        bump_tally: bool,
    ) -> Result<bool> {
        (**self).update_attendance(record, expected_revision, bump_tally)
    }

    fn session_attendance(
        &self,
        session_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        (**self).session_attendance(session_id, day)
    }
}

/// Conformance checks shared by every store implementation.
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{AttendanceStatus, SessionKind, TimeBlock};

    pub(crate) fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    pub(crate) fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, 0).unwrap()
    }

    pub(crate) fn student(id: &str, cohort: &Cohort) -> StudentEnrollment {
        StudentEnrollment {
            student_id: id.into(),
            name: format!("Student {id}"),
            cohort: cohort.clone(),
        }
    }

    pub(crate) fn record(
        student_id: &str,
        session_id: &str,
        when: NaiveDateTime,
        status: AttendanceStatus,
        confidence: f32,
    ) -> AttendanceRecord {
        AttendanceRecord {
            student_id: student_id.into(),
            session_id: session_id.into(),
            day_key: when.date(),
            status,
            confidence,
            observed_at: when,
            revision: 0,
        }
    }

    fn tally<S: AttendanceStore>(store: &S, session_id: &str) -> u32 {
        store.session(session_id).unwrap().unwrap().tally
    }

    pub(crate) fn check_sessions<S: AttendanceStore>(store: &S) {
        use SessionStatus::{Active, StoppedDaily};

        let cohort = Cohort::new("2025", "A");
        let session = Session::new(
            "t1",
            cohort.clone(),
            SessionKind::Lab,
            TimeBlock::Morning,
            at(3, 9, 0),
        );
        let id = session.id.as_str();
        assert!(store.session(id).unwrap().is_none());
        store.insert_session(&session).unwrap();
        assert_eq!(store.session(id).unwrap().unwrap(), session);

        let transition = |from, to, ended_at| {
            store.transition_session(id, from, to, ended_at).unwrap()
        };

        // Wrong expected status does not apply.
        assert!(!transition(StoppedDaily, Active, None));
        assert!(transition(Active, StoppedDaily, Some(at(3, 11, 0))));
        // Second identical transition loses the race.
        assert!(!transition(Active, StoppedDaily, Some(at(3, 11, 5))));
        let stopped = store.session(id).unwrap().unwrap();
        assert_eq!(stopped.status, StoppedDaily);
        assert_eq!(stopped.ended_at, Some(at(3, 11, 0)));

        assert!(transition(StoppedDaily, Active, None));
        assert!(store.session(id).unwrap().unwrap().ended_at.is_none());

        let later = Session::new(
            "t2",
            cohort.clone(),
            SessionKind::Theory,
            TimeBlock::Afternoon,
            at(10, 14, 0),
        );
        store.insert_session(&later).unwrap();
        let first = store.first_session_started(&cohort).unwrap();
        assert_eq!(first, Some(at(3, 9, 0)));
        let other = Cohort::new("2025", "B");
        assert_eq!(store.first_session_started(&other).unwrap(), None);
    }

    pub(crate) fn check_attendance<S: AttendanceStore>(
        store: &S,
        enroll: impl Fn(&StudentEnrollment),
    ) {
        use AttendanceStatus::{Absent, Present};

        let cohort = Cohort::new("2025", "A");
        let session = Session::new(
            "t1",
            cohort.clone(),
            SessionKind::Lab,
            TimeBlock::Morning,
            at(3, 9, 0),
        );
        let id = session.id.as_str();
        store.insert_session(&session).unwrap();

        enroll(&student("s2", &cohort));
        enroll(&student("s1", &cohort));
        enroll(&student("x9", &Cohort::new("2025", "B")));
        assert_eq!(store.enrollment("s1").unwrap().unwrap().cohort, cohort);
        assert!(store.enrollment("nobody").unwrap().is_none());
        let ids: Vec<String> = store
            .enrolled_students(&cohort)
            .unwrap()
            .into_iter()
            .map(|s| s.student_id)
            .collect();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);

        let first = record("s1", id, at(3, 9, 5), Present, 0.55);
        store.insert_attendance(&first).unwrap();
        assert_eq!(tally(store, id), 1);

        // Same triple again is a conflict and leaves the tally alone.
        let dup = record("s1", id, at(3, 9, 6), Present, 0.9);
        assert!(matches!(store.insert_attendance(&dup), Err(StoreError::Conflict(_))));
        assert_eq!(tally(store, id), 1);

        // Absent rows do not count towards the tally.
        let absent = record("s2", id, at(3, 9, 7), Absent, 0.0);
        store.insert_attendance(&absent).unwrap();
        assert_eq!(tally(store, id), 1);

        let stored = store.attendance("s1", id, day(3)).unwrap().unwrap();
        assert_eq!(stored.revision, 0);
        let mut refreshed = stored.clone();
        refreshed.confidence = 0.7;
        refreshed.observed_at = at(3, 9, 10);
        assert!(store.update_attendance(&refreshed, 0, false).unwrap());
        // Stale revision is refused.
        assert!(!store.update_attendance(&refreshed, 0, false).unwrap());
        let stored = store.attendance("s1", id, day(3)).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.confidence, 0.7);
        assert_eq!(stored.observed_at, at(3, 9, 10));

        let mut upgraded = store.attendance("s2", id, day(3)).unwrap().unwrap();
        upgraded.status = Present;
        upgraded.confidence = 0.6;
        assert!(store.update_attendance(&upgraded, 0, true).unwrap());
        assert_eq!(tally(store, id), 2);

        // A different day is a different canonical record.
        let next_day = record("s1", id, at(4, 9, 0), Present, 0.8);
        store.insert_attendance(&next_day).unwrap();
        let listed: Vec<String> = store
            .session_attendance(id, day(3))
            .unwrap()
            .into_iter()
            .map(|r| r.student_id)
            .collect();
        assert_eq!(listed, vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(store.session_attendance(id, day(4)).unwrap().len(), 1);

        // Two days of one session count as two meetings.
        assert_eq!(store.sessions_conducted(&cohort).unwrap(), 2);
        let other = Cohort::new("2025", "B");
        assert_eq!(store.sessions_conducted(&other).unwrap(), 0);
    }
}
