//! In-memory attendance store.
//!
//! Thread-safe implementation using a single `RwLock`; every trait call holds
//! the lock for its whole check-then-act, which gives the same atomicity the
//! SQLite store gets from transactions. Data is lost when the store is dropped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{NaiveDate, NaiveDateTime};

use super::{AttendanceStore, Result, StoreError};
use crate::model::{
    AttendanceRecord, AttendanceStatus, Cohort, Session, SessionStatus, StudentEnrollment,
};

type RecordKey = (String, String, NaiveDate);

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    enrollments: BTreeMap<String, StudentEnrollment>,
    attendance: HashMap<RecordKey, AttendanceRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an enrollment row.
    pub fn enroll(&self, student: &StudentEnrollment) -> Result<()> {
        self.write()?
            .enrollments
            .insert(student.student_id.clone(), student.clone());
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

fn key(student_id: &str, session_id: &str, day: NaiveDate) -> RecordKey {
    (student_id.to_string(), session_id.to_string(), day)
}

impl AttendanceStore for MemoryStore {
    fn insert_session(&self, session: &Session) -> Result<()> {
        let mut inner = self.write()?;
        if inner.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {} already exists", session.id)));
        }
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.read()?.sessions.get(id).cloned())
    }

    fn transition_session(
        &self,
        id: &str,
        expected: SessionStatus,
        to: SessionStatus,
        ended_at: Option<NaiveDateTime>,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.sessions.get_mut(id) {
            Some(session) if session.status == expected => {
                session.status = to;
                session.ended_at = ended_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn first_session_started(&self, cohort: &Cohort) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .read()?
            .sessions
            .values()
            .filter(|s| &s.cohort == cohort)
            .map(|s| s.started_at)
            .min())
    }

    fn sessions_conducted(&self, cohort: &Cohort) -> Result<u32> {
        let inner = self.read()?;
        let meetings: HashSet<(&str, NaiveDate)> = inner
            .attendance
            .values()
            .filter(|r| {
                inner
                    .sessions
                    .get(&r.session_id)
                    .is_some_and(|s| &s.cohort == cohort)
            })
            .map(|r| (r.session_id.as_str(), r.day_key))
            .collect();
        Ok(meetings.len() as u32)
    }

    fn enrollment(&self, student_id: &str) -> Result<Option<StudentEnrollment>> {
        Ok(self.read()?.enrollments.get(student_id).cloned())
    }

    fn enrolled_students(&self, cohort: &Cohort) -> Result<Vec<StudentEnrollment>> {
        Ok(self
            .read()?
            .enrollments
            .values()
            .filter(|s| &s.cohort == cohort)
            .cloned()
            .collect())
    }

    fn attendance(
        &self,
        student_id: &str,
        session_id: &str,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        Ok(self
            .read()?
            .attendance
            .get(&key(student_id, session_id, day))
            .cloned())
    }

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<()> {
        let mut inner = self.write()?;
        let k = key(&record.student_id, &record.session_id, record.day_key);
        if inner.attendance.contains_key(&k) {
            return Err(StoreError::Conflict(format!(
                "attendance for {} in session {} on {} already recorded",
                record.student_id, record.session_id, record.day_key
            )));
        }

        let mut stored = record.clone();
        stored.revision = 0;
        inner.attendance.insert(k, stored);

        if record.status == AttendanceStatus::Present {
            if let Some(session) = inner.sessions.get_mut(&record.session_id) {
                session.tally += 1;
            }
        }
        Ok(())
    }

    fn update_attendance(
        &self,
        record: &AttendanceRecord,
        expected_revision: u64,
        bump_tally: bool,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        let k = key(&record.student_id, &record.session_id, record.day_key);
        match inner.attendance.get_mut(&k) {
            Some(existing) if existing.revision == expected_revision => {
                existing.status = record.status;
                existing.confidence = record.confidence;
                existing.observed_at = record.observed_at;
                existing.revision = expected_revision + 1;
            }
            _ => return Ok(false),
        }

        if bump_tally {
            if let Some(session) = inner.sessions.get_mut(&record.session_id) {
                session.tally += 1;
            }
        }
        Ok(true)
    }

    fn session_attendance(
        &self,
        session_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        let mut records: Vec<AttendanceRecord> = self
            .read()?
            .attendance
            .values()
            .filter(|r| r.session_id == session_id && r.day_key == day)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{check_attendance, check_sessions};

    #[test]
    fn test_memory_store_sessions() {
        check_sessions(&MemoryStore::new());
    }

    #[test]
    fn test_memory_store_attendance() {
        let store = MemoryStore::new();
        check_attendance(&store, |s| store.enroll(s).unwrap());
    }
}
