//! SQLite-backed attendance store.
//!
//! One connection behind a `Mutex`. The `(student_id, session_id, day_key)`
//! uniqueness constraint lives in the schema, so a second writer racing the
//! same insert gets a constraint violation, surfaced as
//! [`StoreError::Conflict`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{AttendanceStore, Result, StoreError};
use crate::model::{
    AttendanceRecord, AttendanceStatus, Cohort, Session, SessionStatus, StudentEnrollment,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS enrollments (
    student_id  TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    cohort_year TEXT NOT NULL,
    section     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_enrollments_cohort ON enrollments(cohort_year, section);

CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    owner       TEXT NOT NULL,
    cohort_year TEXT NOT NULL,
    section     TEXT NOT NULL,
    kind        TEXT NOT NULL,
    time_block  TEXT NOT NULL,
    status      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    ended_at    TEXT,
    tally       INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_sessions_cohort ON sessions(cohort_year, section);

CREATE TABLE IF NOT EXISTS attendance (
    student_id  TEXT NOT NULL,
    session_id  TEXT NOT NULL REFERENCES sessions(id),
    day_key     TEXT NOT NULL,
    status      TEXT NOT NULL,
    confidence  REAL NOT NULL,
    observed_at TEXT NOT NULL,
    revision    INTEGER NOT NULL DEFAULT 0,
    UNIQUE (student_id, session_id, day_key)
);
CREATE INDEX IF NOT EXISTS idx_attendance_session_day ON attendance(session_id, day_key);
"#;

/// Fixed-width so that text ordering matches time ordering.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const DAY_FORMAT: &str = "%Y-%m-%d";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SESSION_COLUMNS: &str =
    "id, owner, cohort_year, section, kind, time_block, status, started_at, ended_at, tally";
const ATTENDANCE_COLUMNS: &str =
    "student_id, session_id, day_key, status, confidence, observed_at, revision";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Add or replace an enrollment row. Enrollment is owned by an
    /// administrative collaborator; this is its seeding entry point.
    pub fn enroll(&self, student: &StudentEnrollment) -> Result<()> {
        self.lock()?.execute(
            r#"
            INSERT INTO enrollments (student_id, name, cohort_year, section)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(student_id) DO UPDATE SET
                name = excluded.name,
                cohort_year = excluded.cohort_year,
                section = excluded.section
            "#,
            params![
                student.student_id,
                student.name,
                student.cohort.year,
                student.cohort.section,
            ],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl AttendanceStore for SqliteStore {
    fn insert_session(&self, session: &Session) -> Result<()> {
        let sql = format!(
            "INSERT INTO sessions ({SESSION_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        );
        self.lock()?
            .execute(
                &sql,
                params![
                    session.id,
                    session.owner,
                    session.cohort.year,
                    session.cohort.section,
                    session.kind.as_str(),
                    session.time_block.as_str(),
                    session.status.as_str(),
                    fmt_ts(session.started_at),
                    session.ended_at.map(fmt_ts),
                    session.tally,
                ],
            )
            .map_err(map_constraint)?;
        Ok(())
    }

    fn session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                read_session_row,
            )
            .optional()?;
        row.map(decode_session).transpose()
    }

    fn transition_session(
        &self,
        id: &str,
        expected: SessionStatus,
        to: SessionStatus,
        ended_at: Option<NaiveDateTime>,
    ) -> Result<bool> {
        let changed = self.lock()?.execute(
            "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE id = ?3 AND status = ?4",
            params![to.as_str(), ended_at.map(fmt_ts), id, expected.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn first_session_started(&self, cohort: &Cohort) -> Result<Option<NaiveDateTime>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn.query_row(
            "SELECT MIN(started_at) FROM sessions WHERE cohort_year = ?1 AND section = ?2",
            params![cohort.year, cohort.section],
            |row| row.get(0),
        )?;
        raw.as_deref().map(parse_ts).transpose()
    }

    fn sessions_conducted(&self, cohort: &Cohort) -> Result<u32> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM (
                SELECT DISTINCT a.session_id, a.day_key
                FROM attendance a
                JOIN sessions s ON s.id = a.session_id
                WHERE s.cohort_year = ?1 AND s.section = ?2
            )
            "#,
            params![cohort.year, cohort.section],
            |row| row.get(0),
        )?;
        u32::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("meeting count {count}")))
    }

    fn enrollment(&self, student_id: &str) -> Result<Option<StudentEnrollment>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                r#"
                SELECT student_id, name, cohort_year, section FROM enrollments
                WHERE student_id = ?1
                "#,
                params![student_id],
                read_enrollment_row,
            )
            .optional()?)
    }

    fn enrolled_students(&self, cohort: &Cohort) -> Result<Vec<StudentEnrollment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT student_id, name, cohort_year, section FROM enrollments
            WHERE cohort_year = ?1 AND section = ?2
            ORDER BY student_id
            "#,
        )?;
        let rows = stmt.query_map(params![cohort.year, cohort.section], read_enrollment_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn attendance(
        &self,
        student_id: &str,
        session_id: &str,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        let sql = format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance \
             WHERE student_id = ?1 AND session_id = ?2 AND day_key = ?3"
        );
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &sql,
                params![student_id, session_id, fmt_day(day)],
                read_attendance_row,
            )
            .optional()?;
        row.map(decode_attendance).transpose()
    }

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO attendance ({ATTENDANCE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)"
        );
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            &sql,
            params![
                record.student_id,
                record.session_id,
                fmt_day(record.day_key),
                record.status.as_str(),
                record.confidence as f64,
                fmt_ts(record.observed_at),
            ],
        )
        .map_err(map_constraint)?;

        if record.status == AttendanceStatus::Present {
            tx.execute(
                "UPDATE sessions SET tally = tally + 1 WHERE id = ?1",
                params![record.session_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update_attendance(
        &self,
        record: &AttendanceRecord,
        expected_revision: u64,
        bump_tally: bool,
    ) -> Result<bool> {
        let expected = i64::try_from(expected_revision).map_err(|_| {
            StoreError::Corrupt(format!("revision {expected_revision} out of range"))
        })?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE attendance
            SET status = ?1, confidence = ?2, observed_at = ?3, revision = revision + 1
            WHERE student_id = ?4 AND session_id = ?5 AND day_key = ?6 AND revision = ?7
            "#,
            params![
                record.status.as_str(),
                record.confidence as f64,
                fmt_ts(record.observed_at),
                record.student_id,
                record.session_id,
                fmt_day(record.day_key),
                expected,
            ],
        )?;
        if changed != 1 {
            return Ok(false);
        }

        if bump_tally {
            tx.execute(
                "UPDATE sessions SET tally = tally + 1 WHERE id = ?1",
                params![record.session_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn session_attendance(
        &self,
        session_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance \
             WHERE session_id = ?1 AND day_key = ?2 ORDER BY student_id"
        ))?;
        let rows = stmt.query_map(params![session_id, fmt_day(day)], read_attendance_row)?;
        let raw = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(decode_attendance).collect()
    }
}

// --- Row decoding ---
//
// rusqlite closures can only fail with rusqlite errors, so rows are read as
// raw columns first and parsed into domain types afterwards.

struct SessionRow {
    id: String,
    owner: String,
    cohort_year: String,
    section: String,
    kind: String,
    time_block: String,
    status: String,
    started_at: String,
    ended_at: Option<String>,
    tally: i64,
}

fn read_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        cohort_year: row.get(2)?,
        section: row.get(3)?,
        kind: row.get(4)?,
        time_block: row.get(5)?,
        status: row.get(6)?,
        started_at: row.get(7)?,
        ended_at: row.get(8)?,
        tally: row.get(9)?,
    })
}

fn decode_session(row: SessionRow) -> Result<Session> {
    Ok(Session {
        kind: row.kind.parse().map_err(StoreError::Corrupt)?,
        time_block: row.time_block.parse().map_err(StoreError::Corrupt)?,
        status: row.status.parse().map_err(StoreError::Corrupt)?,
        started_at: parse_ts(&row.started_at)?,
        ended_at: row.ended_at.as_deref().map(parse_ts).transpose()?,
        tally: u32::try_from(row.tally)
            .map_err(|_| StoreError::Corrupt(format!("tally {}", row.tally)))?,
        cohort: Cohort::new(row.cohort_year, row.section),
        id: row.id,
        owner: row.owner,
    })
}

struct AttendanceRow {
    student_id: String,
    session_id: String,
    day_key: String,
    status: String,
    confidence: f64,
    observed_at: String,
    revision: i64,
}

fn read_attendance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        student_id: row.get(0)?,
        session_id: row.get(1)?,
        day_key: row.get(2)?,
        status: row.get(3)?,
        confidence: row.get(4)?,
        observed_at: row.get(5)?,
        revision: row.get(6)?,
    })
}

fn decode_attendance(row: AttendanceRow) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        day_key: NaiveDate::parse_from_str(&row.day_key, DAY_FORMAT)
            .map_err(|e| StoreError::Corrupt(format!("day_key {:?}: {e}", row.day_key)))?,
        status: row.status.parse().map_err(StoreError::Corrupt)?,
        confidence: row.confidence as f32,
        observed_at: parse_ts(&row.observed_at)?,
        revision: u64::try_from(row.revision)
            .map_err(|_| StoreError::Corrupt(format!("revision {}", row.revision)))?,
        student_id: row.student_id,
        session_id: row.session_id,
    })
}

fn read_enrollment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentEnrollment> {
    Ok(StudentEnrollment {
        student_id: row.get(0)?,
        name: row.get(1)?,
        cohort: Cohort::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
    })
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

fn fmt_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Unique and primary-key violations are conflicts; other constraint
/// failures (foreign keys, NOT NULL) stay plain SQLite errors.
fn map_constraint(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg)
            if e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
        {
            StoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => StoreError::Sqlite(err),
    }
}
