//! Session status state machine.
//!
//! ```text
//! active ──stop──▶ stopped_daily ──reopen (same block, cooldown over)──▶ active
//!   │
//!   └──end semester (min days AND min meetings)──▶ ended_semester (terminal)
//! ```
//!
//! Every transition is applied as a compare-and-set on the status read just
//! before it, so two concurrent callers cannot both apply the same change.

use crate::clock::Clock;
use crate::hours::{Admission, Period};
use crate::model::{AttendanceRecord, Cohort, Session, SessionKind, SessionStatus, TimeBlock};
use crate::outcome::{AbsentSweepResult, SessionTransitionResult};
use crate::policy::AttendancePolicy;
use crate::reconcile::Reconciler;
use crate::store::{AttendanceStore, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Why a reopen cannot happen right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum ReopenBlocker {
    NotStopped { status: SessionStatus },
    OutsideMatchingTimeBlock {
        required: TimeBlock,
        current: Period,
        next_window: TimeBlock,
        next_window_start: NaiveDateTime,
        minutes_until_next: i64,
    },
    InsufficientElapsedTime {
        cooldown_hours: i64,
        hours_remaining: f64,
    },
}

impl fmt::Display for ReopenBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStopped { status } => {
                write!(f, "session is {status}, not stopped for the day")
            }
            Self::OutsideMatchingTimeBlock {
                required,
                current,
                next_window_start,
                minutes_until_next,
                ..
            } => write!(
                f,
                "reopen outside matching time block (session is {required}, now {current}; \
                 {required} opens at {} in {minutes_until_next} minutes)",
                next_window_start.format("%Y-%m-%d %H:%M")
            ),
            Self::InsufficientElapsedTime {
                cooldown_hours,
                hours_remaining,
            } => write!(
                f,
                "insufficient elapsed time \
                 ({hours_remaining:.1}h of the {cooldown_hours}h cooldown remaining)"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum SemesterRequirement {
    InsufficientElapsedTime {
        required_days: i64,
        elapsed_days: i64,
    },
    InsufficientSessionCount { required: u32, conducted: u32 },
}

impl fmt::Display for SemesterRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientElapsedTime {
                required_days,
                elapsed_days,
            } => write!(
                f,
                "insufficient elapsed time ({elapsed_days} of {required_days} days)"
            ),
            Self::InsufficientSessionCount {
                required,
                conducted,
            } => write!(
                f,
                "insufficient session count ({conducted} of {required} sessions)"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReopenEligibility {
    pub session_id: String,
    pub can_reopen: bool,
    pub current_period: Period,
    pub hours_remaining: f64,
    pub blockers: Vec<ReopenBlocker>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemesterEligibility {
    pub session_id: String,
    pub can_end_semester: bool,
    pub first_session_at: NaiveDateTime,
    pub days_elapsed: i64,
    pub days_remaining: i64,
    pub sessions_conducted: u32,
    pub sessions_remaining: u32,
    pub unmet: Vec<SemesterRequirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopReport {
    #[serde(flatten)]
    pub transition: SessionTransitionResult,
    pub sweep: AbsentSweepResult,
}

#[derive(Error, Debug, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SessionError {
    #[error("session {session_id} not found")]
    NotFound { session_id: String },
    #[error("{message}")]
    OutsideWorkingHours {
        period: Period,
        next_window: TimeBlock,
        minutes_until_next: i64,
        message: String,
    },
    #[error("cannot start a {requested} session during {current}")]
    TimeBlockMismatch {
        requested: TimeBlock,
        current: Period,
    },
    #[error("session {session_id} is {current}; cannot move to {requested}")]
    InvalidTransition {
        session_id: String,
        current: SessionStatus,
        requested: SessionStatus,
    },
    #[error("cannot reopen session {session_id}: {}", join(.blockers))]
    ReopenIneligible {
        session_id: String,
        blockers: Vec<ReopenBlocker>,
    },
    #[error(
        "cannot end semester for session {}: {}",
        .report.session_id,
        join(.report.unmet.as_slice())
    )]
    SemesterEndIneligible { report: SemesterEligibility },
    #[error("storage: {source}")]
    Storage {
        #[from]
        #[serde(serialize_with = "as_display")]
        source: StoreError,
    },
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn as_display<T: fmt::Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

pub struct SessionManager {
    store: Arc<dyn AttendanceStore>,
    policy: AttendancePolicy,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        policy: AttendancePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store), policy.upgrade_min_confidence);
        Self {
            store,
            policy,
            clock,
            reconciler,
        }
    }

    pub fn session(&self, id: &str) -> Result<Session, SessionError> {
        self.store.session(id)?.ok_or_else(|| SessionError::NotFound {
            session_id: id.to_string(),
        })
    }

    /// Open a new session. Allowed only inside a working window whose period
    /// is the requested block.
    pub fn start_session(
        &self,
        owner: &str,
        cohort: Cohort,
        kind: SessionKind,
        time_block: TimeBlock,
    ) -> Result<Session, SessionError> {
        let now = self.clock.now();
        match self.policy.hours.admission(now) {
            Admission::Blocked {
                period,
                next_window,
                minutes_until_next,
                message,
                ..
            } => {
                tracing::info!(owner, %period, "session start outside working hours");
                return Err(SessionError::OutsideWorkingHours {
                    period,
                    next_window,
                    minutes_until_next,
                    message,
                });
            }
            Admission::Open { period, block } if block != time_block => {
                return Err(SessionError::TimeBlockMismatch {
                    requested: time_block,
                    current: period,
                });
            }
            Admission::Open { .. } => {}
        }

        let session = Session::new(owner, cohort, kind, time_block, now);
        self.store.insert_session(&session)?;
        tracing::info!(
            session_id = %session.id,
            owner,
            cohort = %session.cohort,
            kind = %session.kind,
            time_block = %session.time_block,
            "session started"
        );
        Ok(session)
    }

    /// `active → stopped_daily`, then backfill absences for today.
    pub fn stop_for_day(&self, id: &str) -> Result<StopReport, SessionError> {
        let now = self.clock.now();
        let session = self.session(id)?;
        let transition = self.apply(
            &session,
            SessionStatus::Active,
            SessionStatus::StoppedDaily,
            Some(now),
        )?;
        let sweep = self.reconciler.absent_sweep(&session, now.date(), now)?;
        Ok(StopReport { transition, sweep })
    }

    /// `stopped_daily → active`, guarded by time block and cooldown.
    pub fn reopen(&self, id: &str) -> Result<SessionTransitionResult, SessionError> {
        let session = self.session(id)?;
        if session.status != SessionStatus::StoppedDaily {
            return Err(SessionError::InvalidTransition {
                session_id: session.id,
                current: session.status,
                requested: SessionStatus::Active,
            });
        }

        let eligibility = self.reopen_check(&session, self.clock.now());
        if !eligibility.can_reopen {
            tracing::info!(
                session_id = %session.id,
                blockers = ?eligibility.blockers,
                "reopen refused"
            );
            return Err(SessionError::ReopenIneligible {
                session_id: session.id,
                blockers: eligibility.blockers,
            });
        }

        self.apply(
            &session,
            SessionStatus::StoppedDaily,
            SessionStatus::Active,
            None,
        )
    }

    /// `active → ended_semester`, guarded by minimum duration and meetings.
    pub fn end_semester(&self, id: &str) -> Result<SessionTransitionResult, SessionError> {
        let session = self.session(id)?;
        if session.status != SessionStatus::Active {
            return Err(SessionError::InvalidTransition {
                session_id: session.id,
                current: session.status,
                requested: SessionStatus::EndedSemester,
            });
        }

        let now = self.clock.now();
        let report = self.semester_check(&session, now)?;
        if !report.can_end_semester {
            tracing::info!(
                session_id = %session.id,
                unmet = ?report.unmet,
                "semester end refused"
            );
            return Err(SessionError::SemesterEndIneligible { report });
        }

        self.apply(
            &session,
            SessionStatus::Active,
            SessionStatus::EndedSemester,
            Some(now),
        )
    }

    pub fn reopen_eligibility(&self, id: &str) -> Result<ReopenEligibility, SessionError> {
        let session = self.session(id)?;
        Ok(self.reopen_check(&session, self.clock.now()))
    }

    pub fn semester_eligibility(&self, id: &str) -> Result<SemesterEligibility, SessionError> {
        let session = self.session(id)?;
        self.semester_check(&session, self.clock.now())
    }

    /// Records for the session on `day` (today if `None`).
    pub fn attendance(
        &self,
        id: &str,
        day: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, SessionError> {
        let session = self.session(id)?;
        let day = day.unwrap_or_else(|| self.clock.now().date());
        Ok(self.store.session_attendance(&session.id, day)?)
    }

    fn reopen_check(&self, session: &Session, now: NaiveDateTime) -> ReopenEligibility {
        let current_period = self.policy.hours.period_at(now.time());
        let cooldown_minutes = self.policy.reopen_cooldown_hours * 60;
        let stopped_at = session.ended_at.unwrap_or(session.started_at);
        let elapsed_minutes = (now - stopped_at).num_minutes();
        let hours_remaining = (cooldown_minutes - elapsed_minutes).max(0) as f64 / 60.0;

        let mut blockers = Vec::new();
        if session.status != SessionStatus::StoppedDaily {
            blockers.push(ReopenBlocker::NotStopped {
                status: session.status,
            });
        }
        if current_period.time_block() != Some(session.time_block) {
            let next_window_start = self.policy.hours.next_opening(session.time_block, now);
            blockers.push(ReopenBlocker::OutsideMatchingTimeBlock {
                required: session.time_block,
                current: current_period,
                next_window: session.time_block,
                next_window_start,
                minutes_until_next: (next_window_start - now).num_minutes(),
            });
        }
        if elapsed_minutes < cooldown_minutes {
            blockers.push(ReopenBlocker::InsufficientElapsedTime {
                cooldown_hours: self.policy.reopen_cooldown_hours,
                hours_remaining,
            });
        }

        ReopenEligibility {
            session_id: session.id.clone(),
            can_reopen: blockers.is_empty(),
            current_period,
            hours_remaining,
            blockers,
        }
    }

    fn semester_check(
        &self,
        session: &Session,
        now: NaiveDateTime,
    ) -> Result<SemesterEligibility, SessionError> {
        let first_session_at = self
            .store
            .first_session_started(&session.cohort)?
            .unwrap_or(session.started_at);
        let days_elapsed = (now - first_session_at).num_days();
        let sessions_conducted = self.store.sessions_conducted(&session.cohort)?;

        let required_days = self.policy.semester_min_days;
        let required_sessions = self.policy.semester_min_sessions;

        let mut unmet = Vec::new();
        if days_elapsed < required_days {
            unmet.push(SemesterRequirement::InsufficientElapsedTime {
                required_days,
                elapsed_days: days_elapsed,
            });
        }
        if sessions_conducted < required_sessions {
            unmet.push(SemesterRequirement::InsufficientSessionCount {
                required: required_sessions,
                conducted: sessions_conducted,
            });
        }

        Ok(SemesterEligibility {
            session_id: session.id.clone(),
            can_end_semester: unmet.is_empty(),
            first_session_at,
            days_elapsed,
            days_remaining: (required_days - days_elapsed).max(0),
            sessions_conducted,
            sessions_remaining: required_sessions.saturating_sub(sessions_conducted),
            unmet,
        })
    }

    /// Compare-and-set the status. A lost race re-reads and reports the
    /// status that won.
    fn apply(
        &self,
        session: &Session,
        expected: SessionStatus,
        to: SessionStatus,
        ended_at: Option<NaiveDateTime>,
    ) -> Result<SessionTransitionResult, SessionError> {
        if self
            .store
            .transition_session(&session.id, expected, to, ended_at)?
        {
            tracing::info!(
                session_id = %session.id,
                from = %expected,
                to = %to,
                "session transition applied"
            );
            return Ok(SessionTransitionResult {
                session_id: session.id.clone(),
                previous_status: expected,
                new_status: to,
            });
        }

        let current = self.session(&session.id)?.status;
        tracing::warn!(
            session_id = %session.id,
            %current,
            requested = %to,
            "session transition lost race"
        );
        Err(SessionError::InvalidTransition {
            session_id: session.id.clone(),
            current,
            requested: to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::AttendanceStatus;
    use crate::store::tests::student;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        manager: SessionManager,
        cohort: Cohort,
    }

    impl Fixture {
        fn start(&self, kind: SessionKind, block: TimeBlock) -> Result<Session, SessionError> {
            self.manager
                .start_session("t1", self.cohort.clone(), kind, block)
        }
    }

    fn fixture(now: NaiveDateTime) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let cohort = Cohort::new("2025", "A");
        for id in ["s1", "s2", "s3"] {
            store.enroll(&student(id, &cohort)).unwrap();
        }
        let policy = AttendancePolicy::default();
        let manager = SessionManager::new(store.clone(), policy, clock.clone());
        Fixture {
            store,
            clock,
            manager,
            cohort,
        }
    }

    fn mark_present(store: &MemoryStore, session: &Session, when: NaiveDateTime) {
        store
            .insert_attendance(&AttendanceRecord {
                student_id: "s1".into(),
                session_id: session.id.clone(),
                day_key: when.date(),
                status: AttendanceStatus::Present,
                confidence: 0.9,
                observed_at: when,
                revision: 0,
            })
            .unwrap();
    }

    #[test]
    fn test_start_session_gating() {
        let f = fixture(at(2025, 1, 6, 9, 0));
        let session = f.start(SessionKind::Lab, TimeBlock::Morning).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.started_at, at(2025, 1, 6, 9, 0));

        let err = f.start(SessionKind::Lab, TimeBlock::Afternoon).unwrap_err();
        assert!(matches!(
            err,
            SessionError::TimeBlockMismatch {
                current: Period::Morning,
                ..
            }
        ));

        f.clock.set(at(2025, 1, 6, 12, 45));
        let err = f.start(SessionKind::Lab, TimeBlock::Afternoon).unwrap_err();
        match err {
            SessionError::OutsideWorkingHours {
                period,
                next_window,
                minutes_until_next,
                ..
            } => {
                assert_eq!(period, Period::LunchBreak);
                assert_eq!(next_window, TimeBlock::Afternoon);
                assert_eq!(minutes_until_next, 45);
            }
            other => panic!("expected OutsideWorkingHours, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_sweeps_and_cannot_repeat() {
        let f = fixture(at(2025, 1, 6, 9, 0));
        let session = f.start(SessionKind::Theory, TimeBlock::Morning).unwrap();
        mark_present(&f.store, &session, at(2025, 1, 6, 9, 10));

        f.clock.set(at(2025, 1, 6, 11, 0));
        let report = f.manager.stop_for_day(&session.id).unwrap();
        assert_eq!(report.transition.previous_status, SessionStatus::Active);
        assert_eq!(report.transition.new_status, SessionStatus::StoppedDaily);
        assert_eq!(
            report.sweep,
            AbsentSweepResult {
                present_count: 1,
                absent_count: 2,
                total_students: 3,
            }
        );
        let stopped = f.manager.session(&session.id).unwrap();
        assert_eq!(stopped.ended_at, Some(at(2025, 1, 6, 11, 0)));

        let err = f.manager.stop_for_day(&session.id).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                current: SessionStatus::StoppedDaily,
                ..
            }
        ));
        assert_eq!(f.manager.attendance(&session.id, None).unwrap().len(), 3);
    }

    #[test]
    fn test_reopen_blocker_points_to_next_matching_window() {
        let f = fixture(at(2025, 1, 6, 9, 0));
        let session = f.start(SessionKind::Theory, TimeBlock::Morning).unwrap();
        f.manager.stop_for_day(&session.id).unwrap();

        // Afternoon of the next day: cooldown is over, the block is not.
        f.clock.set(at(2025, 1, 7, 16, 0));
        let err = f.manager.reopen(&session.id).unwrap_err();
        let blockers = match &err {
            SessionError::ReopenIneligible { blockers, .. } => blockers.clone(),
            other => panic!("expected ReopenIneligible, got {other:?}"),
        };
        match &blockers[..] {
            [ReopenBlocker::OutsideMatchingTimeBlock {
                next_window,
                next_window_start,
                minutes_until_next,
                ..
            }] => {
                assert_eq!(*next_window, TimeBlock::Morning);
                assert_eq!(*next_window_start, at(2025, 1, 8, 8, 30));
                assert_eq!(*minutes_until_next, 990);
            }
            other => panic!("expected a single time block blocker, got {other:?}"),
        }

        let json = serde_json::to_value(&err).unwrap();
        let blocker = &json["blockers"][0];
        assert_eq!(blocker["condition"], "outside_matching_time_block");
        assert_eq!(blocker["next_window"], "morning");
        assert_eq!(blocker["next_window_start"], "2025-01-08T08:30:00");
        assert_eq!(blocker["minutes_until_next"], 990);
        let message = err.to_string();
        assert!(message.contains("morning opens at 2025-01-08 08:30 in 990 minutes"));
    }

    #[test]
    fn test_reopen_blockers_are_independent() {
        let f = fixture(at(2025, 1, 6, 9, 0));
        let session = f.start(SessionKind::Theory, TimeBlock::Morning).unwrap();
        f.clock.set(at(2025, 1, 6, 11, 0));
        f.manager.stop_for_day(&session.id).unwrap();

        // Same block, cooldown not over.
        f.clock.set(at(2025, 1, 6, 11, 30));
        let e = f.manager.reopen_eligibility(&session.id).unwrap();
        assert!(!e.can_reopen);
        assert_eq!(e.blockers.len(), 1);
        assert!(matches!(
            e.blockers[0],
            ReopenBlocker::InsufficientElapsedTime { .. }
        ));
        assert!((e.hours_remaining - 11.5).abs() < 1e-9);

        // Cooldown over, wrong block.
        f.clock.set(at(2025, 1, 7, 14, 0));
        let e = f.manager.reopen_eligibility(&session.id).unwrap();
        assert_eq!(
            e.blockers,
            vec![ReopenBlocker::OutsideMatchingTimeBlock {
                required: TimeBlock::Morning,
                current: Period::Afternoon,
                next_window: TimeBlock::Morning,
                next_window_start: at(2025, 1, 8, 8, 30),
                minutes_until_next: 1110,
            }]
        );
        assert_eq!(e.hours_remaining, 0.0);

        // Both.
        f.clock.set(at(2025, 1, 6, 12, 45));
        match f.manager.reopen(&session.id).unwrap_err() {
            SessionError::ReopenIneligible { blockers, .. } => assert_eq!(blockers.len(), 2),
            other => panic!("expected ReopenIneligible, got {other:?}"),
        }

        // Next morning, 22h later.
        f.clock.set(at(2025, 1, 7, 9, 0));
        let result = f.manager.reopen(&session.id).unwrap();
        assert_eq!(result.previous_status, SessionStatus::StoppedDaily);
        assert_eq!(result.new_status, SessionStatus::Active);
        assert!(f.manager.session(&session.id).unwrap().ended_at.is_none());

        // Reopening an active session is not a thing.
        assert!(matches!(
            f.manager.reopen(&session.id).unwrap_err(),
            SessionError::InvalidTransition {
                current: SessionStatus::Active,
                ..
            }
        ));
    }

    /// One session per week, one meeting each.
    fn run_weeks(f: &Fixture, start: NaiveDateTime, weeks: i64) -> Session {
        f.clock.set(start);
        let session = f.start(SessionKind::Lab, TimeBlock::Morning).unwrap();
        for w in 0..weeks {
            mark_present(&f.store, &session, start + Duration::weeks(w));
        }
        session
    }

    #[test]
    fn test_semester_end_requires_days() {
        let f = fixture(at(2025, 1, 6, 9, 0));
        let session = run_weeks(&f, at(2025, 1, 6, 9, 0), 10);

        f.clock.set(at(2025, 1, 6, 9, 0) + Duration::days(119));
        let report = f.manager.semester_eligibility(&session.id).unwrap();
        assert!(!report.can_end_semester);
        assert_eq!(report.days_remaining, 1);
        assert_eq!(report.sessions_conducted, 10);
        assert_eq!(report.sessions_remaining, 0);
        assert_eq!(
            report.unmet,
            vec![SemesterRequirement::InsufficientElapsedTime {
                required_days: 120,
                elapsed_days: 119,
            }]
        );
        assert!(matches!(
            f.manager.end_semester(&session.id).unwrap_err(),
            SessionError::SemesterEndIneligible { .. }
        ));
        let unchanged = f.manager.session(&session.id).unwrap();
        assert_eq!(unchanged.status, SessionStatus::Active);
    }

    #[test]
    fn test_semester_end_requires_sessions() {
        let f = fixture(at(2025, 1, 6, 9, 0));
        let session = run_weeks(&f, at(2025, 1, 6, 9, 0), 7);

        f.clock.set(at(2025, 1, 6, 9, 0) + Duration::days(130));
        let report = f.manager.semester_eligibility(&session.id).unwrap();
        assert_eq!(
            report.unmet,
            vec![SemesterRequirement::InsufficientSessionCount {
                required: 8,
                conducted: 7,
            }]
        );
        let err = f.manager.end_semester(&session.id).unwrap_err();
        assert!(err.to_string().contains("insufficient session count"));
    }

    #[test]
    fn test_semester_end_applies_once() {
        let f = fixture(at(2025, 1, 6, 9, 0));
        let session = run_weeks(&f, at(2025, 1, 6, 9, 0), 8);

        f.clock.set(at(2025, 1, 6, 9, 0) + Duration::days(120));
        let result = f.manager.end_semester(&session.id).unwrap();
        assert_eq!(result.new_status, SessionStatus::EndedSemester);

        assert!(matches!(
            f.manager.end_semester(&session.id).unwrap_err(),
            SessionError::InvalidTransition {
                current: SessionStatus::EndedSemester,
                ..
            }
        ));
        assert!(matches!(
            f.manager.reopen(&session.id).unwrap_err(),
            SessionError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_lost_race_reports_winning_status() {
        use SessionStatus::{Active, EndedSemester, StoppedDaily};

        let f = fixture(at(2025, 1, 6, 9, 0));
        let session = f.start(SessionKind::Lab, TimeBlock::Morning).unwrap();
        // Another caller stops the session between our read and our write.
        let stopped_at = Some(at(2025, 1, 6, 9, 1));
        f.store
            .transition_session(&session.id, Active, StoppedDaily, stopped_at)
            .unwrap();
        let err = f
            .manager
            .apply(&session, Active, EndedSemester, None)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                current: StoppedDaily,
                ..
            }
        ));
    }

    #[test]
    fn test_errors_serialize_with_reason() {
        let f = fixture(at(2025, 1, 6, 9, 0));
        let err = f.manager.reopen("missing").unwrap_err();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["reason"], "not_found");
        assert_eq!(json["session_id"], "missing");

        let storage = SessionError::from(StoreError::LockPoisoned);
        let json = serde_json::to_value(&storage).unwrap();
        assert_eq!(json["reason"], "storage");
        assert_eq!(json["source"], "store lock poisoned");
    }
}
