//! rollcall-attendance: working-hours gate, session lifecycle and
//! attendance reconciliation on top of `rollcall-core`.
//!
//! Records are kept per (student, session, day). The [`Reconciler`] is the
//! only writer of recognition results and never lowers a stored confidence
//! or turns a present student absent.

pub mod clock;
pub mod hours;
pub mod model;
pub mod outcome;
pub mod pipeline;
pub mod policy;
pub mod reconcile;
pub mod session;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use hours::{Admission, Period, WorkingHours};
pub use model::{
    AttendanceRecord, AttendanceStatus, Cohort, Session, SessionKind, SessionStatus,
    StudentEnrollment, TimeBlock,
};
pub use outcome::{AbsentSweepResult, ErrorKind, RecognitionOutcome, SessionTransitionResult};
pub use pipeline::{FaceReport, Failure, PipelineStatus, RecognitionPipeline};
pub use policy::{AttendancePolicy, PolicyError};
pub use reconcile::{Decision, Reconciler};
pub use session::{
    ReopenBlocker, ReopenEligibility, SemesterEligibility, SemesterRequirement, SessionError,
    SessionManager, StopReport,
};
pub use store::{AttendanceStore, MemoryStore, SqliteStore, StoreError};
