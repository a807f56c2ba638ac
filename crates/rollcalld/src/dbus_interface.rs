use crate::engine::{EngineError, EngineHandle};
use chrono::NaiveDate;
use rollcall_attendance::{Cohort, SessionError, SessionKind, SessionManager, TimeBlock};
use rollcall_core::ImagePayload;
use serde::Serialize;
use std::sync::Arc;
use zbus::{fdo, interface};

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Every method answers with a JSON document. Recognition outcomes are
/// always returned as values; session rejections come back as a `Failed`
/// error whose message is the JSON-encoded reason.
pub struct AttendanceService {
    engine: EngineHandle,
    sessions: Arc<SessionManager>,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, sessions: Arc<SessionManager>) -> Self {
        Self { engine, sessions }
    }

    /// Run a session operation off the async executor; SQLite calls block.
    async fn with_sessions<T, F>(&self, op: &'static str, f: F) -> fdo::Result<String>
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&SessionManager) -> Result<T, SessionError> + Send + 'static,
    {
        let sessions = Arc::clone(&self.sessions);
        let result = tokio::task::spawn_blocking(move || f(&sessions))
            .await
            .map_err(|e| fdo::Error::Failed(format!("{op} task failed: {e}")))?;
        match result {
            Ok(value) => to_json(&value),
            Err(e) => {
                tracing::warn!(op, error = %e, "session operation rejected");
                Err(fdo::Error::Failed(to_json(&e)?))
            }
        }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Identify the face in an encoded image and record attendance.
    async fn recognize(&self, image: Vec<u8>, session_id: &str) -> fdo::Result<String> {
        tracing::debug!(session_id, bytes = image.len(), "recognize requested");
        let outcome = self
            .engine
            .recognize(ImagePayload::Bytes(image), session_id.to_string())
            .await
            .map_err(engine_error)?;
        to_json(&outcome)
    }

    /// Locate faces for a live overlay, with tracking smoothing.
    async fn locate_faces(&self, image: Vec<u8>) -> fdo::Result<String> {
        match self
            .engine
            .locate_faces(ImagePayload::Bytes(image))
            .await
            .map_err(engine_error)?
        {
            Ok(report) => to_json(&report),
            Err(failure) => Err(fdo::Error::Failed(to_json(&failure)?)),
        }
    }

    async fn reset_tracking(&self) -> fdo::Result<()> {
        self.engine.reset_tracking().await.map_err(engine_error)
    }

    async fn start_session(
        &self,
        owner: &str,
        year: &str,
        section: &str,
        kind: &str,
        time_block: &str,
    ) -> fdo::Result<String> {
        let kind: SessionKind = kind.parse().map_err(fdo::Error::InvalidArgs)?;
        let time_block: TimeBlock = time_block.parse().map_err(fdo::Error::InvalidArgs)?;
        let owner = owner.to_string();
        let cohort = Cohort::new(year, section);
        self.with_sessions("start_session", move |s| {
            s.start_session(&owner, cohort, kind, time_block)
        })
        .await
    }

    /// Stop for the day and mark everyone not yet seen absent.
    async fn stop_session(&self, session_id: &str) -> fdo::Result<String> {
        let id = session_id.to_string();
        self.with_sessions("stop_session", move |s| s.stop_for_day(&id))
            .await
    }

    async fn reopen_session(&self, session_id: &str) -> fdo::Result<String> {
        let id = session_id.to_string();
        self.with_sessions("reopen_session", move |s| s.reopen(&id))
            .await
    }

    async fn end_semester(&self, session_id: &str) -> fdo::Result<String> {
        let id = session_id.to_string();
        self.with_sessions("end_semester", move |s| s.end_semester(&id))
            .await
    }

    async fn reopen_eligibility(&self, session_id: &str) -> fdo::Result<String> {
        let id = session_id.to_string();
        self.with_sessions("reopen_eligibility", move |s| s.reopen_eligibility(&id))
            .await
    }

    async fn semester_eligibility(&self, session_id: &str) -> fdo::Result<String> {
        let id = session_id.to_string();
        self.with_sessions("semester_eligibility", move |s| s.semester_eligibility(&id))
            .await
    }

    /// Records for a session on `day` (`YYYY-MM-DD`); empty means today.
    async fn attendance(&self, session_id: &str, day: &str) -> fdo::Result<String> {
        let day = parse_day(day)?;
        let id = session_id.to_string();
        self.with_sessions("attendance", move |s| s.attendance(&id, day))
            .await
    }

    async fn model_info(&self) -> fdo::Result<String> {
        match self.engine.model_info().await.map_err(engine_error)? {
            Ok(meta) => to_json(&meta),
            Err(failure) => Err(fdo::Error::Failed(to_json(&failure)?)),
        }
    }

    /// Re-read the classifier artifact. The previous bundle stays in
    /// service if the new one is rejected.
    async fn reload_model(&self) -> fdo::Result<String> {
        tracing::info!("classifier reload requested");
        match self.engine.reload_model().await.map_err(engine_error)? {
            Ok(meta) => to_json(&meta),
            Err(failure) => Err(fdo::Error::Failed(to_json(&failure)?)),
        }
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let pipeline = self.engine.status().await.map_err(engine_error)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "detector_backends": pipeline.detector_backends,
            "embedding_available": pipeline.embedding_available,
            "embedding_model": pipeline.embedding_model,
            "classifier_loaded": pipeline.classifier_loaded,
        })
        .to_string())
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value)
        .map_err(|e| fdo::Error::Failed(format!("serialization failed: {e}")))
}

fn engine_error(e: EngineError) -> fdo::Error {
    tracing::error!(error = %e, "engine unreachable");
    fdo::Error::Failed(e.to_string())
}

fn parse_day(day: &str) -> fdo::Result<Option<NaiveDate>> {
    if day.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| fdo::Error::InvalidArgs(format!("day must be YYYY-MM-DD: {e}")))
}
