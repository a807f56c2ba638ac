use rollcall_attendance::{
    FaceReport, Failure, PipelineStatus, RecognitionOutcome, RecognitionPipeline,
};
use rollcall_core::{BundleMetadata, ImagePayload};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Recognize {
        payload: ImagePayload,
        session_id: String,
        reply: oneshot::Sender<RecognitionOutcome>,
    },
    LocateFaces {
        payload: ImagePayload,
        reply: oneshot::Sender<Result<FaceReport, Failure>>,
    },
    ResetTracking {
        reply: oneshot::Sender<()>,
    },
    ModelInfo {
        reply: oneshot::Sender<Result<BundleMetadata, Failure>>,
    },
    ReloadModel {
        reply: oneshot::Sender<Result<BundleMetadata, Failure>>,
    },
    Status {
        reply: oneshot::Sender<PipelineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Run one recognition attempt against `session_id`.
    pub async fn recognize(
        &self,
        payload: ImagePayload,
        session_id: String,
    ) -> Result<RecognitionOutcome, EngineError> {
        self.call(|reply| EngineRequest::Recognize {
            payload,
            session_id,
            reply,
        })
        .await
    }

    pub async fn locate_faces(
        &self,
        payload: ImagePayload,
    ) -> Result<Result<FaceReport, Failure>, EngineError> {
        self.call(|reply| EngineRequest::LocateFaces { payload, reply })
            .await
    }

    pub async fn reset_tracking(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::ResetTracking { reply })
            .await
    }

    pub async fn model_info(&self) -> Result<Result<BundleMetadata, Failure>, EngineError> {
        self.call(|reply| EngineRequest::ModelInfo { reply }).await
    }

    pub async fn reload_model(&self) -> Result<Result<BundleMetadata, Failure>, EngineError> {
        self.call(|reply| EngineRequest::ReloadModel { reply })
            .await
    }

    pub async fn status(&self) -> Result<PipelineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The pipeline holds ONNX sessions that need `&mut` access, so all
/// inference is serialised through one thread fed by a bounded channel.
pub fn spawn_engine(mut pipeline: RecognitionPipeline) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize {
                        payload,
                        session_id,
                        reply,
                    } => {
                        let _ = reply.send(pipeline.recognize(payload, &session_id));
                    }
                    EngineRequest::LocateFaces { payload, reply } => {
                        let _ = reply.send(pipeline.locate_faces(payload));
                    }
                    EngineRequest::ResetTracking { reply } => {
                        pipeline.reset_tracking();
                        let _ = reply.send(());
                    }
                    EngineRequest::ModelInfo { reply } => {
                        let _ = reply.send(pipeline.model_info());
                    }
                    EngineRequest::ReloadModel { reply } => {
                        let _ = reply.send(pipeline.reload_model());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(pipeline.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_attendance::{AttendancePolicy, ErrorKind, FixedClock, MemoryStore};
    use rollcall_core::{
        BoundingBox, DetectorBackend, DetectorError, EmbeddingExtractor, FaceLocator, Frame,
        ModelRegistry,
    };
    use std::sync::Arc;

    struct EmptyDetector;

    impl DetectorBackend for EmptyDetector {
        fn name(&self) -> &'static str {
            "empty"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(Vec::new())
        }
    }

    fn engine() -> EngineHandle {
        let now = chrono::NaiveDate::from_ymd_opt(2025, 3, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let locator = FaceLocator::new(vec![Box::new(EmptyDetector)], Default::default())
            .unwrap();
        let pipeline = RecognitionPipeline::new(
            Arc::new(ModelRegistry::from_bytes(
                b"{\"weights\": [[1.0]], \"bias\": [0.0]}".to_vec(),
                0.6,
            )),
            locator,
            EmbeddingExtractor::unavailable("not installed"),
            Arc::new(MemoryStore::new()),
            AttendancePolicy::default(),
            Arc::new(FixedClock::new(now)),
        );
        spawn_engine(pipeline).unwrap()
    }

    #[tokio::test]
    async fn test_requests_round_trip_through_engine_thread() {
        let engine = engine();

        let outcome = engine
            .recognize(ImagePayload::Bytes(vec![1, 2, 3]), "missing".into())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RecognitionOutcome::Error {
                kind: ErrorKind::SessionNotFound,
                ..
            }
        ));

        let status = engine.status().await.unwrap();
        assert_eq!(status.detector_backends, vec!["empty"]);
        assert!(!status.embedding_available);

        engine.reset_tracking().await.unwrap();
        let meta = engine.model_info().await.unwrap().unwrap();
        assert_eq!(meta.identity_count, 1);
        assert!(engine.reload_model().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_locate_faces_reports_decode_failure() {
        let engine = engine();
        let failure = engine
            .locate_faces(ImagePayload::Bytes(Vec::new()))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Decode);
    }
}
