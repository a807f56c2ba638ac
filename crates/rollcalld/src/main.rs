use anyhow::{Context, Result};
use rollcall_attendance::{
    AttendanceStore, RecognitionPipeline, SessionManager, SqliteStore, SystemClock,
};
use rollcall_core::{
    DetectorBackend, DetectorError, EmbeddingExtractor, FaceLocator, ModelRegistry, ScrfdDetector,
    UltraFaceDetector,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    let policy = config.load_policy().context("loading attendance policy")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        classifier = %config.classifier_path.display(),
        "configuration loaded"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let store: Arc<dyn AttendanceStore> = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening attendance database {}", config.db_path.display()))?,
    );

    let detector_path = config.detector_model_path();
    let fallback_path = config.fallback_detector_model_path();
    let attempts: Vec<(&'static str, Result<Box<dyn DetectorBackend>, DetectorError>)> = vec![
        (
            "scrfd",
            ScrfdDetector::load(&detector_path)
                .map(|d| Box::new(d) as Box<dyn DetectorBackend>),
        ),
        (
            "ultraface",
            UltraFaceDetector::load(&fallback_path)
                .map(|d| Box::new(d) as Box<dyn DetectorBackend>),
        ),
    ];
    let locator = FaceLocator::from_attempts(attempts, policy.detector_filter.clone())
        .context("no face detection backend could be initialised")?;

    let extractor = EmbeddingExtractor::load_arcface(&config.recognizer_model_path());
    if extractor.is_available() {
        tracing::info!(model = ?extractor.model_version(), "embedding backend ready");
    }

    let registry = Arc::new(ModelRegistry::from_file(
        &config.classifier_path,
        config.default_threshold,
    ));
    match registry.load() {
        Ok(bundle) => tracing::info!(
            identities = bundle.labels().len(),
            threshold = bundle.threshold(),
            "classifier loaded"
        ),
        Err(e) => tracing::warn!(
            error = %e,
            "classifier not loaded; recognition will report classifier_not_loaded"
        ),
    }

    let clock = Arc::new(SystemClock);
    let pipeline = RecognitionPipeline::new(
        registry,
        locator,
        extractor,
        Arc::clone(&store),
        policy.clone(),
        clock.clone(),
    );
    let engine = engine::spawn_engine(pipeline)?;
    let sessions = Arc::new(SessionManager::new(store, policy, clock));

    let service = dbus_interface::AttendanceService::new(engine, sessions);
    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("claiming {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
