use rollcall_attendance::{AttendancePolicy, PolicyError};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed policy file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Which D-Bus bus the daemon claims its name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    System,
    Session,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub bus: BusKind,
    /// SCRFD detection model file name, relative to `model_dir`.
    pub detector_model: String,
    /// UltraFace fallback model file name, relative to `model_dir`.
    pub fallback_detector_model: String,
    /// ArcFace embedding model file name, relative to `model_dir`.
    pub recognizer_model: String,
    /// Fitted classifier artifact (JSON).
    pub classifier_path: PathBuf,
    /// Acceptance threshold used when the artifact carries none.
    pub default_threshold: f32,
    /// Optional TOML file overriding [`AttendancePolicy`] defaults.
    pub policy_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));

        let classifier_path = var("ROLLCALL_CLASSIFIER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join("classifier.json"));

        let bus = match var("ROLLCALL_BUS").as_deref() {
            Some("session") => BusKind::Session,
            Some("system") | None => BusKind::System,
            Some(other) => {
                tracing::warn!(
                    value = other,
                    "unrecognised ROLLCALL_BUS; using the system bus"
                );
                BusKind::System
            }
        };

        Self {
            db_path: var("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("attendance.db")),
            bus,
            detector_model: var("ROLLCALL_DETECTOR_MODEL")
                .unwrap_or_else(|| "det_10g.onnx".to_string()),
            fallback_detector_model: var("ROLLCALL_FALLBACK_DETECTOR_MODEL")
                .unwrap_or_else(|| "version-RFB-320.onnx".to_string()),
            recognizer_model: var("ROLLCALL_RECOGNIZER_MODEL")
                .unwrap_or_else(|| "w600k_r50.onnx".to_string()),
            classifier_path,
            default_threshold: var("ROLLCALL_DEFAULT_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(rollcall_core::registry::DEFAULT_THRESHOLD),
            policy_file: var("ROLLCALL_POLICY_FILE").map(PathBuf::from),
            model_dir,
        }
    }

    pub fn detector_model_path(&self) -> String {
        self.model_path(&self.detector_model)
    }

    pub fn fallback_detector_model_path(&self) -> String {
        self.model_path(&self.fallback_detector_model)
    }

    pub fn recognizer_model_path(&self) -> String {
        self.model_path(&self.recognizer_model)
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }

    /// The attendance policy: defaults, overridden by the policy file if set.
    pub fn load_policy(&self) -> Result<AttendancePolicy, ConfigError> {
        match &self.policy_file {
            Some(path) => read_policy(path),
            None => Ok(AttendancePolicy::default()),
        }
    }
}

fn read_policy(path: &Path) -> Result<AttendancePolicy, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_policy(&text)
}

/// Parse and validate a TOML policy. Absent keys keep their defaults.
pub fn parse_policy(text: &str) -> Result<AttendancePolicy, ConfigError> {
    let policy: AttendancePolicy = toml::from_str(text)?;
    policy.validate()?;
    Ok(policy)
}
