use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use clap::{Parser, Subcommand};
use rollcall_attendance::WorkingHours;
use rollcall_core::ModelRegistry;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn recognize(&self, image: &[u8], session_id: &str) -> zbus::Result<String>;
    async fn locate_faces(&self, image: &[u8]) -> zbus::Result<String>;
    async fn reset_tracking(&self) -> zbus::Result<()>;
    async fn start_session(
        &self,
        owner: &str,
        year: &str,
        section: &str,
        kind: &str,
        time_block: &str,
    ) -> zbus::Result<String>;
    async fn stop_session(&self, session_id: &str) -> zbus::Result<String>;
    async fn reopen_session(&self, session_id: &str) -> zbus::Result<String>;
    async fn end_semester(&self, session_id: &str) -> zbus::Result<String>;
    async fn reopen_eligibility(&self, session_id: &str) -> zbus::Result<String>;
    async fn semester_eligibility(&self, session_id: &str) -> zbus::Result<String>;
    async fn attendance(&self, session_id: &str, day: &str) -> zbus::Result<String>;
    async fn model_info(&self) -> zbus::Result<String>;
    async fn reload_model(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize the face in an image and record attendance
    Recognize {
        /// Encoded image file (JPEG, PNG, ...)
        image: PathBuf,
        #[arg(short, long)]
        session: String,
    },
    /// Locate faces in an image
    Locate { image: PathBuf },
    /// Clear the face tracking history
    ResetTracking,
    /// Start a session for a cohort
    Start {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        section: String,
        /// lab or theory
        #[arg(long, default_value = "theory")]
        kind: String,
        /// morning or afternoon
        #[arg(long)]
        block: String,
    },
    /// Stop a session for the day and mark unseen students absent
    Stop { session: String },
    /// Reopen a session stopped for the day
    Reopen { session: String },
    /// End the semester for a session
    EndSemester { session: String },
    /// Show whether a session can be reopened, without reopening it
    ReopenEligibility { session: String },
    /// Show semester-end requirements for a session
    SemesterEligibility { session: String },
    /// List attendance records for a session
    Attendance {
        session: String,
        /// Day as YYYY-MM-DD (default: today)
        #[arg(long)]
        day: Option<String>,
    },
    /// Show the loaded classifier's metadata
    ModelInfo,
    /// Re-read the classifier artifact
    ReloadModel,
    /// Show daemon status
    Status,
    /// Evaluate the default working-hours policy (offline)
    Hours {
        /// Time of day as HH:MM (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Validate a classifier artifact and print its metadata (offline)
    InspectModel {
        path: PathBuf,
        /// Threshold assumed when the artifact carries none
        #[arg(long, default_value_t = rollcall_core::registry::DEFAULT_THRESHOLD)]
        threshold: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Offline commands never touch the bus.
    let command = match cli.command {
        Commands::Hours { at } => return hours(at.as_deref()),
        Commands::InspectModel { path, threshold } => return inspect_model(path, threshold),
        online => online,
    };

    let conn = if cli.session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn).await?;

    let reply = match command {
        Commands::Recognize { image, session } => {
            let bytes = read_image(&image)?;
            proxy.recognize(&bytes, &session).await
        }
        Commands::Locate { image } => {
            let bytes = read_image(&image)?;
            proxy.locate_faces(&bytes).await
        }
        Commands::ResetTracking => proxy.reset_tracking().await.map(|()| "{}".to_string()),
        Commands::Start {
            owner,
            year,
            section,
            kind,
            block,
        } => {
            proxy
                .start_session(&owner, &year, &section, &kind, &block)
                .await
        }
        Commands::Stop { session } => proxy.stop_session(&session).await,
        Commands::Reopen { session } => proxy.reopen_session(&session).await,
        Commands::EndSemester { session } => proxy.end_semester(&session).await,
        Commands::ReopenEligibility { session } => proxy.reopen_eligibility(&session).await,
        Commands::SemesterEligibility { session } => proxy.semester_eligibility(&session).await,
        Commands::Attendance { session, day } => {
            proxy
                .attendance(&session, day.as_deref().unwrap_or(""))
                .await
        }
        Commands::ModelInfo => proxy.model_info().await,
        Commands::ReloadModel => proxy.reload_model().await,
        Commands::Status => proxy.status().await,
        Commands::Hours { .. } | Commands::InspectModel { .. } => return Ok(()),
    };

    match reply {
        Ok(json) => print_json(&json),
        Err(zbus::Error::MethodError(name, Some(detail), _)) => {
            // Session rejections carry a JSON reason in the error message.
            eprintln!("rollcalld refused: {name}");
            print_json(&detail)?;
            std::process::exit(1);
        }
        Err(e) => Err(e).context("calling rollcalld"),
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

fn print_json(text: &str) -> Result<()> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{text}"),
    }
    Ok(())
}

fn hours(at: Option<&str>) -> Result<()> {
    let today = Local::now().naive_local();
    let now = match at {
        Some(text) => {
            let time = NaiveTime::parse_from_str(text, "%H:%M")
                .with_context(|| format!("--at {text}: expected HH:MM"))?;
            today.date().and_time(time)
        }
        None => today,
    };
    let admission = WorkingHours::default().admission(now);
    println!("{}", serde_json::to_string_pretty(&admission)?);
    Ok(())
}

fn inspect_model(path: PathBuf, threshold: f32) -> Result<()> {
    let display = path.display().to_string();
    let registry = ModelRegistry::from_file(path, threshold);
    let bundle = registry
        .load()
        .with_context(|| format!("loading classifier artifact {display}"))?;
    println!("{}", serde_json::to_string_pretty(&bundle.metadata())?);
    Ok(())
}
