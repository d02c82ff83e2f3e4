use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::Camera;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start live capture and recognition
    Start,
    /// Stop live capture
    Stop,
    /// Show daemon status
    Status,
    /// Enroll (or re-enroll) a face from a photo
    Enroll {
        /// Enrollee id (student id)
        id: String,
        /// Photo containing the enrollee's face
        image: PathBuf,
    },
    /// Check that a photo shows the given enrollee
    Verify {
        id: String,
        image: PathBuf,
    },
    /// List enrolled faces
    List,
    /// Remove an enrolled face
    Remove {
        id: String,
    },
    /// Show today's attendance
    Today,
    /// Summarize recent emotions, for one enrollee or everyone
    Trends {
        /// Enrollee id; omit for all samples
        id: Option<String>,
        /// Number of days to look back, including today
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// List capture devices (does not need the daemon)
    Devices,
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn start(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
    async fn enroll(&self, enrollee_id: &str, image_path: &str) -> zbus::Result<String>;
    async fn verify(&self, enrollee_id: &str, image_path: &str) -> zbus::Result<String>;
    async fn list_enrollees(&self) -> zbus::Result<String>;
    async fn remove_enrollee(&self, enrollee_id: &str) -> zbus::Result<bool>;
    async fn today(&self) -> zbus::Result<String>;
    async fn emotion_trends(&self, enrollee_id: &str, days: u32) -> zbus::Result<String>;
}

/// The daemon resolves image paths itself, so send them absolute.
fn absolute(path: PathBuf) -> Result<String> {
    let path = std::fs::canonicalize(&path).with_context(|| format!("{}", path.display()))?;
    Ok(path.to_string_lossy().into_owned())
}

fn pretty(json: &str) -> String {
    serde_json::from_str::<Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

fn print_today(json: &str) -> Result<()> {
    let rows: Vec<Value> = serde_json::from_str(json)?;
    if rows.is_empty() {
        println!("No attendance recorded today");
        return Ok(());
    }
    for row in rows {
        let field = |key: &str| row[key].as_str().unwrap_or("").to_string();
        let name = field("name");
        println!(
            "{}  {:<12} {:<24} {:<8} {}",
            field("time"),
            field("enrollee_id"),
            if name.is_empty() { "-".to_string() } else { name },
            field("status"),
            row["emotion"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}

fn print_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No capture devices found");
        return;
    }
    for dev in devices {
        println!("{:>2}  {}  {} ({})", dev.index, dev.path, dev.name, dev.driver);
    }
}

async fn run_remote(command: Commands) -> Result<()> {
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    match command {
        Commands::Start => {
            let session = proxy.start().await?;
            println!("Capture started (session {session})");
        }
        Commands::Stop => {
            if proxy.stop().await? {
                println!("Capture stopped");
            } else {
                println!("Capture was not running");
            }
        }
        Commands::Status => println!("{}", pretty(&proxy.status().await?)),
        Commands::Enroll { id, image } => {
            let reply = proxy.enroll(&id, &absolute(image)?).await?;
            let outcome: Value = serde_json::from_str(&reply)?;
            println!("{id}: {}", outcome["outcome"].as_str().unwrap_or("enrolled"));
        }
        Commands::Verify { id, image } => {
            let reply = proxy.verify(&id, &absolute(image)?).await?;
            let verification: Value = serde_json::from_str(&reply)?;
            match verification["outcome"].as_str() {
                Some("confirmed") => println!(
                    "Confirmed: {id} (confidence {:.2})",
                    verification["confidence"].as_f64().unwrap_or(0.0)
                ),
                Some("mismatch") => println!(
                    "Mismatch: face belongs to {} (confidence {:.2})",
                    verification["recognized"].as_str().unwrap_or("?"),
                    verification["confidence"].as_f64().unwrap_or(0.0)
                ),
                _ => println!("Not recognized"),
            }
        }
        Commands::List => {
            let entries: Vec<Value> = serde_json::from_str(&proxy.list_enrollees().await?)?;
            if entries.is_empty() {
                println!("No faces enrolled");
            }
            for entry in entries {
                println!(
                    "{:<12} {}",
                    entry["enrollee_id"].as_str().unwrap_or(""),
                    entry["name"].as_str().unwrap_or("-")
                );
            }
        }
        Commands::Remove { id } => {
            if proxy.remove_enrollee(&id).await? {
                println!("Removed {id}");
            } else {
                println!("{id} is not enrolled");
            }
        }
        Commands::Today => print_today(&proxy.today().await?)?,
        Commands::Trends { id, days } => {
            let reply = proxy.emotion_trends(id.as_deref().unwrap_or(""), days).await?;
            println!("{}", pretty(&reply));
        }
        Commands::Devices => print_devices(),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        // Direct hardware query; works without the daemon.
        Commands::Devices => print_devices(),
        command => run_remote(command).await?,
    }

    Ok(())
}
