use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.mien.Mien1",
    default_service = "org.mien.Mien1",
    default_path = "/org/mien/Mien1"
)]
trait Mien {
    async fn enroll(&self, name: String, photos: Vec<String>) -> zbus::Result<u32>;
    async fn enroll_live(&self, name: String) -> zbus::Result<u32>;
    async fn start_recognition(&self) -> zbus::Result<()>;
    async fn stop_recognition(&self) -> zbus::Result<()>;
    async fn cancel_countdown(&self) -> zbus::Result<()>;
    async fn list_profiles(&self) -> zbus::Result<String>;
    async fn remove_profile(&self, name: String) -> zbus::Result<()>;
    async fn clear_all(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn state_changed(&self, event: String) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "mien", about = "mien face recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new profile from photos or a live capture
    Enroll {
        /// Profile name (case-sensitive, must be unique)
        #[arg(short, long)]
        name: String,
        /// Photo files to extract faces from
        photos: Vec<PathBuf>,
        /// Capture from the camera instead of photo files
        #[arg(long, conflicts_with = "photos")]
        live: bool,
    },
    /// Start recognition and render transitions until confirmed
    Watch,
    /// Cancel a running verification countdown
    Cancel,
    /// List enrolled profiles
    List,
    /// Remove an enrolled profile
    Remove {
        /// Profile name to remove
        name: String,
    },
    /// Remove every enrolled profile
    Clear,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus (is miend running?)")?;
    let proxy = MienProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll { name, photos, live } => {
            if live {
                println!("Capturing from camera — look straight ahead...");
                let count = proxy.enroll_live(name.clone()).await?;
                println!("Enrolled '{name}' ({count} embedding)");
            } else {
                if photos.is_empty() {
                    bail!("pass photo files, or --live to capture from the camera");
                }
                let paths: Vec<String> = photos
                    .iter()
                    .map(|p| {
                        p.canonicalize()
                            .with_context(|| format!("no such photo: {}", p.display()))
                            .map(|p| p.to_string_lossy().into_owned())
                    })
                    .collect::<Result<_>>()?;
                let count = proxy.enroll(name.clone(), paths).await?;
                println!("Enrolled '{name}' ({count} embeddings)");
            }
        }
        Commands::Watch => watch(&proxy).await?,
        Commands::Cancel => {
            proxy.cancel_countdown().await?;
            println!("Countdown cancelled");
        }
        Commands::List => {
            let raw = proxy.list_profiles().await?;
            let profiles: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
            if profiles.is_empty() {
                println!("No profiles enrolled");
            }
            for p in profiles {
                println!(
                    "{}  ({} embeddings, added {})",
                    p["name"].as_str().unwrap_or("?"),
                    p["embeddings"],
                    p["dateAdded"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Remove { name } => {
            proxy.remove_profile(name.clone()).await?;
            println!("Removed '{name}'");
        }
        Commands::Clear => {
            let removed = proxy.clear_all().await?;
            println!("Removed {removed} profile(s)");
        }
        Commands::Status => {
            println!("{}", proxy.status().await?);
        }
    }

    Ok(())
}

/// Subscribe to transitions, start recognition, and render the stream
/// until a confirmation or Ctrl-C. Recognition is stopped on the way out
/// so the daemon never keeps the camera after the watcher leaves.
async fn watch(proxy: &MienProxy<'_>) -> Result<()> {
    let mut stream = proxy.receive_state_changed().await?;
    proxy.start_recognition().await?;
    println!("Scanning — press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = stream.next() => {
                let Some(signal) = signal else { break };
                let args = signal.args()?;
                let event: serde_json::Value = serde_json::from_str(args.event())?;
                if render_event(&event) {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                proxy.stop_recognition().await?;
                println!("\nStopped");
                return Ok(());
            }
        }
    }

    // Signal stream ended — the daemon is gone, so stopping is best-effort.
    let _ = proxy.stop_recognition().await;
    Ok(())
}

/// Print one transition; returns true when the session is over.
fn render_event(event: &serde_json::Value) -> bool {
    let label = event["label"].as_str().unwrap_or("?");
    match event["kind"].as_str().unwrap_or("") {
        "started" => {}
        "no_face" => println!("No face in view"),
        "unknown" => println!("Unknown person (distance {:.2})", dist(event)),
        "tentative" => println!("Detected: {label} (seen {}x, hold still...)", event["streak"]),
        "countdown_started" => println!("Verifying {label} — {}s", event["seconds"]),
        "countdown_tick" => println!("Verifying {label} — {}s", event["remaining"]),
        "countdown_cancelled" => println!("Verification of {label} cancelled"),
        "confirmed" => {
            println!("Hello, {label} — face confirmed");
            return true;
        }
        "stopped" => return true,
        other => println!("({other})"),
    }
    false
}

fn dist(event: &serde_json::Value) -> f64 {
    event["distance"].as_f64().unwrap_or(f64::NAN)
}
