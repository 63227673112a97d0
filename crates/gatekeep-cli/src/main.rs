use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.gatekeep.Gate1",
    default_service = "org.gatekeep.Gate1",
    default_path = "/org/gatekeep/Gate1"
)]
trait Gate {
    async fn verify_access(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn detect(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn register_user(&self, name: &str, plate_number: &str, image: Vec<u8>) -> zbus::Result<String>;
    async fn list_users(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "gatekeep", about = "gatekeep face + license plate access control CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide access for an image showing a face and a license plate
    Verify {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
    },
    /// List every face and plate found in an image
    Detect {
        image: PathBuf,
    },
    /// Register a user from a face image
    Register {
        /// Unique user name
        #[arg(short, long)]
        name: String,
        /// The user's license plate number
        #[arg(short, long)]
        plate: String,
        /// Image file containing the user's face
        image: PathBuf,
    },
    /// List registered users
    List,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let gate = GateProxy::new(&conn)
        .await
        .context("gatekeepd is not reachable")?;

    let reply = match cli.command {
        Commands::Verify { image } => gate.verify_access(read_image(&image)?).await?,
        Commands::Detect { image } => gate.detect(read_image(&image)?).await?,
        Commands::Register { name, plate, image } => {
            gate.register_user(&name, &plate, read_image(&image)?).await?
        }
        Commands::List => gate.list_users().await?,
        Commands::Status => gate.status().await?,
    };

    println!("{}", pretty(&reply));
    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    tracing::debug!(path = %path.display(), "reading image");
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Re-indent a JSON reply; anything that is not JSON is printed as-is.
fn pretty(reply: &str) -> String {
    serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| reply.to_string())
}
