use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn status(&self) -> zbus::Result<String>;
    async fn session(&self, identity_id: &str) -> zbus::Result<String>;
    async fn summary(&self, identity_id: &str) -> zbus::Result<String>;
    async fn enroll_identity(
        &self,
        identity_id: &str,
        embedding_json: &str,
    ) -> zbus::Result<bool>;
    async fn upsert_profile(
        &self,
        identity_id: &str,
        name: &str,
        program: &str,
        branch: &str,
        mobile: &str,
        email: &str,
    ) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Rollcall attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon and frame-loop status
    Status,
    /// Show the liveness state of an identity in the current run
    Session {
        /// Identity id
        id: String,
    },
    /// Show attendance count and last mark for an identity
    Summary {
        /// Identity id
        id: String,
    },
    /// Add or replace an identity's reference embedding (active from next run)
    Enroll {
        /// Identity id
        id: String,
        /// Embedding as an inline JSON array, or a path to a file holding one
        embedding: String,
    },
    /// Insert or update an identity's profile
    Profile {
        /// Identity id
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        program: String,
        #[arg(long)]
        branch: String,
        #[arg(long)]
        mobile: String,
        #[arg(long, default_value = "")]
        email: String,
    },
}

/// Accept `[0.1, ...]` inline or a path to a JSON file; returns normalized JSON.
fn read_embedding(arg: &str) -> Result<String> {
    let text = if arg.trim_start().starts_with('[') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("reading embedding file {arg}"))?
    };
    let values: Vec<f32> =
        serde_json::from_str(&text).context("embedding must be a JSON array of numbers")?;
    if values.is_empty() {
        bail!("embedding is empty");
    }
    Ok(serde_json::to_string(&values)?)
}

/// Pretty-print a JSON reply; fall back to the raw text if it does not parse.
fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    match cli.command {
        Commands::Status => {
            println!("{}", pretty(&proxy.status().await?));
        }
        Commands::Session { id } => {
            let reply = proxy.session(&id).await?;
            if reply == "null" {
                println!("{id}: not seen in the current run");
            } else {
                println!("{}", pretty(&reply));
            }
        }
        Commands::Summary { id } => {
            println!("{}", pretty(&proxy.summary(&id).await?));
        }
        Commands::Enroll { id, embedding } => {
            let json = read_embedding(&embedding)?;
            tracing::debug!(identity_id = %id, "sending enrollment");
            proxy.enroll_identity(&id, &json).await?;
            println!("Enrolled {id}; restart rollcalld to include it in matching");
        }
        Commands::Profile {
            id,
            name,
            program,
            branch,
            mobile,
            email,
        } => {
            proxy
                .upsert_profile(&id, &name, &program, &branch, &mobile, &email)
                .await?;
            println!("Profile saved for {id}");
        }
    }

    Ok(())
}
