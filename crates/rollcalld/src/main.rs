use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use rollcall_core::{EuclideanMatcher, FrameProcessor, Gallery};

mod config;
mod dbus_interface;
mod engine;
mod feed;
mod import;
mod photos;
mod store;

use config::Config;
use dbus_interface::{AppState, RollcallService};
use engine::{spawn_engine, Engine};
use feed::JsonlFeed;
use photos::PhotoLocator;
use store::{BlockingStore, RollcallStore};

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[derive(Parser)]
#[command(name = "rollcalld", version, about = "Rollcall attendance daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed identities and profiles from a JSON file, then exit
    Import {
        /// JSON array of {"id", "embedding", "profile"?} entries
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let store = RollcallStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;

    if let Some(Commands::Import { file }) = cli.command {
        let summary = import::import_file(&store, &file).await?;
        println!(
            "Imported {} identities, {} profiles into {}",
            summary.identities,
            summary.profiles,
            config.db_path.display()
        );
        return Ok(());
    }

    tracing::info!(db = %config.db_path.display(), "rollcalld starting");

    // The gallery is loaded once and fixed for the lifetime of the process.
    let (embeddings, ids) = store
        .load_encodings()
        .await
        .context("loading encode store")?;
    let gallery = Gallery::from_encodings(embeddings, ids).context("building gallery")?;
    tracing::info!(
        identities = gallery.len(),
        dim = gallery.dim(),
        "gallery loaded"
    );

    let blocking = BlockingStore::new(store.clone(), tokio::runtime::Handle::current());
    let processor = FrameProcessor::new(
        EuclideanMatcher::new(gallery),
        blocking.clone(),
        blocking,
        config.decision_params(),
    );

    let feed = JsonlFeed::open(&config.feed_path)?;
    tracing::info!(feed = %config.feed_path, "observation feed opened");

    let engine = spawn_engine(Engine::new(
        feed,
        processor,
        PhotoLocator::new(&config.photo_dir),
        config.frame_tick(),
    ))?;

    let session_bus = config.session_bus;
    let state = Arc::new(Mutex::new(AppState {
        config,
        engine: engine.clone(),
        store,
    }));
    let service = RollcallService { state };

    let builder = if session_bus {
        tracing::info!("using session bus (development mode)");
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    // A blocked feed read (e.g. idle stdin) can hold the engine past one tick.
    match tokio::time::timeout(std::time::Duration::from_secs(2), engine.shutdown()).await {
        Ok(Ok(status)) => tracing::info!(
            frames = status.frames_processed,
            committed = status.attendance_committed,
            "engine stopped"
        ),
        Ok(Err(e)) => tracing::warn!(error = %e, "engine already stopped"),
        Err(_) => tracing::warn!("engine did not stop in time"),
    }

    Ok(())
}
