use anyhow::{Context, Result};
use clap::Parser;
use roomscan_events::ChannelEventBus;
use roomscan_session::{Collaborators, ScanSession, SessionConfig, WorldMapStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod driver;
mod sim;

use driver::{Driver, Script};

#[derive(Parser)]
#[command(name = "roomscan")]
#[command(about = "Run a scripted multi-room scan against simulated engines", long_about = None)]
struct Cli {
    /// Session configuration as JSON. Missing fields take their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root for exports, photos, audio and the saved world map.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Number of rooms to scan.
    #[arg(long, default_value_t = 2)]
    rooms: usize,

    /// Photos to take in each room.
    #[arg(long, default_value_t = 1)]
    photos: usize,

    /// Pause and relocalize before finishing.
    #[arg(long)]
    pause: bool,

    /// Record a microphone track alongside the scan.
    #[arg(long)]
    audio: bool,

    /// Milliseconds spent in each room.
    #[arg(long, default_value_t = 200)]
    dwell_ms: u64,
}

impl Cli {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_path(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if let Some(out) = &self.out {
            config = config.rooted_at(out);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,roomscan=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.session_config()?;
    tracing::info!(scan = %config.scan_name, export_dir = %config.export_dir.display(), "starting roomscan");

    let capture = Arc::new(sim::SimCapture::default());
    let collaborators = Collaborators {
        capture: capture.clone(),
        tracking: Arc::new(sim::SimTracking::new(Duration::from_millis(300))),
        rooms: Arc::new(sim::SimRooms {
            build_time: Duration::from_millis(50),
        }),
        structure: Arc::new(sim::SimStructureSynthesizer),
        camera: Arc::new(sim::SimCamera),
        audio: Arc::new(sim::SimMicrophone::default()),
        share: None,
    };
    let world_maps = Arc::new(WorldMapStore::two_tier(config.world_map_dir.clone()));
    let export_on_finish = config.export_on_finish;

    let (bus, events) = ChannelEventBus::new();
    let (handle, task) = ScanSession::spawn(config, collaborators, world_maps, Arc::new(bus))?;

    let script = Script {
        rooms: cli.rooms,
        photos_per_room: cli.photos,
        pause: cli.pause,
        audio: cli.audio,
        dwell: Duration::from_millis(cli.dwell_ms),
        export_on_finish,
    };
    let mut driver = Driver::new(handle.clone(), events, capture);
    let outcome = driver.run(&script).await;

    handle.shutdown();
    task.await.context("session task panicked")?;
    let exported = outcome?;

    println!("{}", serde_json::to_string_pretty(&exported)?);
    tracing::info!(
        rooms = exported.room_count,
        photos = exported.photo_urls.len(),
        audio_chunks = driver.audio_chunks(),
        "scan complete"
    );
    Ok(())
}
