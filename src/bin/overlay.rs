//! overlay-blocks-server binary
//!
//! Runs the overlay engine against an in-memory flat world and publishes its
//! packets on the frame channel.
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                            | Default           | Description                     |
//! |--------------------------------|-------------------|---------------------------------|
//! | `OVERLAY_CONFIG`               | *(none)*          | Config file path                |
//! | `OVERLAY_SESSION`              | `default`         | Session stamped on frames       |
//! | `OVERLAY_PARTICIPANT_ID`       | `overlay-service` | Participant ID in logs          |
//! | `OVERLAY_TICK_RATE_HZ`         | `20`              | Tick rate                       |
//! | `OVERLAY_BOUNDING_BOXES_PATH`  | *(none)*          | Bounding-box dataset (JSON)     |
//! | `OVERLAY_WORLDS`               | `world`           | Comma-separated world names     |
//! | `OVERLAY_SURFACE`              | `63`              | Highest solid y of flat worlds  |

use anyhow::{Context, Result};
use clap::Parser;
use overlay_blocks::{
    bus::{OverlayBusAgent, OverlayBusConfig},
    config,
    events::NoopEvents,
    host::EngineContext,
    service::OverlayService,
    terrain::{FlatTerrain, Outbox, Roster},
};
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "overlay-blocks-server", about = "Overlay Blocks engine", version)]
struct Args {
    /// Config file (TOML or JSON); values are overridden by OVERLAY_* env vars
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Session stamped on every published frame
    #[arg(long, env = "OVERLAY_SESSION")]
    session: Option<String>,

    /// Participant ID used in logs
    #[arg(long, env = "OVERLAY_PARTICIPANT_ID", default_value = "overlay-service")]
    participant_id: String,

    /// Tick rate (Hz)
    #[arg(long, env = "OVERLAY_TICK_RATE_HZ")]
    tick_rate_hz: Option<f32>,

    /// Worlds of the in-memory flat terrain
    #[arg(long, env = "OVERLAY_WORLDS", value_delimiter = ',', default_value = "world")]
    worlds: Vec<String>,

    /// Highest solid y of the flat terrain
    #[arg(long, env = "OVERLAY_SURFACE", default_value_t = 63)]
    surface: i32,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("overlay_blocks=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut service_config =
        config::load(args.config.as_deref()).context("Failed to load overlay config")?;
    if let Some(session) = args.session {
        service_config.session = session;
    }
    if let Some(hz) = args.tick_rate_hz {
        service_config.tick_rate_hz = hz;
    }

    tracing::info!(
        "Starting overlay-blocks-server (session='{}', worlds={:?}, tick={}Hz)",
        service_config.session,
        args.worlds,
        service_config.tick_rate_hz,
    );

    // In-memory host
    let terrain = FlatTerrain::new();
    for world in &args.worlds {
        terrain.add_world(world, service_config.default_min_height, args.surface);
    }
    let roster = Arc::new(Roster::new());
    let outbox = Arc::new(Outbox::new());

    let geometry =
        OverlayService::load_geometry(&service_config).context("Failed to load bounding boxes")?;
    let ctx = EngineContext::new(
        Arc::new(terrain),
        roster,
        outbox.clone(),
        Arc::new(NoopEvents),
        geometry,
    );

    let bus_config = OverlayBusConfig {
        session: service_config.session.clone(),
        participant_id: args.participant_id,
        tick_rate_hz: service_config.tick_rate_hz,
        ..Default::default()
    };

    let service = Arc::new(parking_lot::Mutex::new(OverlayService::new(
        service_config,
        ctx,
    )));

    // Run until shutdown
    OverlayBusAgent::new(bus_config, service, outbox).run().await
}
