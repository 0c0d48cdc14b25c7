//! Process entry point for the helix_motion motion engine.
//!
//! Wires the three long-lived workers of the concurrency model together:
//! the motion engine worker, and the homing/router layer that the (out of
//! scope) upstream listener would drive. Wire-level decode of the upstream
//! control channel and downstream protocol are external-collaborator
//! concerns (see `helix_motion::transport`); this binary only starts the
//! pieces on this side of that boundary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use helix_motion::dispatch::Dispatcher;
use helix_motion::engine::EngineHandle;
use helix_motion::homing::HomingCoordinator;
use helix_motion::net;
use helix_motion::router::Router;
use helix_motion::store::{ParamStore, DEFAULT_PARAMS_FILE};
use helix_motion::transport::TransportPool;

#[derive(Parser, Debug)]
#[command(name = "helix_motion", about = "Helical stepper-servo motor array motion engine")]
struct Cli {
    /// Path to the persisted parameter document.
    #[arg(long, default_value = DEFAULT_PARAMS_FILE)]
    params_file: PathBuf,

    /// Start the motion engine immediately instead of waiting for an
    /// upstream `/Start` command.
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Some(ip) = net::detect_lan_ip().await {
        tracing::info!(%ip, "detected LAN-facing address");
    }

    let store = ParamStore::load(&cli.params_file);
    let snapshot = store.snapshot();
    tracing::info!(
        hosts = ?snapshot.global.hosts,
        port = snapshot.global.port,
        num_servos = snapshot.global.num_servos,
        rate_fps = snapshot.global.rate_fps,
        "loaded parameter store"
    );

    let pool = Arc::new(TransportPool::new());
    let dispatcher = Arc::new(Dispatcher::new(pool));
    let engine_handle = Arc::new(EngineHandle::new(store.clone(), dispatcher.clone()));
    let homing = Arc::new(HomingCoordinator::new(store.clone(), engine_handle.clone(), dispatcher));
    let (_router, mut outbound_events) = Router::new(store, engine_handle.clone(), homing);

    tokio::spawn(async move {
        while let Some(event) = outbound_events.recv().await {
            tracing::debug!(?event, "outbound event");
        }
    });

    if cli.autostart {
        engine_handle.start().await;
        tracing::info!("motion engine autostarted");
    }

    tracing::info!("helix_motion running, press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }

    engine_handle.stop().await;
    tracing::info!("shutdown complete");
}
