use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod attend;
mod capture;
mod config;
mod dbus_interface;
mod engine;
mod training;

use config::Config;
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use engine::{DiskBackend, Engine, EngineSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    let settings = EngineSettings::from_config(&config);
    tracing::info!(
        data_dir = %config.data_dir.display(),
        camera = config.camera_index,
        threshold = config.confidence_threshold,
        blinks = config.required_blinks,
        "configuration loaded"
    );

    std::fs::create_dir_all(&settings.paths.dataset)?;
    for file in [&settings.paths.model, &settings.paths.attendance] {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let backend = DiskBackend::new(&settings.paths, Box::new(rollcall_hw::V4l2Opener));
    let engine = Arc::new(Engine::new(Arc::new(backend), settings));

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceService::new(engine.clone()))?
        .build()
        .await?;

    let mut status_rx = engine.subscribe();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            tracing::debug!(?status, "status changed");
        }
    });

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    let engine_for_shutdown = engine.clone();
    tokio::task::spawn_blocking(move || engine_for_shutdown.shutdown()).await?;

    Ok(())
}
