use anyhow::{Context, Result};
use gatekeep_core::UserRegistry;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{GateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal outside development.
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("gatekeepd starting");

    let config = Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        registry = %config.registry_path.display(),
        mode = ?config.detection_mode,
        bus = ?config.bus,
        "configuration loaded"
    );

    let registry = Arc::new(
        UserRegistry::load(config.registry_path.clone()).with_similarity_threshold(config.similarity_threshold),
    );
    tracing::info!(users = registry.len(), "registry loaded");

    let engine = engine::spawn_engine(&config, registry.clone()).context("failed to start engine")?;

    let service = GateService {
        engine,
        registry,
        config: config.clone(),
    };
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "gatekeepd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("gatekeepd shutting down");

    Ok(())
}
