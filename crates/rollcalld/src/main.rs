use anyhow::Result;
use rollcall_core::{Engine, Gallery, OnnxExtractor, TemplateStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = config::DaemonConfig::load()?;
    let settings = &config.engine;
    tracing::info!(
        mode = %settings.detection_mode,
        tolerance = settings.tolerance,
        template_dir = %settings.template_dir.display(),
        model_dir = %settings.model_dir.display(),
        "configuration loaded"
    );

    let extractor = OnnxExtractor::load(
        &settings.scrfd_model_path(),
        &settings.arcface_model_path(),
        settings.detection_mode,
    )?;
    tracing::info!("models loaded");

    let gallery = Arc::new(Gallery::new(
        TemplateStore::new(&settings.template_dir),
        settings.tolerance,
    ));
    // A missing directory is not fatal; recognition retries the load.
    if let Err(e) = gallery.load() {
        tracing::warn!(error = %e, "initial gallery load failed");
    }

    let handle = engine::spawn_engine(Engine::new(extractor, Arc::clone(&gallery)))?;
    let service = dbus_interface::RollcallService::new(handle, gallery, settings.clone());

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(
        bus = if config.session_bus { "session" } else { "system" },
        name = dbus_interface::BUS_NAME,
        "rollcalld ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
