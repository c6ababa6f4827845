//! Nimbus storage server daemon.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting nimbusd");

    let path = config::config_path()?;
    let config = config::Config::load_from(&path)?;
    tracing::info!(
        path = %path.display(),
        port = config.port,
        storage = %config.storage_dir.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, &path))?;

    tracing::info!("nimbusd shut down cleanly");
    Ok(())
}
