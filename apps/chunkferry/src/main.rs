//! chunkferry service entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkferry=debug")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chunkferry");

    let config = config::Config::load()?;
    tracing::info!(
        base_url = %config.base_url,
        sources = config.sources.len(),
        workers = config.workers,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("chunkferry shut down cleanly");
    Ok(())
}
