//! Application wiring: client, catalog, staging and the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chunkferry_archive_client::ArchiveClient;
use chunkferry_catalog::{BackupCatalog, CatalogError, DirStaging, JsonCatalog, register_source};
use chunkferry_driver::{Orchestrator, OrchestratorConfig, TransferEvent};
use tokio::sync::mpsc;

use crate::config::Config;

/// Runs passes until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    // -- Archive client --
    let client = connect(&config).await?;

    // -- Catalog --
    let catalog = JsonCatalog::open(&config.catalog_path)
        .with_context(|| format!("opening catalog {}", config.catalog_path.display()))?;
    tracing::info!(
        path = %catalog.path().display(),
        records = catalog.list().len(),
        "catalog opened"
    );
    register_sources(&catalog, &config);

    // -- Orchestrator --
    let staging = DirStaging::new(&config.staging_dir);
    let mut orchestrator = Orchestrator::new(
        Arc::new(client),
        Arc::new(catalog),
        Arc::new(staging),
        OrchestratorConfig {
            workers: config.workers,
            ..OrchestratorConfig::default()
        },
    );
    if let Some(events) = orchestrator.take_events() {
        tokio::spawn(log_events(events));
    }

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, finishing current chunks");
        }
        cancel.cancel();
    });

    tracing::info!(interval_secs = config.pass_interval_secs, "chunkferry ready");
    orchestrator
        .run(Duration::from_secs(config.pass_interval_secs))
        .await;
    Ok(())
}

/// Builds the client and attaches a session.
async fn connect(config: &Config) -> anyhow::Result<ArchiveClient> {
    let client = ArchiveClient::new(config.client_config())?;

    if let Some(token) = &config.session_token {
        tracing::info!("using configured session token");
        return Ok(client.with_session_token(token.clone()));
    }

    match (&config.username, &config.credential_hash) {
        (Some(username), Some(hash)) => {
            client
                .check_connectivity()
                .await
                .context("archive endpoint unreachable")?;
            let token = client
                .start_session(hash, username)
                .await
                .context("starting session")?;
            tracing::info!(username = %username, "session started");
            Ok(client.with_session_token(token))
        }
        _ => {
            tracing::warn!("no session token or credentials configured, requests are unauthenticated");
            Ok(client)
        }
    }
}

/// Registers configured sources that are not in the catalog yet. Sources
/// whose current content was already archived are skipped.
fn register_sources(catalog: &dyn BackupCatalog, config: &Config) {
    for source in &config.sources {
        match register_source(catalog, source, config.chunk_size_kb) {
            Ok(_) => {}
            Err(CatalogError::AlreadyArchived(_)) => {
                tracing::debug!(source = %source.display(), "source unchanged since last transfer");
            }
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "cannot register source")
            }
        }
    }
}

async fn log_events(mut events: mpsc::Receiver<TransferEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransferEvent::Progress {
                record_id,
                next_chunk_index,
                total_chunks,
            } => tracing::debug!(record = %record_id, next_chunk_index, total_chunks, "progress"),
            TransferEvent::Finished { record_id } => {
                tracing::info!(record = %record_id, "all chunks acknowledged")
            }
            TransferEvent::Failed {
                record_id,
                error,
                retryable,
            } => tracing::warn!(record = %record_id, %error, retryable, "transfer stopped"),
            TransferEvent::CleanedUp { record_id } => {
                tracing::info!(record = %record_id, "transfer closed")
            }
        }
    }
}
