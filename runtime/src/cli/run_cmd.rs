// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! `vfat-loader run`: one full loading pass over the selected targets.
//!
//! Order of operations: resolve configuration, open the store and issue a
//! batch, run the build, start the ingestion API and the dashboard server,
//! launch the browser, visit every target, then tear everything down. A
//! collaborator stopping mid-run or Ctrl-C aborts the visit loop; teardown
//! runs either way.

use crate::collab::{self, Collaborators};
use crate::config::{LoaderConfig, RunArgs};
use crate::ingest::{self, IngestStore, IngestionClient};
use crate::orchestrator::{Orchestrator, RunReport};
use crate::progress;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::Renderer;
use crate::session::{BrowserSession, PageSession};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vfat_core::Batch;

/// Upper bound on a single POST to the ingestion API.
const INSERT_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(args: &RunArgs) -> Result<()> {
    let config = LoaderConfig::resolve(args, |key| std::env::var(key).ok())?;
    info!(
        "starting vfat loader v{} ({} targets, dashboard {})",
        env!("CARGO_PKG_VERSION"),
        config.targets.len(),
        config.dashboard_url
    );

    let (store, batch) = open_store(&config)?;

    if let Some(command) = &config.build_command {
        collab::run_build(command).await?;
    }

    let mut collaborators = Collaborators::new();
    let started = start_collaborators(&config, store, batch, &mut collaborators).await;
    let outcome = match started {
        Ok(()) => load(&config, &mut collaborators).await,
        Err(e) => Err(e),
    };
    collaborators.shutdown().await;

    let report = outcome?;
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        objects_loaded = report.objects_loaded(),
        objects_attempted = report.objects_attempted(),
        elapsed_ms = report.elapsed_ms,
        "Completed loading"
    );
    Ok(())
}

fn open_store(config: &LoaderConfig) -> Result<(Arc<IngestStore>, Batch)> {
    if config.test_mode {
        let store = IngestStore::open_in_memory()?;
        let batch = store.ensure_test_batch()?;
        info!("Running in test mode, no batch created using batch_id: {batch}");
        return Ok((Arc::new(store), batch));
    }

    let store = IngestStore::open(&config.db_path)?;
    let batch = store.create_batch()?;
    info!(
        "Running in production mode, new batch created with id: {batch} ({})",
        config.db_path.display()
    );
    Ok((Arc::new(store), batch))
}

async fn start_collaborators(
    config: &LoaderConfig,
    store: Arc<IngestStore>,
    batch: Batch,
    collaborators: &mut Collaborators,
) -> Result<()> {
    let listener = ingest::bind(config.ingest_port).await?;
    collaborators.spawn_task("ingestion API", ingest::serve(listener, store, batch));

    if let Some(command) = &config.serve_command {
        collaborators.spawn_command("dashboard server", command)?;
    }
    Ok(())
}

/// Launch the browser and visit every target.
async fn load(config: &LoaderConfig, collaborators: &mut Collaborators) -> Result<RunReport> {
    let renderer = ChromiumRenderer::new(config.headful).await?;
    info!("Chromium renderer initialized");
    load_with(config, &renderer, collaborators).await
}

/// Visit every target with `renderer`, which is shut down before this
/// returns whatever the outcome.
async fn load_with(
    config: &LoaderConfig,
    renderer: &dyn Renderer,
    collaborators: &mut Collaborators,
) -> Result<RunReport> {
    let result = visit_targets(config, renderer, collaborators).await;

    if let Err(e) = renderer.shutdown().await {
        warn!("failed to close the browser cleanly: {e:#}");
    }
    result
}

async fn visit_targets(
    config: &LoaderConfig,
    renderer: &dyn Renderer,
    collaborators: &mut Collaborators,
) -> Result<RunReport> {
    let client = IngestionClient::new(&config.ingest_url(), INSERT_TIMEOUT)?;
    let mut session: Box<dyn PageSession> =
        Box::new(BrowserSession::open(renderer, client).await?);

    let (events, event_rx) = progress::channel();
    let event_log = tokio::spawn(progress::log_events(event_rx));
    let orchestrator = Orchestrator::new(config.retry.clone(), config.dashboard_url.as_str())
        .with_events(events);

    let result = tokio::select! {
        report = orchestrator.run(session.as_mut(), &config.targets) => Ok(report),
        exit = collaborators.wait_any() => Err(anyhow!(exit)),
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };

    drop(orchestrator);
    let _ = event_log.await;

    if let Err(e) = session.close().await {
        warn!("failed to close the page: {e:#}");
    }
    result
}
