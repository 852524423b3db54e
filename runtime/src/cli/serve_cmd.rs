// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! `vfat-loader serve`: run the ingestion API on its own.

use crate::config::{default_db_path, DEFAULT_INGEST_PORT};
use crate::ingest::{self, IngestStore};
use anyhow::{anyhow, bail, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use vfat_core::Batch;

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Port to run the server on
    #[arg(short, long, env = "LOADER_PORT", default_value_t = DEFAULT_INGEST_PORT)]
    pub port: u16,

    /// Batch id associated with stored objects (-1 for test mode)
    #[arg(short, long, default_value_t = Batch::TEST_ID, allow_negative_numbers = true)]
    pub batch: i64,

    /// Issue a fresh batch instead of using --batch
    #[arg(long, conflicts_with = "batch")]
    pub new_batch: bool,

    /// SQLite database path
    #[arg(long, env = "VFAT_DB")]
    pub db: Option<PathBuf>,
}

pub async fn run(args: &ServeArgs) -> Result<()> {
    let db_path = args.db.clone().unwrap_or_else(default_db_path);
    let store = IngestStore::open(&db_path)?;

    let batch = if args.new_batch {
        store.create_batch()?
    } else {
        let batch = Batch::issued(args.batch)
            .ok_or_else(|| anyhow!("invalid batch id {}", args.batch))?;
        if batch.is_test() {
            store.ensure_test_batch()?;
        } else if !store.batch_exists(batch)? {
            bail!("batch {batch} does not exist in {}", db_path.display());
        }
        batch
    };

    let listener = ingest::bind(args.port).await?;
    tokio::select! {
        served = ingest::serve(listener, Arc::new(store), batch) => served,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            Ok(())
        }
    }
}
