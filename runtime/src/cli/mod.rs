// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommand implementations for the vfat-loader binary.

pub mod run_cmd;
pub mod serve_cmd;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `debug`.
pub fn init_tracing(debug: bool, json: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vfat_loader={level},vfat_core={level}")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug);
    // A second install (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
