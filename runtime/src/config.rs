// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run configuration: CLI flags with environment fallbacks.
//!
//! Environment variables (a `.env` file in the working directory is loaded
//! first):
//! - `VFAT_PORT`: port the dashboard is served on (`http://localhost:{port}`)
//! - `LOADER_PORT`: port for the ingestion API
//! - `VFAT_DB`: SQLite database path
//! - `VFAT_BUILD_CMD` / `VFAT_SERVE_CMD`: collaborator commands

use crate::targets::{Catalogue, Selection};
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use vfat_core::{Network, Target};

pub const DEFAULT_DASHBOARD_PORT: u16 = 8000;
pub const DEFAULT_INGEST_PORT: u16 = 3002;

/// Configuration errors, all raised before anything is launched.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("protocol '{protocol}' is not known on {network}")]
    UnknownProtocol { network: Network, protocol: String },

    #[error("protocol '{0}' is not among the selected targets")]
    UnknownProtocolName(String),

    #[error("the selection matches no targets")]
    EmptySelection,

    #[error("invalid targets file: {0}")]
    TargetsFile(String),

    #[error("invalid dashboard URL '{0}'")]
    InvalidUrl(String),

    #[error("invalid value '{value}' for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

/// What to do when a page never initializes its load tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InitFailurePolicy {
    /// Treat it like any other failed attempt: cool down and retry.
    #[default]
    Retry,
    /// Give up on the target immediately and move on.
    Skip,
}

/// Timeouts and retry budget applied to every target.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Pause between a failed attempt and the next one.
    pub cooldown: Duration,
    pub navigation_timeout: Duration,
    /// How long to wait for the page to create its tracker.
    pub init_timeout: Duration,
    /// Completion timeout when the tracker declares no override.
    pub load_timeout: Duration,
    pub init_failure: InitFailurePolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            cooldown: Duration::from_secs(90),
            navigation_timeout: Duration::from_secs(60),
            init_timeout: Duration::from_secs(5),
            load_timeout: Duration::from_secs(60),
            init_failure: InitFailurePolicy::Retry,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Flags of the `run` command.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Run in test mode: batch id is set to -1 and nothing is persisted
    #[arg(short, long)]
    pub test: bool,

    /// Comma separated protocol ids to load (filters the selected networks)
    #[arg(short, long, value_name = "CSV")]
    pub protocols: Option<String>,

    /// Load ethereum targets, optionally only the listed protocols
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "", value_name = "CSV")]
    pub ethereum: Option<String>,

    /// Load arbitrum targets, optionally only the listed protocols
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "", value_name = "CSV")]
    pub arbitrum: Option<String>,

    /// JSON file replacing the builtin target catalogue
    #[arg(long, value_name = "PATH")]
    pub targets_file: Option<PathBuf>,

    /// Seconds to wait before retrying a failed target
    #[arg(long, default_value = "90")]
    pub cooldown: u64,

    /// Number of retries per target after the first attempt
    #[arg(long, default_value = "0")]
    pub retries: u32,

    /// Page navigation timeout in seconds
    #[arg(long, default_value = "60")]
    pub nav_timeout: u64,

    /// Seconds to wait for the page to initialize its load tracker
    #[arg(long, default_value = "5")]
    pub init_timeout: u64,

    /// Default seconds to wait for a page to finish loading
    #[arg(long, default_value = "60")]
    pub load_timeout: u64,

    /// What to do when a page never initializes its tracker
    #[arg(long, value_enum, default_value_t = InitFailurePolicy::Retry)]
    pub init_failure: InitFailurePolicy,

    /// Dashboard root URL (defaults to http://localhost:$VFAT_PORT)
    #[arg(long)]
    pub dashboard_url: Option<String>,

    /// Port for the ingestion API (defaults to $LOADER_PORT or 3002)
    #[arg(long)]
    pub ingest_port: Option<u16>,

    /// SQLite database path (defaults to $VFAT_DB or ~/.vfat-loader/vfat.db)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Shell command that builds the dashboard before the run
    #[arg(long)]
    pub build_cmd: Option<String>,

    /// Shell command that serves the dashboard during the run
    #[arg(long)]
    pub serve_cmd: Option<String>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headful: bool,
}

/// Fully resolved configuration of one run.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub dashboard_url: Url,
    pub ingest_port: u16,
    pub db_path: PathBuf,
    pub test_mode: bool,
    pub headful: bool,
    pub retry: RetryPolicy,
    pub build_command: Option<String>,
    pub serve_command: Option<String>,
    pub targets: Vec<Target>,
}

impl LoaderConfig {
    /// Resolve flags against the environment. `env` looks up a variable by
    /// name; pass `|k| std::env::var(k).ok()` outside tests.
    pub fn resolve(
        args: &RunArgs,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let dashboard_url = match &args.dashboard_url {
            Some(url) => url.clone(),
            None => {
                let port = env_port(&env, "VFAT_PORT")?.unwrap_or(DEFAULT_DASHBOARD_PORT);
                format!("http://localhost:{port}")
            }
        };
        let dashboard_url =
            Url::parse(&dashboard_url).map_err(|_| ConfigError::InvalidUrl(dashboard_url))?;

        let ingest_port = match args.ingest_port {
            Some(port) => port,
            None => env_port(&env, "LOADER_PORT")?.unwrap_or(DEFAULT_INGEST_PORT),
        };

        let db_path = args
            .db
            .clone()
            .or_else(|| env("VFAT_DB").map(PathBuf::from))
            .unwrap_or_else(default_db_path);

        let catalogue = match &args.targets_file {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    ConfigError::TargetsFile(format!("{}: {e}", path.display()))
                })?;
                Catalogue::from_json(&json)?
            }
            None => Catalogue::builtin(),
        };

        let mut selection = Selection::default();
        if let Some(csv) = &args.ethereum {
            selection = selection.network(Network::Ethereum, csv);
        }
        if let Some(csv) = &args.arbitrum {
            selection = selection.network(Network::Arbitrum, csv);
        }
        if let Some(csv) = &args.protocols {
            selection = selection.protocols(csv);
        }
        let targets = catalogue.select(&selection)?;

        Ok(Self {
            dashboard_url,
            ingest_port,
            db_path,
            test_mode: args.test,
            headful: args.headful,
            retry: RetryPolicy {
                max_retries: args.retries,
                cooldown: Duration::from_secs(args.cooldown),
                navigation_timeout: Duration::from_secs(args.nav_timeout),
                init_timeout: Duration::from_secs(args.init_timeout),
                load_timeout: Duration::from_secs(args.load_timeout),
                init_failure: args.init_failure,
            },
            build_command: args.build_cmd.clone().or_else(|| env("VFAT_BUILD_CMD")),
            serve_command: args.serve_cmd.clone().or_else(|| env("VFAT_SERVE_CMD")),
            targets,
        })
    }

    /// Base URL the ingestion client posts to.
    pub fn ingest_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.ingest_port)
    }
}

fn env_port(
    env: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u16>, ConfigError> {
    match env(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
    }
}

/// Default database location: `~/.vfat-loader/vfat.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".vfat-loader")
        .join("vfat.db")
}
